//! The Video Streaming interface: its advertised streams and the stream selection heuristic.

use crate::{
    config::StreamPreferences,
    descriptor::*,
    error::{err, Action},
    format::*,
    transport::{EndpointInfo, InterfaceInfo},
    util::{interval_to_frequency, split_descriptors},
    Result,
};

/// One advertised format together with its frames and optional color matching information.
#[derive(Debug, Clone)]
pub struct VideoStream<F, R> {
    format: F,
    frames: Vec<R>,
    color_matching: Option<ColorMatching>,
}

impl<F, R: FrameDescriptor> VideoStream<F, R> {
    fn new(format: F) -> Self {
        Self {
            format,
            frames: Vec::new(),
            color_matching: None,
        }
    }

    pub fn format(&self) -> &F {
        &self.format
    }

    pub fn frames(&self) -> &[R] {
        &self.frames
    }

    pub fn frame_by_index(&self, frame_index: u8) -> Option<&R> {
        self.frames.iter().find(|f| f.frame_index() == frame_index)
    }

    pub fn color_matching(&self) -> Option<&ColorMatching> {
        self.color_matching.as_ref()
    }
}

pub type UncompressedStream = VideoStream<UncompressedFormat, VideoFrame>;
pub type MjpegStream = VideoStream<MjpegFormat, VideoFrame>;
pub type FrameBasedStream = VideoStream<FrameBasedFormat, FrameBasedFrame>;

#[derive(Debug, Clone)]
pub enum Stream {
    Uncompressed(UncompressedStream),
    Mjpeg(MjpegStream),
    FrameBased(FrameBasedStream),
}

impl Stream {
    pub fn stream_type(&self) -> StreamType {
        match self {
            Stream::Uncompressed(_) => StreamType::Uncompressed,
            Stream::Mjpeg(_) => StreamType::Mjpeg,
            Stream::FrameBased(_) => StreamType::FrameBased,
        }
    }

    pub fn format_index(&self) -> u8 {
        match self {
            Stream::Uncompressed(s) => s.format.format_index(),
            Stream::Mjpeg(s) => s.format.format_index(),
            Stream::FrameBased(s) => s.format.format_index(),
        }
    }

    /// The frame descriptors of this stream, type-erased.
    pub fn frames(&self) -> Vec<&dyn FrameDescriptor> {
        match self {
            Stream::Uncompressed(s) => s.frames.iter().map(|f| f as &dyn FrameDescriptor).collect(),
            Stream::Mjpeg(s) => s.frames.iter().map(|f| f as &dyn FrameDescriptor).collect(),
            Stream::FrameBased(s) => s.frames.iter().map(|f| f as &dyn FrameDescriptor).collect(),
        }
    }

    pub fn color_matching(&self) -> Option<&ColorMatching> {
        match self {
            Stream::Uncompressed(s) => s.color_matching(),
            Stream::Mjpeg(s) => s.color_matching(),
            Stream::FrameBased(s) => s.color_matching(),
        }
    }

    fn set_color_matching(&mut self, color_matching: ColorMatching) {
        let format_index = self.format_index();
        let slot = match self {
            Stream::Uncompressed(s) => &mut s.color_matching,
            Stream::Mjpeg(s) => &mut s.color_matching,
            Stream::FrameBased(s) => &mut s.color_matching,
        };
        if slot.is_some() {
            log::warn!("format {} has more than one color matching descriptor", format_index);
        }
        *slot = Some(color_matching);
    }

    fn accepts(&self, prefs: &StreamPreferences) -> bool {
        if let Some(stream_type) = prefs.stream_type {
            if stream_type != self.stream_type() {
                return false;
            }
        }
        match self {
            Stream::Uncompressed(s) => prefs
                .pixel_format
                .map_or(true, |pf| s.format.pixel_format() == Some(pf)),
            Stream::Mjpeg(_) => true,
            Stream::FrameBased(s) => prefs
                .encoding_format
                .map_or(true, |ef| s.format.encoding_format() == Some(ef)),
        }
    }

    fn bias(&self) -> f64 {
        match self {
            Stream::Uncompressed(_) => 9.5,
            Stream::Mjpeg(_) => 9.75,
            Stream::FrameBased(_) => 10.0,
        }
    }
}

/// One alternate setting of the streaming interface, with its endpoints.
#[derive(Debug, Clone)]
pub struct AlternateSetting {
    pub alt_setting: u8,
    pub endpoints: Vec<EndpointInfo>,
}

/// Width, height and format of one (format, frame) combination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamProperties {
    pub width: u32,
    pub height: u32,
    pub stream_type: StreamType,
    /// Set for uncompressed streams with a known pixel format.
    pub pixel_format: Option<PixelFormat>,
    /// Set for frame-based streams with a known codec.
    pub encoding_format: Option<EncodingFormat>,
}

/// A candidate produced by the stream matcher.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamMatch {
    pub score: f64,
    pub stream_type: StreamType,
    pub format_index: u8,
    pub frame_index: u8,
    /// Frame interval in 100 ns units.
    pub frame_interval: u32,
}

const DEFAULT_WIDTH: u32 = 1280;
const DEFAULT_HEIGHT: u32 = 720;
const DEFAULT_FRAME_RATE: f64 = 30.0;
const TIEBREAK_STEP: f64 = 0.00001;

#[derive(Debug, Clone, Default)]
pub struct VideoStreamingInterface {
    interface_number: Option<u8>,
    input_header: Option<InputHeader>,
    streams: Vec<Stream>,
    alt_settings: Vec<AlternateSetting>,
    duplicate_header: bool,
}

impl VideoStreamingInterface {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one alternate setting of the streaming interface.
    ///
    /// Alternate setting 0 usually carries all class-specific descriptors, the others only
    /// differ in their endpoints. Parsing stops at the first malformed descriptor.
    pub fn parse_additional_interface(&mut self, interface: &InterfaceInfo) -> Result<()> {
        match self.interface_number {
            Some(number) if number != interface.number => {
                return err(
                    format!(
                        "alternate setting belongs to interface {}, expected {}",
                        interface.number, number
                    ),
                    Action::ParsingDescriptors,
                );
            }
            _ => self.interface_number = Some(interface.number),
        }

        self.alt_settings.push(AlternateSetting {
            alt_setting: interface.alt_setting,
            endpoints: interface.endpoints.clone(),
        });

        for (ty, data) in split_descriptors(&interface.extra) {
            if ty != CS_INTERFACE {
                log::warn!(
                    "unexpected descriptor type {:#04x} in VS interface, stopping",
                    ty
                );
                break;
            }

            let desc = VsDescriptor::parse(data);
            if let VsDescriptor::Unsupported(header) = &desc {
                let what = match header.descriptor_subtype {
                    VS_OUTPUT_HEADER => "output header",
                    VS_STILL_IMAGE_FRAME => "still image frame",
                    _ => "unknown",
                };
                log::debug!(
                    "skipping {} descriptor (subtype {:#04x})",
                    what,
                    header.descriptor_subtype
                );
                continue;
            }
            if !desc.is_valid() {
                log::warn!("invalid VS descriptor {:02x?}, stopping", data);
                break;
            }

            match desc {
                VsDescriptor::InputHeader(header) => {
                    if self.input_header.is_some() {
                        self.duplicate_header = true;
                        return err(
                            "duplicate VS_INPUT_HEADER descriptor",
                            Action::ParsingDescriptors,
                        );
                    }
                    self.input_header = Some(header);
                }
                VsDescriptor::UncompressedFormat(format) => {
                    self.streams.push(Stream::Uncompressed(VideoStream::new(format)));
                }
                VsDescriptor::MjpegFormat(format) => {
                    self.streams.push(Stream::Mjpeg(VideoStream::new(format)));
                }
                VsDescriptor::FrameBasedFormat(format) => {
                    self.streams.push(Stream::FrameBased(VideoStream::new(format)));
                }
                VsDescriptor::UncompressedFrame(frame) => match self.streams.last_mut() {
                    Some(Stream::Uncompressed(stream)) => stream.frames.push(frame),
                    _ => log::warn!(
                        "uncompressed frame {} without a preceding format",
                        frame.frame_index
                    ),
                },
                VsDescriptor::MjpegFrame(frame) => match self.streams.last_mut() {
                    Some(Stream::Mjpeg(stream)) => stream.frames.push(frame),
                    _ => log::warn!("MJPEG frame {} without a preceding format", frame.frame_index),
                },
                VsDescriptor::FrameBasedFrame(frame) => match self.streams.last_mut() {
                    Some(Stream::FrameBased(stream)) => stream.frames.push(frame),
                    _ => log::warn!(
                        "frame-based frame {} without a preceding format",
                        frame.frame_index
                    ),
                },
                VsDescriptor::ColorMatching(color_matching) => match self.streams.last_mut() {
                    Some(stream) => stream.set_color_matching(color_matching),
                    None => log::warn!("color matching descriptor without a preceding format"),
                },
                VsDescriptor::Unsupported(_) => {}
            }
        }

        Ok(())
    }

    pub fn interface_number(&self) -> Option<u8> {
        self.interface_number
    }

    pub fn input_header(&self) -> Option<&InputHeader> {
        self.input_header.as_ref()
    }

    pub fn endpoint_address(&self) -> Option<u8> {
        self.input_header.as_ref().map(|h| h.endpoint_address())
    }

    pub fn streams(&self) -> &[Stream] {
        &self.streams
    }

    pub fn uncompressed_streams(&self) -> impl Iterator<Item = &UncompressedStream> + '_ {
        self.streams.iter().filter_map(|s| match s {
            Stream::Uncompressed(s) => Some(s),
            _ => None,
        })
    }

    pub fn mjpeg_streams(&self) -> impl Iterator<Item = &MjpegStream> + '_ {
        self.streams.iter().filter_map(|s| match s {
            Stream::Mjpeg(s) => Some(s),
            _ => None,
        })
    }

    pub fn frame_based_streams(&self) -> impl Iterator<Item = &FrameBasedStream> + '_ {
        self.streams.iter().filter_map(|s| match s {
            Stream::FrameBased(s) => Some(s),
            _ => None,
        })
    }

    pub fn stream_by_format_index(&self, format_index: u8) -> Option<&Stream> {
        self.streams.iter().find(|s| s.format_index() == format_index)
    }

    pub fn alternate_settings(&self) -> &[AlternateSetting] {
        &self.alt_settings
    }

    /// Whether the interface has a valid input header and was parsed without errors.
    pub fn is_valid(&self) -> bool {
        !self.duplicate_header && self.input_header.as_ref().map_or(false, |h| h.is_valid())
    }

    /// Looks up width, height and format of a (format, frame) combination.
    pub fn extract_stream_properties(
        &self,
        format_index: u8,
        frame_index: u8,
    ) -> Option<StreamProperties> {
        let stream = self.stream_by_format_index(format_index)?;
        let (width, height) = match stream {
            Stream::Uncompressed(s) => s.frame_by_index(frame_index).map(|f| (f.width, f.height)),
            Stream::Mjpeg(s) => s.frame_by_index(frame_index).map(|f| (f.width, f.height)),
            Stream::FrameBased(s) => s.frame_by_index(frame_index).map(|f| (f.width, f.height)),
        }?;

        let (pixel_format, encoding_format) = match stream {
            Stream::Uncompressed(s) => (s.format.pixel_format(), None),
            Stream::Mjpeg(_) => (None, None),
            Stream::FrameBased(s) => (None, s.format.encoding_format()),
        };

        Some(StreamProperties {
            width: u32::from(width),
            height: u32::from(height),
            stream_type: stream.stream_type(),
            pixel_format,
            encoding_format,
        })
    }

    /// Returns the best (format, frame, interval) combination for the given preferences, or
    /// `None` if no frame passes the filters.
    pub fn find_best_matching_stream(&self, prefs: &StreamPreferences) -> Option<StreamMatch> {
        let mut best: Option<StreamMatch> = None;
        self.score_candidates(prefs, |candidate| {
            if best.map_or(true, |b| candidate.score > b.score) {
                best = Some(candidate);
            }
        });
        best
    }

    /// Returns every candidate with its score, best first.
    pub fn matching_streams(&self, prefs: &StreamPreferences) -> Vec<StreamMatch> {
        let mut all = Vec::new();
        self.score_candidates(prefs, |candidate| all.push(candidate));
        all.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        all
    }

    fn score_candidates(&self, prefs: &StreamPreferences, mut sink: impl FnMut(StreamMatch)) {
        let target_rate = prefs
            .frame_rate
            .filter(|rate| *rate > 0.0)
            .unwrap_or(DEFAULT_FRAME_RATE);

        let mut tiebreak = 0.0;
        for stream in self.streams.iter().filter(|s| s.accepts(prefs)) {
            for frame in stream.frames() {
                let resolution = resolution_factor(prefs, frame.width(), frame.height());
                let (rate, interval) =
                    match frame_rate_factor(target_rate, frame.frame_intervals()) {
                        Some(found) => found,
                        None => continue,
                    };
                if resolution == 0.0 || rate == 0.0 {
                    continue;
                }

                tiebreak += TIEBREAK_STEP;
                sink(StreamMatch {
                    score: stream.bias() * (resolution + 0.1) * rate + tiebreak,
                    stream_type: stream.stream_type(),
                    format_index: stream.format_index(),
                    frame_index: frame.frame_index(),
                    frame_interval: interval,
                });
            }
        }
    }

    /// Picks the alternate setting whose endpoint can carry `payload_size` bytes per packet.
    ///
    /// Prefers the lowest alternate setting that is large enough and falls back to the one with
    /// the largest packets. Returns the alternate setting and its bytes per packet.
    pub fn select_isochronous_setting(&self, payload_size: usize) -> Option<(u8, usize)> {
        let endpoint = self.endpoint_address()?;
        let mut settings = self
            .alt_settings
            .iter()
            .filter_map(|alt| {
                alt.endpoints
                    .iter()
                    .find(|ep| ep.address == endpoint)
                    .map(|ep| (alt.alt_setting, ep.bytes_per_packet()))
            })
            .filter(|(_, size)| *size > 0)
            .collect::<Vec<_>>();
        settings.sort_by_key(|(alt, _)| *alt);

        settings
            .iter()
            .copied()
            .find(|(_, size)| *size >= payload_size)
            .or_else(|| settings.iter().copied().max_by_key(|(_, size)| *size))
    }
}

fn resolution_factor(prefs: &StreamPreferences, width: u16, height: u16) -> f64 {
    let width = f64::from(width);
    let height = f64::from(height);
    let target_width = prefs.width.filter(|w| *w > 0);
    let target_height = prefs.height.filter(|h| *h > 0);
    let (candidate, target) = match (target_width, target_height) {
        (Some(w), Some(h)) => (width * height, f64::from(w) * f64::from(h)),
        (Some(w), None) => (width, f64::from(w)),
        (None, Some(h)) => (height, f64::from(h)),
        (None, None) => (
            width * height,
            f64::from(DEFAULT_WIDTH) * f64::from(DEFAULT_HEIGHT),
        ),
    };
    (-(candidate - target).abs() / target).exp()
}

/// Finds the supported interval closest to `target_rate`, returning its factor and the interval.
fn frame_rate_factor(target_rate: f64, intervals: &FrameIntervals) -> Option<(f64, u32)> {
    let ratio = |interval: u32| (interval_to_frequency(interval) - target_rate).abs() / target_rate;

    let best = candidate_intervals(target_rate, intervals)
        .into_iter()
        .filter(|interval| *interval > 0)
        .map(|interval| (ratio(interval), interval))
        .fold(None, |best: Option<(f64, u32)>, candidate| match best {
            Some(b) if b.0 <= candidate.0 => Some(b),
            _ => Some(candidate),
        })?;

    Some(((-best.0).exp(), best.1))
}

fn candidate_intervals(target_rate: f64, intervals: &FrameIntervals) -> Vec<u32> {
    match *intervals {
        FrameIntervals::Discrete(ref list) => list.clone(),
        FrameIntervals::Continuous { min, max, step } => {
            if step == 0 || max <= min {
                return vec![min, max];
            }
            // Stepping from `min` to `max` only ever visits grid points; the closest ones to the
            // target are the two around it.
            let target = (10_000_000.0 / target_rate).max(f64::from(min)).min(f64::from(max));
            let steps = ((target - f64::from(min)) / f64::from(step)).floor() as u64;
            let below = u64::from(min) + steps * u64::from(step);
            let above = below + u64::from(step);
            let mut candidates = vec![below.min(u64::from(max)) as u32];
            if above <= u64::from(max) {
                candidates.push(above as u32);
            }
            candidates
        }
    }
}
