//! Video Streaming interface descriptors: the input header, video formats and their frames.

pub(crate) mod parse;

use std::{fmt, time::Duration};

use bitflags::bitflags;
use uuid::Uuid;

use crate::descriptor::DescriptorHeader;

/// The kind of payload a stream carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamType {
    Invalid,
    Uncompressed,
    Mjpeg,
    FrameBased,
}

impl StreamType {
    pub fn name(self) -> &'static str {
        match self {
            StreamType::Invalid => "Invalid",
            StreamType::Uncompressed => "Uncompressed",
            StreamType::Mjpeg => "MJpeg",
            StreamType::FrameBased => "FrameBased",
        }
    }
}

impl fmt::Display for StreamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Pixel layouts of uncompressed streams this crate knows the size of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// Packed 4:2:2, Y0 U Y1 V.
    Yuy2,
    /// Packed 4:2:2, U Y0 V Y1.
    Uyvy,
    /// Planar Y followed by interleaved UV at half resolution.
    Nv12,
    /// Planar Y, U, V with chroma at half resolution.
    I420,
    /// 8 bit luminance only.
    Y800,
}

// Fourcc in the first field, common `-0000-0010-8000-00AA00389B71` suffix.
fn fourcc_guid(fourcc: u32) -> Uuid {
    Uuid::from_u128(((fourcc as u128) << 96) | 0x0000_0010_8000_00aa_0038_9b71)
}

const fn fourcc(code: &[u8; 4]) -> u32 {
    (code[0] as u32) | (code[1] as u32) << 8 | (code[2] as u32) << 16 | (code[3] as u32) << 24
}

impl PixelFormat {
    const ALL: [PixelFormat; 5] = [
        PixelFormat::Yuy2,
        PixelFormat::Uyvy,
        PixelFormat::Nv12,
        PixelFormat::I420,
        PixelFormat::Y800,
    ];

    /// The `guidFormat` an uncompressed format descriptor uses for this pixel format.
    pub fn guid(self) -> Uuid {
        let code = match self {
            PixelFormat::Yuy2 => b"YUY2",
            PixelFormat::Uyvy => b"UYVY",
            PixelFormat::Nv12 => b"NV12",
            PixelFormat::I420 => b"I420",
            PixelFormat::Y800 => b"Y800",
        };
        fourcc_guid(fourcc(code))
    }

    pub fn from_guid(guid: Uuid) -> Option<Self> {
        Self::ALL.iter().copied().find(|format| format.guid() == guid)
    }

    /// Size of one frame in bytes.
    pub fn frame_size(self, width: u32, height: u32) -> usize {
        let pixels = width as usize * height as usize;
        match self {
            PixelFormat::Yuy2 | PixelFormat::Uyvy => pixels * 2,
            PixelFormat::Nv12 | PixelFormat::I420 => pixels * 3 / 2,
            PixelFormat::Y800 => pixels,
        }
    }
}

/// Codecs of frame-based streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EncodingFormat {
    H264,
    H265,
}

impl EncodingFormat {
    pub fn from_guid(guid: Uuid) -> Option<Self> {
        if guid == fourcc_guid(fourcc(b"H264")) {
            Some(EncodingFormat::H264)
        } else if guid == fourcc_guid(fourcc(b"H265")) || guid == fourcc_guid(fourcc(b"HEVC")) {
            Some(EncodingFormat::H265)
        } else {
            None
        }
    }

    pub fn guid(self) -> Uuid {
        match self {
            EncodingFormat::H264 => fourcc_guid(fourcc(b"H264")),
            EncodingFormat::H265 => fourcc_guid(fourcc(b"H265")),
        }
    }
}

/// The `VS_INPUT_HEADER` descriptor.
#[derive(Debug, Clone)]
pub struct InputHeader {
    pub(crate) header: DescriptorHeader,
    pub(crate) num_formats: u8,
    pub(crate) total_length: u16,
    pub(crate) endpoint_address: u8,
    pub(crate) info: InputInterfaceInfo,
    pub(crate) terminal_link: u8,
    pub(crate) still_capture_method: u8,
    pub(crate) trigger_support: u8,
    pub(crate) trigger_usage: u8,
    pub(crate) control_size: u8,
    pub(crate) format_controls: Vec<PerFormatControls>,
    pub(crate) valid: bool,
}

impl InputHeader {
    pub fn num_formats(&self) -> u8 {
        self.num_formats
    }

    pub fn total_length(&self) -> u16 {
        self.total_length
    }

    /// The isochronous or bulk endpoint video data is read from.
    pub fn endpoint_address(&self) -> u8 {
        self.endpoint_address
    }

    pub fn info(&self) -> InputInterfaceInfo {
        self.info
    }

    pub fn terminal_link(&self) -> u8 {
        self.terminal_link
    }

    pub fn still_capture_method(&self) -> u8 {
        self.still_capture_method
    }

    pub fn trigger_support(&self) -> u8 {
        self.trigger_support
    }

    pub fn trigger_usage(&self) -> u8 {
        self.trigger_usage
    }

    pub fn control_size(&self) -> u8 {
        self.control_size
    }

    pub fn format_controls(&self) -> &[PerFormatControls] {
        &self.format_controls
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }
}

bitflags! {
    pub struct InputInterfaceInfo: u8 {
        const DYNAMIC_FORMAT_CHANGE_SUPPORTED = 1 << 0;
    }
}

bitflags! {
    pub struct PerFormatControls: u32 {
        const KEY_FRAME_RATE = 1 << 0;
        const P_FRAME_RATE = 1 << 1;
        const COMP_QUALITY = 1 << 2;
        const COMP_WINDOW_SIZE = 1 << 3;

        const GENERATE_KEY_FRAME = 1 << 4;
        const UPDATE_FRAME_SEGMENT = 1 << 5;
    }
}

bitflags! {
    pub struct InterlaceFlags: u8 {
        const INTERLACED = 1 << 0;
        const SINGLE_FIELD_PER_FRAME = 1 << 1;
        const FIELD_1_FIRST = 1 << 2;
        const FIELD_PATTERN_MASK = 0b110000;
    }
}

bitflags! {
    pub struct FrameCapabilities: u8 {
        const STILL_IMAGE_SUPPORTED = 1 << 0;
        const FIXED_FRAME_RATE = 1 << 1;
    }
}

/// `VS_FORMAT_UNCOMPRESSED`.
#[derive(Debug, Clone)]
pub struct UncompressedFormat {
    pub(crate) header: DescriptorHeader,
    pub(crate) format_index: u8,
    pub(crate) num_frame_descriptors: u8,
    pub(crate) guid_format: Uuid,
    pub(crate) bits_per_pixel: u8,
    pub(crate) default_frame_index: u8,
    pub(crate) aspect_ratio_x: u8,
    pub(crate) aspect_ratio_y: u8,
    pub(crate) interlace_flags: InterlaceFlags,
    pub(crate) copy_protect: u8,
    pub(crate) valid: bool,
}

impl UncompressedFormat {
    pub fn format_index(&self) -> u8 {
        self.format_index
    }

    pub fn num_frame_descriptors(&self) -> u8 {
        self.num_frame_descriptors
    }

    pub fn guid_format(&self) -> Uuid {
        self.guid_format
    }

    pub fn pixel_format(&self) -> Option<PixelFormat> {
        PixelFormat::from_guid(self.guid_format)
    }

    pub fn bits_per_pixel(&self) -> u8 {
        self.bits_per_pixel
    }

    pub fn default_frame_index(&self) -> u8 {
        self.default_frame_index
    }

    pub fn aspect_ratio(&self) -> (u8, u8) {
        (self.aspect_ratio_x, self.aspect_ratio_y)
    }

    pub fn interlace_flags(&self) -> InterlaceFlags {
        self.interlace_flags
    }

    pub fn copy_protect(&self) -> u8 {
        self.copy_protect
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }
}

/// `VS_FORMAT_MJPEG`.
#[derive(Debug, Clone)]
pub struct MjpegFormat {
    pub(crate) header: DescriptorHeader,
    pub(crate) format_index: u8,
    pub(crate) num_frame_descriptors: u8,
    pub(crate) flags: u8,
    pub(crate) default_frame_index: u8,
    pub(crate) aspect_ratio_x: u8,
    pub(crate) aspect_ratio_y: u8,
    pub(crate) interlace_flags: InterlaceFlags,
    pub(crate) copy_protect: u8,
    pub(crate) valid: bool,
}

impl MjpegFormat {
    pub fn format_index(&self) -> u8 {
        self.format_index
    }

    pub fn num_frame_descriptors(&self) -> u8 {
        self.num_frame_descriptors
    }

    /// `bmFlags`; bit 0 means fixed-size samples.
    pub fn flags(&self) -> u8 {
        self.flags
    }

    pub fn default_frame_index(&self) -> u8 {
        self.default_frame_index
    }

    pub fn aspect_ratio(&self) -> (u8, u8) {
        (self.aspect_ratio_x, self.aspect_ratio_y)
    }

    pub fn interlace_flags(&self) -> InterlaceFlags {
        self.interlace_flags
    }

    pub fn copy_protect(&self) -> u8 {
        self.copy_protect
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }
}

/// `VS_FORMAT_FRAME_BASED`.
#[derive(Debug, Clone)]
pub struct FrameBasedFormat {
    pub(crate) header: DescriptorHeader,
    pub(crate) format_index: u8,
    pub(crate) num_frame_descriptors: u8,
    pub(crate) guid_format: Uuid,
    pub(crate) bits_per_pixel: u8,
    pub(crate) default_frame_index: u8,
    pub(crate) aspect_ratio_x: u8,
    pub(crate) aspect_ratio_y: u8,
    pub(crate) interlace_flags: InterlaceFlags,
    pub(crate) copy_protect: u8,
    pub(crate) variable_size: bool,
    pub(crate) valid: bool,
}

impl FrameBasedFormat {
    pub fn format_index(&self) -> u8 {
        self.format_index
    }

    pub fn num_frame_descriptors(&self) -> u8 {
        self.num_frame_descriptors
    }

    pub fn guid_format(&self) -> Uuid {
        self.guid_format
    }

    pub fn encoding_format(&self) -> Option<EncodingFormat> {
        EncodingFormat::from_guid(self.guid_format)
    }

    pub fn bits_per_pixel(&self) -> u8 {
        self.bits_per_pixel
    }

    pub fn default_frame_index(&self) -> u8 {
        self.default_frame_index
    }

    pub fn aspect_ratio(&self) -> (u8, u8) {
        (self.aspect_ratio_x, self.aspect_ratio_y)
    }

    pub fn interlace_flags(&self) -> InterlaceFlags {
        self.interlace_flags
    }

    pub fn copy_protect(&self) -> u8 {
        self.copy_protect
    }

    pub fn variable_size(&self) -> bool {
        self.variable_size
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }
}

/// Frame intervals a frame descriptor supports, in 100 ns units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameIntervals {
    Continuous { min: u32, max: u32, step: u32 },
    Discrete(Vec<u32>),
}

impl FrameIntervals {
    /// `bFrameIntervalType`: 0 for continuous, else the number of discrete intervals.
    pub fn interval_type(&self) -> usize {
        match self {
            FrameIntervals::Continuous { .. } => 0,
            FrameIntervals::Discrete(intervals) => intervals.len(),
        }
    }
}

/// Common accessors of the frame descriptor layouts.
pub trait FrameDescriptor {
    fn frame_index(&self) -> u8;
    fn width(&self) -> u16;
    fn height(&self) -> u16;
    fn default_frame_interval(&self) -> u32;
    fn frame_intervals(&self) -> &FrameIntervals;

    fn default_frame_duration(&self) -> Duration {
        Duration::from_nanos(u64::from(self.default_frame_interval()) * 100)
    }
}

/// `VS_FRAME_UNCOMPRESSED` and `VS_FRAME_MJPEG`, which share one layout.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub(crate) header: DescriptorHeader,
    pub(crate) frame_index: u8,
    pub(crate) capabilities: FrameCapabilities,
    pub(crate) width: u16,
    pub(crate) height: u16,
    pub(crate) min_bit_rate: u32,
    pub(crate) max_bit_rate: u32,
    pub(crate) max_video_frame_buffer_size: u32,
    pub(crate) default_frame_interval: u32,
    pub(crate) intervals: FrameIntervals,
    pub(crate) valid: bool,
}

impl VideoFrame {
    pub fn capabilities(&self) -> FrameCapabilities {
        self.capabilities
    }

    pub fn min_bit_rate(&self) -> u32 {
        self.min_bit_rate
    }

    pub fn max_bit_rate(&self) -> u32 {
        self.max_bit_rate
    }

    /// `dwMaxVideoFrameBufferSize` (deprecated, the probe control is authoritative).
    pub fn max_video_frame_buffer_size(&self) -> u32 {
        self.max_video_frame_buffer_size
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }
}

impl FrameDescriptor for VideoFrame {
    fn frame_index(&self) -> u8 {
        self.frame_index
    }

    fn width(&self) -> u16 {
        self.width
    }

    fn height(&self) -> u16 {
        self.height
    }

    fn default_frame_interval(&self) -> u32 {
        self.default_frame_interval
    }

    fn frame_intervals(&self) -> &FrameIntervals {
        &self.intervals
    }
}

/// `VS_FRAME_FRAME_BASED`.
#[derive(Debug, Clone)]
pub struct FrameBasedFrame {
    pub(crate) header: DescriptorHeader,
    pub(crate) frame_index: u8,
    pub(crate) capabilities: FrameCapabilities,
    pub(crate) width: u16,
    pub(crate) height: u16,
    pub(crate) min_bit_rate: u32,
    pub(crate) max_bit_rate: u32,
    pub(crate) default_frame_interval: u32,
    pub(crate) bytes_per_line: u32,
    pub(crate) intervals: FrameIntervals,
    pub(crate) valid: bool,
}

impl FrameBasedFrame {
    pub fn capabilities(&self) -> FrameCapabilities {
        self.capabilities
    }

    pub fn min_bit_rate(&self) -> u32 {
        self.min_bit_rate
    }

    pub fn max_bit_rate(&self) -> u32 {
        self.max_bit_rate
    }

    /// `dwBytesPerLine`, 0 for codecs without a line structure.
    pub fn bytes_per_line(&self) -> u32 {
        self.bytes_per_line
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }
}

impl FrameDescriptor for FrameBasedFrame {
    fn frame_index(&self) -> u8 {
        self.frame_index
    }

    fn width(&self) -> u16 {
        self.width
    }

    fn height(&self) -> u16 {
        self.height
    }

    fn default_frame_interval(&self) -> u32 {
        self.default_frame_interval
    }

    fn frame_intervals(&self) -> &FrameIntervals {
        &self.intervals
    }
}

/// `VS_COLORFORMAT`.
#[derive(Debug, Clone)]
pub struct ColorMatching {
    pub(crate) header: DescriptorHeader,
    pub(crate) color_primaries: u8,
    pub(crate) transfer_characteristics: u8,
    pub(crate) matrix_coefficients: u8,
    pub(crate) valid: bool,
}

impl ColorMatching {
    pub fn color_primaries(&self) -> u8 {
        self.color_primaries
    }

    pub fn transfer_characteristics(&self) -> u8 {
        self.transfer_characteristics
    }

    pub fn matrix_coefficients(&self) -> u8 {
        self.matrix_coefficients
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }
}

/// Any class-specific descriptor found on a Video Streaming interface.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum VsDescriptor {
    InputHeader(InputHeader),
    UncompressedFormat(UncompressedFormat),
    UncompressedFrame(VideoFrame),
    MjpegFormat(MjpegFormat),
    MjpegFrame(VideoFrame),
    FrameBasedFormat(FrameBasedFormat),
    FrameBasedFrame(FrameBasedFrame),
    ColorMatching(ColorMatching),
    /// A subtype this crate does not decode (eg. still image frames or MPEG-2 TS).
    Unsupported(DescriptorHeader),
}

impl VsDescriptor {
    pub fn header(&self) -> DescriptorHeader {
        match self {
            VsDescriptor::InputHeader(d) => d.header,
            VsDescriptor::UncompressedFormat(d) => d.header,
            VsDescriptor::UncompressedFrame(d) | VsDescriptor::MjpegFrame(d) => d.header,
            VsDescriptor::MjpegFormat(d) => d.header,
            VsDescriptor::FrameBasedFormat(d) => d.header,
            VsDescriptor::FrameBasedFrame(d) => d.header,
            VsDescriptor::ColorMatching(d) => d.header,
            VsDescriptor::Unsupported(header) => *header,
        }
    }

    pub fn is_valid(&self) -> bool {
        match self {
            VsDescriptor::InputHeader(d) => d.is_valid(),
            VsDescriptor::UncompressedFormat(d) => d.is_valid(),
            VsDescriptor::UncompressedFrame(d) | VsDescriptor::MjpegFrame(d) => d.is_valid(),
            VsDescriptor::MjpegFormat(d) => d.is_valid(),
            VsDescriptor::FrameBasedFormat(d) => d.is_valid(),
            VsDescriptor::FrameBasedFrame(d) => d.is_valid(),
            VsDescriptor::ColorMatching(d) => d.is_valid(),
            VsDescriptor::Unsupported(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_guids() {
        assert_eq!(
            PixelFormat::Yuy2.guid(),
            Uuid::from_u128(0x32595559_0000_0010_8000_00aa00389b71)
        );
        assert_eq!(
            EncodingFormat::from_guid(Uuid::from_u128(0x34363248_0000_0010_8000_00aa00389b71)),
            Some(EncodingFormat::H264)
        );
        assert_eq!(
            EncodingFormat::from_guid(Uuid::from_u128(0x43564548_0000_0010_8000_00aa00389b71)),
            Some(EncodingFormat::H265)
        );
        assert_eq!(PixelFormat::from_guid(Uuid::nil()), None);
    }

    #[test]
    fn frame_sizes() {
        assert_eq!(PixelFormat::Yuy2.frame_size(640, 480), 614_400);
        assert_eq!(PixelFormat::Nv12.frame_size(640, 480), 460_800);
        assert_eq!(PixelFormat::Y800.frame_size(640, 480), 307_200);
    }

    #[test]
    fn stream_type_names() {
        assert_eq!(StreamType::Mjpeg.to_string(), "MJpeg");
        assert_eq!(StreamType::FrameBased.name(), "FrameBased");
    }
}
