use crate::{descriptor::*, util::DescReader};

use super::*;

/// Reads the trailing frame interval table, returning it along with the descriptor length it
/// implies.
fn read_intervals(
    r: &mut DescReader<'_>,
    interval_type: u8,
    fixed_len: usize,
) -> (FrameIntervals, usize) {
    match interval_type {
        0 => {
            let min = r.u32();
            let max = r.u32();
            let step = r.u32();
            (FrameIntervals::Continuous { min, max, step }, fixed_len + 12)
        }
        n => {
            let intervals = r.u32_array(usize::from(n));
            (
                FrameIntervals::Discrete(intervals),
                fixed_len + 4 * usize::from(n),
            )
        }
    }
}

impl InputHeader {
    pub fn parse(raw: &[u8]) -> Self {
        let mut r = DescReader::new(raw);
        let header = DescriptorHeader::read(&mut r);
        let num_formats = r.u8();
        let total_length = r.u16();
        let endpoint_address = r.u8() & 0x8F;
        let info = InputInterfaceInfo::from_bits_truncate(r.u8());
        let terminal_link = r.u8();
        let still_capture_method = r.u8();
        let trigger_support = r.u8();
        let trigger_usage = r.u8();
        let control_size = r.u8();

        // This is `num_formats` units with `control_size` bytes each.
        let mut format_controls = Vec::with_capacity(usize::from(num_formats));
        for _ in 0..num_formats {
            format_controls.push(PerFormatControls::from_bits_truncate(
                r.bitmask(control_size),
            ));
        }

        let expected = 13 + usize::from(num_formats) * usize::from(control_size);
        let valid = check_layout(&header, raw.len(), expected, &[VS_INPUT_HEADER], &r);

        Self {
            header,
            num_formats,
            total_length,
            endpoint_address,
            info,
            terminal_link,
            still_capture_method,
            trigger_support,
            trigger_usage,
            control_size,
            format_controls,
            valid,
        }
    }
}

impl UncompressedFormat {
    pub fn parse(raw: &[u8]) -> Self {
        let mut r = DescReader::new(raw);
        let header = DescriptorHeader::read(&mut r);
        let format_index = r.u8();
        let num_frame_descriptors = r.u8();
        let guid_format = r.guid();
        let bits_per_pixel = r.u8();
        let default_frame_index = r.u8();
        let aspect_ratio_x = r.u8();
        let aspect_ratio_y = r.u8();
        let interlace_flags = InterlaceFlags::from_bits_truncate(r.u8());
        let copy_protect = r.u8();

        let valid = check_layout(&header, raw.len(), 27, &[VS_FORMAT_UNCOMPRESSED], &r);

        Self {
            header,
            format_index,
            num_frame_descriptors,
            guid_format,
            bits_per_pixel,
            default_frame_index,
            aspect_ratio_x,
            aspect_ratio_y,
            interlace_flags,
            copy_protect,
            valid,
        }
    }
}

impl MjpegFormat {
    pub fn parse(raw: &[u8]) -> Self {
        let mut r = DescReader::new(raw);
        let header = DescriptorHeader::read(&mut r);
        let format_index = r.u8();
        let num_frame_descriptors = r.u8();
        let flags = r.u8();
        let default_frame_index = r.u8();
        let aspect_ratio_x = r.u8();
        let aspect_ratio_y = r.u8();
        let interlace_flags = InterlaceFlags::from_bits_truncate(r.u8());
        let copy_protect = r.u8();

        let valid = check_layout(&header, raw.len(), 11, &[VS_FORMAT_MJPEG], &r);

        Self {
            header,
            format_index,
            num_frame_descriptors,
            flags,
            default_frame_index,
            aspect_ratio_x,
            aspect_ratio_y,
            interlace_flags,
            copy_protect,
            valid,
        }
    }
}

impl FrameBasedFormat {
    pub fn parse(raw: &[u8]) -> Self {
        let mut r = DescReader::new(raw);
        let header = DescriptorHeader::read(&mut r);
        let format_index = r.u8();
        let num_frame_descriptors = r.u8();
        let guid_format = r.guid();
        let bits_per_pixel = r.u8();
        let default_frame_index = r.u8();
        let aspect_ratio_x = r.u8();
        let aspect_ratio_y = r.u8();
        let interlace_flags = InterlaceFlags::from_bits_truncate(r.u8());
        let copy_protect = r.u8();
        let variable_size = r.u8() != 0;

        let valid = check_layout(&header, raw.len(), 28, &[VS_FORMAT_FRAME_BASED], &r);

        Self {
            header,
            format_index,
            num_frame_descriptors,
            guid_format,
            bits_per_pixel,
            default_frame_index,
            aspect_ratio_x,
            aspect_ratio_y,
            interlace_flags,
            copy_protect,
            variable_size,
            valid,
        }
    }
}

impl VideoFrame {
    /// Parses a `VS_FRAME_UNCOMPRESSED` or `VS_FRAME_MJPEG` descriptor.
    pub fn parse(raw: &[u8]) -> Self {
        let mut r = DescReader::new(raw);
        let header = DescriptorHeader::read(&mut r);
        let frame_index = r.u8();
        let capabilities = FrameCapabilities::from_bits_truncate(r.u8());
        let width = r.u16();
        let height = r.u16();
        let min_bit_rate = r.u32();
        let max_bit_rate = r.u32();
        let max_video_frame_buffer_size = r.u32();
        let default_frame_interval = r.u32();
        let interval_type = r.u8();
        let (intervals, expected) = read_intervals(&mut r, interval_type, 26);

        let valid = check_layout(
            &header,
            raw.len(),
            expected,
            &[VS_FRAME_UNCOMPRESSED, VS_FRAME_MJPEG],
            &r,
        );

        Self {
            header,
            frame_index,
            capabilities,
            width,
            height,
            min_bit_rate,
            max_bit_rate,
            max_video_frame_buffer_size,
            default_frame_interval,
            intervals,
            valid,
        }
    }
}

impl FrameBasedFrame {
    pub fn parse(raw: &[u8]) -> Self {
        let mut r = DescReader::new(raw);
        let header = DescriptorHeader::read(&mut r);
        let frame_index = r.u8();
        let capabilities = FrameCapabilities::from_bits_truncate(r.u8());
        let width = r.u16();
        let height = r.u16();
        let min_bit_rate = r.u32();
        let max_bit_rate = r.u32();
        let default_frame_interval = r.u32();
        let interval_type = r.u8();
        let bytes_per_line = r.u32();
        let (intervals, expected) = read_intervals(&mut r, interval_type, 26);

        let valid = check_layout(&header, raw.len(), expected, &[VS_FRAME_FRAME_BASED], &r);

        Self {
            header,
            frame_index,
            capabilities,
            width,
            height,
            min_bit_rate,
            max_bit_rate,
            default_frame_interval,
            bytes_per_line,
            intervals,
            valid,
        }
    }
}

impl ColorMatching {
    pub fn parse(raw: &[u8]) -> Self {
        let mut r = DescReader::new(raw);
        let header = DescriptorHeader::read(&mut r);
        let color_primaries = r.u8();
        let transfer_characteristics = r.u8();
        let matrix_coefficients = r.u8();

        let valid = check_layout(&header, raw.len(), 6, &[VS_COLORFORMAT], &r);

        Self {
            header,
            color_primaries,
            transfer_characteristics,
            matrix_coefficients,
            valid,
        }
    }
}

impl VsDescriptor {
    /// Parses one class-specific Video Streaming descriptor, dispatching on its subtype.
    pub fn parse(raw: &[u8]) -> Self {
        let header = DescriptorHeader::peek(raw).unwrap_or_default();
        match header.descriptor_subtype {
            VS_INPUT_HEADER => VsDescriptor::InputHeader(InputHeader::parse(raw)),
            VS_FORMAT_UNCOMPRESSED => {
                VsDescriptor::UncompressedFormat(UncompressedFormat::parse(raw))
            }
            VS_FRAME_UNCOMPRESSED => VsDescriptor::UncompressedFrame(VideoFrame::parse(raw)),
            VS_FORMAT_MJPEG => VsDescriptor::MjpegFormat(MjpegFormat::parse(raw)),
            VS_FRAME_MJPEG => VsDescriptor::MjpegFrame(VideoFrame::parse(raw)),
            VS_FORMAT_FRAME_BASED => VsDescriptor::FrameBasedFormat(FrameBasedFormat::parse(raw)),
            VS_FRAME_FRAME_BASED => VsDescriptor::FrameBasedFrame(FrameBasedFrame::parse(raw)),
            VS_COLORFORMAT => VsDescriptor::ColorMatching(ColorMatching::parse(raw)),
            _ => VsDescriptor::Unsupported(header),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    //! Hand-built descriptors, shared with the streaming interface tests.

    use super::*;

    pub(crate) fn input_header(endpoint: u8, num_formats: u8) -> Vec<u8> {
        let mut raw = vec![
            13 + num_formats,
            CS_INTERFACE,
            VS_INPUT_HEADER,
            num_formats,
            0,
            0,
            endpoint,
            0,
            3, // bTerminalLink
            0,
            0,
            0,
            1, // bControlSize
        ];
        raw.extend(std::iter::repeat(0).take(usize::from(num_formats)));
        raw
    }

    pub(crate) fn uncompressed_format(index: u8, guid: Uuid, num_frames: u8) -> Vec<u8> {
        let mut raw = vec![27, CS_INTERFACE, VS_FORMAT_UNCOMPRESSED, index, num_frames];
        let fields = guid.as_fields();
        raw.extend_from_slice(&fields.0.to_le_bytes());
        raw.extend_from_slice(&fields.1.to_le_bytes());
        raw.extend_from_slice(&fields.2.to_le_bytes());
        raw.extend_from_slice(fields.3);
        raw.extend_from_slice(&[16, 1, 0, 0, 0, 0]);
        raw
    }

    pub(crate) fn mjpeg_format(index: u8, num_frames: u8) -> Vec<u8> {
        vec![11, CS_INTERFACE, VS_FORMAT_MJPEG, index, num_frames, 1, 1, 0, 0, 0, 0]
    }

    pub(crate) fn frame_based_format(index: u8, guid: Uuid, num_frames: u8) -> Vec<u8> {
        let mut raw = vec![28, CS_INTERFACE, VS_FORMAT_FRAME_BASED, index, num_frames];
        let fields = guid.as_fields();
        raw.extend_from_slice(&fields.0.to_le_bytes());
        raw.extend_from_slice(&fields.1.to_le_bytes());
        raw.extend_from_slice(&fields.2.to_le_bytes());
        raw.extend_from_slice(fields.3);
        raw.extend_from_slice(&[16, 1, 0, 0, 0, 0, 1]);
        raw
    }

    /// An uncompressed (or MJPEG) frame descriptor with discrete intervals.
    pub(crate) fn video_frame(
        subtype: u8,
        index: u8,
        width: u16,
        height: u16,
        intervals: &[u32],
    ) -> Vec<u8> {
        let mut raw = vec![(26 + 4 * intervals.len()) as u8, CS_INTERFACE, subtype, index, 0];
        raw.extend_from_slice(&width.to_le_bytes());
        raw.extend_from_slice(&height.to_le_bytes());
        raw.extend_from_slice(&1_000_000u32.to_le_bytes());
        raw.extend_from_slice(&2_000_000u32.to_le_bytes());
        let frame_size = u32::from(width) * u32::from(height) * 2;
        raw.extend_from_slice(&frame_size.to_le_bytes());
        raw.extend_from_slice(&intervals[0].to_le_bytes());
        raw.push(intervals.len() as u8);
        for interval in intervals {
            raw.extend_from_slice(&interval.to_le_bytes());
        }
        raw
    }

    pub(crate) fn continuous_frame(
        subtype: u8,
        index: u8,
        width: u16,
        height: u16,
        min: u32,
        max: u32,
        step: u32,
    ) -> Vec<u8> {
        let mut raw = vec![38, CS_INTERFACE, subtype, index, 0];
        raw.extend_from_slice(&width.to_le_bytes());
        raw.extend_from_slice(&height.to_le_bytes());
        raw.extend_from_slice(&1_000_000u32.to_le_bytes());
        raw.extend_from_slice(&2_000_000u32.to_le_bytes());
        raw.extend_from_slice(&(u32::from(width) * u32::from(height) * 2).to_le_bytes());
        raw.extend_from_slice(&min.to_le_bytes());
        raw.push(0);
        for value in &[min, max, step] {
            raw.extend_from_slice(&value.to_le_bytes());
        }
        raw
    }

    pub(crate) fn frame_based_frame(
        index: u8,
        width: u16,
        height: u16,
        intervals: &[u32],
    ) -> Vec<u8> {
        let mut raw = vec![
            (26 + 4 * intervals.len()) as u8,
            CS_INTERFACE,
            VS_FRAME_FRAME_BASED,
            index,
            0,
        ];
        raw.extend_from_slice(&width.to_le_bytes());
        raw.extend_from_slice(&height.to_le_bytes());
        raw.extend_from_slice(&1_000_000u32.to_le_bytes());
        raw.extend_from_slice(&2_000_000u32.to_le_bytes());
        raw.extend_from_slice(&intervals[0].to_le_bytes());
        raw.push(intervals.len() as u8);
        raw.extend_from_slice(&0u32.to_le_bytes());
        for interval in intervals {
            raw.extend_from_slice(&interval.to_le_bytes());
        }
        raw
    }

    pub(crate) fn color_matching() -> Vec<u8> {
        vec![6, CS_INTERFACE, VS_COLORFORMAT, 1, 1, 4]
    }

    #[test]
    fn input_header_fields() {
        let header = InputHeader::parse(&input_header(0x81, 2));
        assert!(header.is_valid());
        assert_eq!(header.num_formats(), 2);
        assert_eq!(header.endpoint_address(), 0x81);
        assert_eq!(header.terminal_link(), 3);
        assert_eq!(header.format_controls().len(), 2);
    }

    #[test]
    fn input_header_masks_endpoint_address() {
        let header = InputHeader::parse(&input_header(0xF2, 1));
        assert_eq!(header.endpoint_address(), 0x82);
    }

    #[test]
    fn uncompressed_format_fields() {
        let raw = uncompressed_format(1, PixelFormat::Yuy2.guid(), 3);
        let format = UncompressedFormat::parse(&raw);
        assert!(format.is_valid());
        assert_eq!(format.format_index(), 1);
        assert_eq!(format.num_frame_descriptors(), 3);
        assert_eq!(format.pixel_format(), Some(PixelFormat::Yuy2));
        assert_eq!(format.bits_per_pixel(), 16);
        assert_eq!(format.default_frame_index(), 1);
    }

    #[test]
    fn discrete_frame_fields() {
        let raw = video_frame(VS_FRAME_UNCOMPRESSED, 2, 640, 480, &[333_333, 666_666]);
        let frame = VideoFrame::parse(&raw);
        assert!(frame.is_valid());
        assert_eq!(frame.frame_index(), 2);
        assert_eq!(frame.width(), 640);
        assert_eq!(frame.height(), 480);
        assert_eq!(frame.max_video_frame_buffer_size(), 640 * 480 * 2);
        assert_eq!(frame.default_frame_interval(), 333_333);
        assert_eq!(
            frame.frame_intervals(),
            &FrameIntervals::Discrete(vec![333_333, 666_666])
        );
    }

    #[test]
    fn continuous_frame_fields() {
        let raw = continuous_frame(VS_FRAME_MJPEG, 1, 1280, 720, 333_333, 1_000_000, 333_333);
        let frame = VideoFrame::parse(&raw);
        assert!(frame.is_valid());
        assert_eq!(
            frame.frame_intervals(),
            &FrameIntervals::Continuous {
                min: 333_333,
                max: 1_000_000,
                step: 333_333
            }
        );
    }

    #[test]
    fn frame_based_frame_fields() {
        let frame = FrameBasedFrame::parse(&frame_based_frame(1, 1920, 1080, &[333_333]));
        assert!(frame.is_valid());
        assert_eq!(frame.width(), 1920);
        assert_eq!(frame.default_frame_interval(), 333_333);
        assert_eq!(frame.bytes_per_line(), 0);
        assert_eq!(frame.frame_intervals().interval_type(), 1);
    }

    #[test]
    fn interval_count_must_match_length() {
        let mut raw = video_frame(VS_FRAME_UNCOMPRESSED, 1, 640, 480, &[333_333, 666_666]);
        // claims three intervals, carries two
        raw[25] = 3;
        assert!(!VideoFrame::parse(&raw).is_valid());
    }

    #[test]
    fn truncated_descriptors_are_invalid() {
        let samples = vec![
            input_header(0x81, 2),
            uncompressed_format(1, PixelFormat::Nv12.guid(), 1),
            mjpeg_format(2, 1),
            frame_based_format(3, EncodingFormat::H264.guid(), 1),
            video_frame(VS_FRAME_MJPEG, 1, 640, 480, &[333_333]),
            continuous_frame(VS_FRAME_UNCOMPRESSED, 1, 640, 480, 333_333, 666_666, 1),
            frame_based_frame(1, 1920, 1080, &[333_333, 400_000]),
            color_matching(),
        ];

        for raw in samples {
            assert!(VsDescriptor::parse(&raw).is_valid(), "{:02x?}", raw);
            for cut in 0..raw.len() {
                let mut truncated = raw.clone();
                truncated.remove(cut);
                assert!(!VsDescriptor::parse(&truncated).is_valid());
            }
            assert!(!VsDescriptor::parse(&raw[..raw.len() - 1]).is_valid());
        }
    }

    #[test]
    fn frame_based_format_reports_codec() {
        let raw = frame_based_format(1, EncodingFormat::H265.guid(), 2);
        let format = FrameBasedFormat::parse(&raw);
        assert!(format.is_valid());
        assert_eq!(format.encoding_format(), Some(EncodingFormat::H265));
        assert!(format.variable_size());
    }
}
