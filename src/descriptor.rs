//! Common layout shared by every UVC class-specific interface descriptor.

use crate::util::DescReader;

/// The value of `bDescriptorType` of all descriptors we're interested in (`CS_INTERFACE`).
pub const CS_INTERFACE: u8 = 0x24;

pub(crate) const VC_HEADER: u8 = 0x01;
pub(crate) const VC_INPUT_TERMINAL: u8 = 0x02;
pub(crate) const VC_OUTPUT_TERMINAL: u8 = 0x03;
pub(crate) const VC_SELECTOR_UNIT: u8 = 0x04;
pub(crate) const VC_PROCESSING_UNIT: u8 = 0x05;
pub(crate) const VC_EXTENSION_UNIT: u8 = 0x06;

pub(crate) const VS_INPUT_HEADER: u8 = 0x01;
pub(crate) const VS_OUTPUT_HEADER: u8 = 0x02;
pub(crate) const VS_STILL_IMAGE_FRAME: u8 = 0x03;
pub(crate) const VS_FORMAT_UNCOMPRESSED: u8 = 0x04;
pub(crate) const VS_FRAME_UNCOMPRESSED: u8 = 0x05;
pub(crate) const VS_FORMAT_MJPEG: u8 = 0x06;
pub(crate) const VS_FRAME_MJPEG: u8 = 0x07;
pub(crate) const VS_COLORFORMAT: u8 = 0x0D;
pub(crate) const VS_FORMAT_FRAME_BASED: u8 = 0x10;
pub(crate) const VS_FRAME_FRAME_BASED: u8 = 0x11;

/// The 3-byte prefix of every class-specific interface descriptor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DescriptorHeader {
    /// `bLength`: the declared size of the whole descriptor in bytes.
    pub length: u8,
    /// `bDescriptorType`, [`CS_INTERFACE`] for everything this crate parses.
    pub descriptor_type: u8,
    /// `bDescriptorSubtype`, selects the layout of the rest of the descriptor.
    pub descriptor_subtype: u8,
}

impl DescriptorHeader {
    pub(crate) fn read(reader: &mut DescReader<'_>) -> Self {
        Self {
            length: reader.u8(),
            descriptor_type: reader.u8(),
            descriptor_subtype: reader.u8(),
        }
    }

    /// Reads only the header of `raw`, if it is long enough to have one.
    pub fn peek(raw: &[u8]) -> Option<Self> {
        match raw {
            [length, descriptor_type, descriptor_subtype, ..] => Some(Self {
                length: *length,
                descriptor_type: *descriptor_type,
                descriptor_subtype: *descriptor_subtype,
            }),
            _ => None,
        }
    }
}

/// The checks every descriptor's validity is built from.
///
/// The declared length has to match both the span it was parsed from and the length computed from
/// the parsed counts, no read may have run past the span, and the type/subtype have to be the
/// expected ones.
pub(crate) fn check_layout(
    header: &DescriptorHeader,
    span_len: usize,
    expected_len: usize,
    subtypes: &[u8],
    reader: &DescReader<'_>,
) -> bool {
    if reader.overrun() {
        log::debug!(
            "descriptor subtype {:#04x} is truncated ({} bytes)",
            header.descriptor_subtype,
            span_len
        );
        return false;
    }

    let length = usize::from(header.length);
    header.descriptor_type == CS_INTERFACE
        && subtypes.contains(&header.descriptor_subtype)
        && length == span_len
        && length == expected_len
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peek_needs_three_bytes() {
        assert_eq!(DescriptorHeader::peek(&[3, CS_INTERFACE]), None);
        assert_eq!(
            DescriptorHeader::peek(&[3, CS_INTERFACE, VC_HEADER]),
            Some(DescriptorHeader {
                length: 3,
                descriptor_type: CS_INTERFACE,
                descriptor_subtype: VC_HEADER,
            })
        );
    }

    #[test]
    fn layout_check_rejects_length_mismatch() {
        let raw = [4, CS_INTERFACE, VC_HEADER, 0];
        let mut reader = DescReader::new(&raw);
        let header = DescriptorHeader::read(&mut reader);
        reader.u8();
        assert!(check_layout(&header, raw.len(), 4, &[VC_HEADER], &reader));
        assert!(!check_layout(&header, raw.len(), 5, &[VC_HEADER], &reader));
        assert!(!check_layout(&header, raw.len(), 4, &[VC_INPUT_TERMINAL], &reader));
    }
}
