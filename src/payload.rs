//! The header in front of every payload transfer of a video stream.

use std::fmt;

use bitflags::bitflags;
use byteorder::{ByteOrder, LE};

bitflags! {
    /// `bmHeaderInfo`.
    #[derive(Default)]
    pub struct HeaderInfo: u8 {
        /// Frame ID, toggles at every frame boundary.
        const FRAME_ID = 1 << 0;
        const END_OF_FRAME = 1 << 1;
        const PRESENTATION_TIME = 1 << 2;
        const SOURCE_CLOCK = 1 << 3;
        /// Payload specific bit (end of slice / end of segment).
        const PAYLOAD_SPECIFIC = 1 << 4;
        const STILL_IMAGE = 1 << 5;
        const ERROR = 1 << 6;
        const END_OF_HEADER = 1 << 7;
    }
}

/// Source clock reference: the device clock when the payload left the device, and the USB frame
/// counter at that time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceClock {
    /// Source time clock, in device clock ticks.
    pub stc: u32,
    /// 11-bit bus frame counter.
    pub sof: u16,
}

/// A decoded payload header.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PayloadHeader {
    length: usize,
    info: HeaderInfo,
    presentation_time: Option<u32>,
    source_clock: Option<SourceClock>,
    /// Whether `bHeaderLength` fit the packet, so `info` was really sent by the device.
    well_formed: bool,
}

impl PayloadHeader {
    /// Decodes the header at the start of `packet`.
    ///
    /// Malformed headers never fail to parse; they come back with the error bit set and cover the
    /// whole packet, so no bytes of theirs end up in a sample.
    pub fn parse(packet: &[u8]) -> Self {
        let malformed = |info: HeaderInfo| Self {
            length: packet.len(),
            info: info | HeaderInfo::ERROR,
            presentation_time: None,
            source_clock: None,
            well_formed: false,
        };

        let (declared, info) = match packet {
            [length, info, ..] => (usize::from(*length), HeaderInfo::from_bits_truncate(*info)),
            _ => return malformed(HeaderInfo::empty()),
        };
        if declared < 2 || declared > packet.len() {
            return malformed(info);
        }

        let fields = &packet[2..declared];
        let mut offset = 0;
        let mut presentation_time = None;
        let mut source_clock = None;
        let mut truncated = false;

        if info.contains(HeaderInfo::PRESENTATION_TIME) {
            match fields.get(offset..offset + 4) {
                Some(pts) => presentation_time = Some(LE::read_u32(pts)),
                None => truncated = true,
            }
            offset += 4;
        }
        if info.contains(HeaderInfo::SOURCE_CLOCK) {
            match fields.get(offset..offset + 6) {
                Some(scr) => {
                    source_clock = Some(SourceClock {
                        stc: LE::read_u32(&scr[..4]),
                        sof: LE::read_u16(&scr[4..]) & 0x07FF,
                    })
                }
                None => truncated = true,
            }
        }

        let info = if truncated {
            info | HeaderInfo::ERROR
        } else {
            info
        };

        Self {
            length: declared,
            info,
            presentation_time,
            source_clock,
            well_formed: true,
        }
    }

    /// Number of header bytes in front of the payload data.
    pub fn header_length(&self) -> usize {
        self.length
    }

    /// Returns the payload data of `packet`, ie. everything after the header.
    pub fn payload<'a>(&self, packet: &'a [u8]) -> &'a [u8] {
        packet.get(self.length..).unwrap_or(&[])
    }

    pub fn info(&self) -> HeaderInfo {
        self.info
    }

    /// Whether the header length was plausible. Flags of a malformed header are not meaningful.
    pub fn is_well_formed(&self) -> bool {
        self.well_formed
    }

    pub fn frame_id(&self) -> bool {
        self.info.contains(HeaderInfo::FRAME_ID)
    }

    pub fn is_end_of_frame(&self) -> bool {
        self.info.contains(HeaderInfo::END_OF_FRAME)
    }

    pub fn is_still_image(&self) -> bool {
        self.info.contains(HeaderInfo::STILL_IMAGE)
    }

    pub fn has_error(&self) -> bool {
        self.info.contains(HeaderInfo::ERROR)
    }

    /// `dwPresentationTime`: the device clock when the frame was captured.
    pub fn presentation_time(&self) -> Option<u32> {
        self.presentation_time
    }

    pub fn source_clock(&self) -> Option<SourceClock> {
        self.source_clock
    }

    /// The source time clock, if the header carries a source clock reference.
    pub fn source_time_clock(&self) -> Option<u32> {
        self.source_clock.map(|scr| scr.stc)
    }

    /// The 11-bit bus frame counter, if the header carries a source clock reference.
    pub fn bus_frame_counter(&self) -> Option<u16> {
        self.source_clock.map(|scr| scr.sof)
    }
}

impl fmt::Debug for PayloadHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("PayloadHeader");
        s.field("length", &self.length).field("info", &self.info);
        if let Some(pts) = self.presentation_time {
            s.field("pts", &pts);
        }
        if let Some(scr) = self.source_clock {
            s.field("scr", &scr);
        }
        s.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_header() {
        let packet = [
            12, 0b1000_1111, // EOH, SCR, PTS, EOF, FID
            0x78, 0x56, 0x34, 0x12, // PTS
            0x01, 0x00, 0x00, 0x80, 0xFF, 0xFF, // SCR
            0xAA, 0xBB,
        ];
        let header = PayloadHeader::parse(&packet);
        assert!(!header.has_error());
        assert!(header.frame_id());
        assert!(header.is_end_of_frame());
        assert_eq!(header.header_length(), 12);
        assert_eq!(header.presentation_time(), Some(0x1234_5678));
        assert_eq!(header.source_time_clock(), Some(0x8000_0001));
        assert_eq!(header.bus_frame_counter(), Some(0x07FF));
        assert_eq!(header.payload(&packet), &[0xAA, 0xBB]);
    }

    #[test]
    fn minimal_header() {
        let packet = [2, 0b1000_0000, 1, 2, 3];
        let header = PayloadHeader::parse(&packet);
        assert!(!header.has_error());
        assert!(header.is_well_formed());
        assert!(!header.frame_id());
        assert_eq!(header.presentation_time(), None);
        assert_eq!(header.source_clock(), None);
        assert_eq!(header.payload(&packet), &[1, 2, 3]);
    }

    #[test]
    fn scr_without_pts() {
        let packet = [8, 0b0000_1000, 0x10, 0, 0, 0, 0x05, 0x08];
        let header = PayloadHeader::parse(&packet);
        assert!(!header.has_error());
        assert_eq!(header.presentation_time(), None);
        assert_eq!(header.source_time_clock(), Some(0x10));
        assert_eq!(header.bus_frame_counter(), Some(0x0005));
        assert!(header.payload(&packet).is_empty());
    }

    #[test]
    fn too_short_packet_is_an_error() {
        let header = PayloadHeader::parse(&[2]);
        assert!(header.has_error());
        assert!(!header.is_well_formed());
        assert!(!header.is_still_image());
        assert!(header.payload(&[2]).is_empty());
    }

    #[test]
    fn inconsistent_lengths_are_errors() {
        // declared length beyond the packet
        let header = PayloadHeader::parse(&[12, 0b1000_0010, 0, 0]);
        assert!(header.has_error());
        assert!(header.is_end_of_frame());
        assert!(header.payload(&[12, 0b1000_0010, 0, 0]).is_empty());

        assert!(!header.is_well_formed());

        // declared length below the fixed part
        assert!(PayloadHeader::parse(&[1, 0, 0, 0]).has_error());

        // PTS flag set, but no room for it
        let header = PayloadHeader::parse(&[2, 0b0000_0100, 0, 0, 0, 0]);
        assert!(header.has_error());
        assert!(header.is_well_formed());
        assert_eq!(header.presentation_time(), None);
        assert_eq!(header.payload(&[2, 0b0000_0100, 0, 0, 0, 0]).len(), 4);
    }
}
