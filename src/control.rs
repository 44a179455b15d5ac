//! Video Streaming interface controls: the probe/commit record and the requests that carry it.

use std::{fmt, time::Duration};

use bitflags::bitflags;
use byteorder::{ByteOrder, LE};

use crate::{
    error::{err, Action, ResultExt},
    transport::UsbTransport,
    util::{interval_to_frequency, BcdVersion, DescReader},
    Result,
};

/// Size of the probe/commit record of UVC 1.1 and later.
pub const PROBE_COMMIT_LEN: usize = 34;

/// Size of the probe/commit record of UVC 1.0.
pub const PROBE_COMMIT_LEN_UVC10: usize = 26;

/// Returns the probe/commit record size a device implementing `uvc_version` expects.
pub fn probe_commit_len(uvc_version: BcdVersion) -> usize {
    if uvc_version.raw() < 0x0110 {
        PROBE_COMMIT_LEN_UVC10
    } else {
        PROBE_COMMIT_LEN
    }
}

/// Class-specific request codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(dead_code)]
pub(crate) enum Request {
    SetCur = 0x01,
    GetCur = 0x81,
    GetMin = 0x82,
    GetMax = 0x83,
    GetRes = 0x84,
    GetLen = 0x85,
    GetInfo = 0x86,
    GetDef = 0x87,
}

/// Video Streaming interface control selectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ControlId {
    Probe = 0x01,
    Commit = 0x02,
}

bitflags! {
    /// `bmHint`: which fields the device has to keep fixed while negotiating.
    #[derive(Default)]
    pub struct ProbeHint: u16 {
        const FIX_FRAME_INTERVAL = 1 << 0;
        const FIX_KEY_FRAME_RATE = 1 << 1;
        const FIX_P_FRAME_RATE = 1 << 2;
        const FIX_COMP_QUALITY = 1 << 3;
        const FIX_COMP_WINDOW_SIZE = 1 << 4;
    }
}

/// The video probe and commit control record.
///
/// Fields past offset 26 only exist in the UVC 1.1+ layout. When talking to a UVC 1.0 device
/// they are neither sent nor received and stay 0.
#[derive(Default, Clone, Copy, PartialEq, Eq)]
pub struct ProbeCommitControls {
    pub hint: ProbeHint,
    pub format_index: u8,
    pub frame_index: u8,
    /// Frame interval in 100 ns units.
    pub frame_interval: u32,
    pub key_frame_rate: u16,
    pub p_frame_rate: u16,
    pub comp_quality: u16,
    pub comp_window_size: u16,
    pub delay: u16,
    pub max_video_frame_size: u32,
    pub max_payload_transfer_size: u32,
    pub clock_frequency: u32,
    pub framing_info: u8,
    pub preferred_version: u8,
    pub min_version: u8,
    pub max_version: u8,
}

impl ProbeCommitControls {
    /// Decodes a record of either layout. Missing trailing fields decode as 0.
    pub fn decode(raw: &[u8]) -> Self {
        let mut r = DescReader::new(raw);
        Self {
            hint: ProbeHint::from_bits_truncate(r.u16()),
            format_index: r.u8(),
            frame_index: r.u8(),
            frame_interval: r.u32(),
            key_frame_rate: r.u16(),
            p_frame_rate: r.u16(),
            comp_quality: r.u16(),
            comp_window_size: r.u16(),
            delay: r.u16(),
            max_video_frame_size: r.u32(),
            max_payload_transfer_size: r.u32(),
            clock_frequency: r.u32(),
            framing_info: r.u8(),
            preferred_version: r.u8(),
            min_version: r.u8(),
            max_version: r.u8(),
        }
    }

    /// Encodes the record, truncated to `len` bytes (26 or 34).
    pub fn encode(&self, len: usize) -> Vec<u8> {
        let mut buf = [0; PROBE_COMMIT_LEN];
        LE::write_u16(&mut buf[0..], self.hint.bits());
        buf[2] = self.format_index;
        buf[3] = self.frame_index;
        LE::write_u32(&mut buf[4..], self.frame_interval);
        LE::write_u16(&mut buf[8..], self.key_frame_rate);
        LE::write_u16(&mut buf[10..], self.p_frame_rate);
        LE::write_u16(&mut buf[12..], self.comp_quality);
        LE::write_u16(&mut buf[14..], self.comp_window_size);
        LE::write_u16(&mut buf[16..], self.delay);
        LE::write_u32(&mut buf[18..], self.max_video_frame_size);
        LE::write_u32(&mut buf[22..], self.max_payload_transfer_size);
        LE::write_u32(&mut buf[26..], self.clock_frequency);
        buf[30] = self.framing_info;
        buf[31] = self.preferred_version;
        buf[32] = self.min_version;
        buf[33] = self.max_version;

        let mut encoded = buf.to_vec();
        encoded.resize(len, 0);
        encoded
    }
}

impl fmt::Debug for ProbeCommitControls {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProbeCommitControls")
            .field("hint", &self.hint)
            .field("format_index", &self.format_index)
            .field("frame_index", &self.frame_index)
            .field(
                "frame_rate",
                &format_args!("{:.2} Hz", interval_to_frequency(self.frame_interval)),
            )
            .field("delay", &self.delay)
            .field("max_video_frame_size", &self.max_video_frame_size)
            .field("max_payload_transfer_size", &self.max_payload_transfer_size)
            .field("clock_frequency", &self.clock_frequency)
            .finish()
    }
}

/// Probe/commit requests on one Video Streaming interface.
pub(crate) struct StreamingControls<'a, T> {
    transport: &'a T,
    interface: u8,
    len: usize,
    timeout: Duration,
}

impl<'a, T: UsbTransport> StreamingControls<'a, T> {
    pub(crate) fn new(transport: &'a T, interface: u8, len: usize, timeout: Duration) -> Self {
        Self {
            transport,
            interface,
            len,
            timeout,
        }
    }

    fn with_retry<R>(&self, mut cb: impl FnMut() -> Result<R>) -> Result<R> {
        // Some devices time out on one of the first requests after the interface was claimed.
        match cb() {
            Err(e) if e.is_usb_timeout() => {
                log::warn!("USB timeout, retrying request");
                cb()
            }
            other => other,
        }
    }

    pub(crate) fn set(&self, control: ControlId, value: &ProbeCommitControls) -> Result<()> {
        const SET_REQ: u8 = 0b00100001;

        let data = value.encode(self.len);
        let written = self.with_retry(|| {
            self.transport
                .control_out(
                    SET_REQ,
                    Request::SetCur as u8,
                    (control as u16) << 8,
                    u16::from(self.interface),
                    &data,
                    self.timeout,
                )
                .during(Action::WritingControl)
        })?;

        if written != self.len {
            return err(
                format!(
                    "SET_CUR({:?}) wrote {} of {} bytes",
                    control, written, self.len
                ),
                Action::WritingControl,
            );
        }
        Ok(())
    }

    pub(crate) fn get(&self, request: Request, control: ControlId) -> Result<ProbeCommitControls> {
        const GET_REQ: u8 = 0b10100001;

        let mut buf = vec![0; self.len];
        let read = self.with_retry(|| {
            self.transport
                .control_in(
                    GET_REQ,
                    request as u8,
                    (control as u16) << 8,
                    u16::from(self.interface),
                    &mut buf,
                    self.timeout,
                )
                .during(Action::ReadingControl)
        })?;

        if read != self.len {
            return err(
                format!(
                    "{:?}({:?}) returned {} of {} bytes",
                    request, control, read, self.len
                ),
                Action::ReadingControl,
            );
        }
        Ok(ProbeCommitControls::decode(&buf))
    }

    /// Commits `wanted` and reads back the parameters the device settled on.
    pub(crate) fn negotiate(&self, wanted: &ProbeCommitControls) -> Result<ProbeCommitControls> {
        log::debug!("committing {:?}", wanted);
        self.set(ControlId::Commit, wanted)
            .during(Action::StreamNegotiation)?;
        let actual = self
            .get(Request::GetCur, ControlId::Probe)
            .during(Action::StreamNegotiation)?;
        log::debug!("device reports {:?}", actual);

        match self.get(Request::GetMax, ControlId::Probe) {
            Ok(max) => log::debug!("probe maximum: {:?}", max),
            Err(e) => log::debug!("GET_MAX(PROBE) failed: {}", e),
        }

        Ok(actual)
    }
}
