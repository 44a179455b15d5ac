//! The streaming session of one UVC device.

use std::{
    collections::HashSet,
    mem,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    thread,
    time::{Duration, Instant, SystemTime},
};

use crate::{
    config::{Config, StreamPreferences},
    control::{probe_commit_len, ProbeCommitControls, ProbeHint, StreamingControls},
    detect,
    error::{err, Action},
    format::StreamType,
    payload::PayloadHeader,
    sample::{Sample, SampleLayout, SampleQueue},
    status::StatusListener,
    streaming_interface::{Stream, StreamMatch, StreamProperties, VideoStreamingInterface},
    topo::VideoControlInterface,
    transport::{
        InterfaceClaim, TransferHandler, TransferId, TransferKind, TransferSetup, TransferStatus,
        UsbTransport,
    },
    util::interval_to_frequency,
    Result,
};

/// Reusable samples created when a stream starts, in addition to the one being filled.
const PRESEEDED_SAMPLES: usize = 2;

/// Lifecycle of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No stream running.
    Idle,
    /// Format negotiated and transfers allocated, but not submitted yet.
    Allocated,
    /// Transfers are in flight.
    Streaming,
    /// Transfers are being cancelled.
    Stopping,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct StreamState {
    session: SessionState,
    /// Transfers allocated for the current stream. Completions of any other ID belong to
    /// transfers leaked by an earlier stream.
    issued: HashSet<TransferId>,
    /// Transfers the USB stack still owns.
    live: HashSet<TransferId>,
    /// The sample currently being filled.
    active: Option<Sample>,
    layout: Option<SampleLayout>,
    last_frame_id: Option<bool>,
}

impl StreamState {
    fn is_issued(&self, id: TransferId) -> bool {
        if !self.issued.contains(&id) {
            log::debug!("ignoring {:?}, it does not belong to the current stream", id);
            return false;
        }
        true
    }
}

/// State shared with the transfer completion handler.
///
/// Lock order: `state` before `samples`.
struct StreamShared {
    state: Mutex<StreamState>,
    samples: Mutex<SampleQueue>,
}

impl StreamShared {
    fn new(queue_capacity: usize) -> Self {
        Self {
            state: Mutex::new(StreamState {
                session: SessionState::Idle,
                issued: HashSet::new(),
                live: HashSet::new(),
                active: None,
                layout: None,
                last_frame_id: None,
            }),
            samples: Mutex::new(SampleQueue::new(queue_capacity)),
        }
    }

    /// Demultiplexes the packets of one transfer into samples.
    fn process_payload(&self, state: &mut StreamState, packets: &[&[u8]]) {
        let host_time = SystemTime::now();

        for packet in packets.iter().filter(|p| !p.is_empty()) {
            let header = PayloadHeader::parse(packet);
            if header.has_error() {
                log::warn!("payload header reports an error: {:?}", header);
            }

            // A toggled frame ID also ends a frame, for devices that never set end-of-frame.
            if header.is_well_formed() {
                let frame_id = header.frame_id();
                if state.last_frame_id.map_or(false, |last| last != frame_id) {
                    self.finish_sample(state);
                }
                state.last_frame_id = Some(frame_id);
            }

            let payload = header.payload(packet);
            if !payload.is_empty() {
                if let Some(sample) = state.active.as_mut() {
                    if !sample.append(&header, payload, host_time) {
                        log::warn!("dropped {} bytes of payload", payload.len());
                    }
                }
            }

            if header.is_end_of_frame() {
                self.finish_sample(state);
            }
        }
    }

    /// Queues the active sample if it holds any data, and replaces it with a fresh one.
    fn finish_sample(&self, state: &mut StreamState) {
        let layout = match &state.layout {
            Some(layout) => layout,
            None => return,
        };
        if state.active.as_ref().map_or(true, |s| s.is_empty()) {
            return;
        }

        let mut samples = lock(&self.samples);
        let next = samples.take_reusable().unwrap_or_else(|| {
            log::warn!("not enough reusable samples, allocating a new one");
            Sample::new(layout)
        });
        if let Some(done) = state.active.replace(next) {
            log::trace!("completed {:?}", done);
            samples.push(done);
        }
    }
}

impl TransferHandler for StreamShared {
    fn transfer_completed(
        &self,
        id: TransferId,
        status: TransferStatus,
        packets: &[&[u8]],
    ) -> bool {
        let mut state = lock(&self.state);
        if !state.is_issued(id) {
            return false;
        }

        match status {
            TransferStatus::Completed => {
                if state.session == SessionState::Streaming {
                    self.process_payload(&mut state, packets);
                }
            }
            TransferStatus::TimedOut | TransferStatus::Cancelled => {
                log::trace!("{:?} finished with {:?}", id, status)
            }
            TransferStatus::Stall | TransferStatus::Overflow => {
                log::warn!("{:?} finished with {:?}", id, status)
            }
            TransferStatus::Error | TransferStatus::NoDevice => {
                log::error!("{:?} finished with {:?}", id, status)
            }
        }

        let resubmit = status.is_retryable() && state.session == SessionState::Streaming;
        if !resubmit {
            state.live.remove(&id);
        }
        resubmit
    }

    fn transfer_retired(&self, id: TransferId) {
        let mut state = lock(&self.state);
        if state.is_issued(id) {
            log::error!("{:?} could not be resubmitted", id);
            state.live.remove(&id);
        }
    }
}

/// USB resources held on behalf of the device.
struct Session<T: UsbTransport> {
    control_claim: Option<T::Claim>,
    status: Option<StatusListener<T>>,
    stream_claim: Option<T::Claim>,
    /// Alternate setting selected for an isochronous stream.
    alt_setting: Option<u8>,
    transfers: Vec<T::Transfer>,
    /// Transfer IDs are never reused, so a leaked transfer cannot pass for a current one.
    next_transfer_id: u32,
}

impl<T: UsbTransport> Session<T> {
    fn allocate_transfer_id(&mut self) -> TransferId {
        let id = TransferId(self.next_transfer_id);
        // `u32::MAX` is taken by the status interrupt transfer
        self.next_transfer_id = self.next_transfer_id.wrapping_add(1) % u32::MAX;
        id
    }
}

/// A UVC camera: its parsed interfaces and, once started, a running video stream.
///
/// Completed samples are pulled with [`next_sample`](Self::next_sample) and should be handed
/// back with [`give_sample_back`](Self::give_sample_back) so their buffers can be reused.
pub struct VideoDevice<T: UsbTransport> {
    config: Config,
    control: VideoControlInterface,
    streaming: VideoStreamingInterface,
    valid: bool,
    shared: Arc<StreamShared>,
    session: Mutex<Session<T>>,
    transport: T,
}

impl<T: UsbTransport> VideoDevice<T> {
    /// Parses the device's UVC interfaces and starts listening for status interrupts.
    ///
    /// Fails only if the device has no video interfaces at all. Malformed descriptors make the
    /// device invalid instead, see [`is_valid`](Self::is_valid).
    pub fn new(transport: T, config: Config) -> Result<Self> {
        let interfaces = transport.interfaces()?;
        let (control, streaming) = detect::classify_interfaces(&interfaces)?;

        let valid = control.is_valid() && streaming.is_valid();
        if valid {
            log::debug!(
                "UVC {} device, clock {} Hz, {} stream(s)",
                control.uvc_version(),
                control.clock_frequency(),
                streaming.streams().len()
            );
        } else {
            log::warn!("device has invalid UVC descriptors");
        }

        let mut session = Session {
            control_claim: None,
            status: None,
            stream_claim: None,
            alt_setting: None,
            transfers: Vec::new(),
            next_transfer_id: 0,
        };

        if let Some(endpoint) = control.interrupt_endpoint() {
            match transport.claim_interface(control.interface_number(), config.detach_kernel_driver)
            {
                Ok(claim) => {
                    session.control_claim = Some(claim);
                    match StatusListener::start(&transport, endpoint, Duration::from_secs(0)) {
                        Ok(listener) => session.status = Some(listener),
                        Err(e) => log::warn!("not listening for status interrupts: {}", e),
                    }
                }
                Err(e) => log::warn!("failed to claim the control interface: {}", e),
            }
        }

        Ok(Self {
            shared: Arc::new(StreamShared::new(config.sample_queue_capacity)),
            config,
            control,
            streaming,
            valid,
            session: Mutex::new(session),
            transport,
        })
    }

    /// Negotiates the stream best matching `prefs` and starts streaming.
    ///
    /// If no stream passes the filters in `prefs`, the filters are dropped and the best stream
    /// overall is used.
    pub fn start(&self, prefs: &StreamPreferences) -> Result<()> {
        let mut session = lock(&self.session);

        if lock(&self.shared.state).session != SessionState::Idle {
            return err("the stream is already running", Action::StartingStream);
        }
        if !self.valid {
            return err("the device has invalid descriptors", Action::StartingStream);
        }

        let res = self.start_session(&mut session, prefs);
        if let Err(e) = &res {
            log::error!("{}", e);
            self.reset_session(&mut session);
        }
        res
    }

    fn select_stream(&self, prefs: &StreamPreferences) -> Result<StreamMatch> {
        if let Some(best) = self.streaming.find_best_matching_stream(prefs) {
            return Ok(best);
        }
        if prefs.has_filters() {
            log::info!("no stream matches {:?}, ignoring the filters", prefs);
            if let Some(best) = self
                .streaming
                .find_best_matching_stream(&StreamPreferences::default())
            {
                return Ok(best);
            }
        }
        err("the device offers no usable stream", Action::StreamNegotiation)
    }

    fn start_session(&self, session: &mut Session<T>, prefs: &StreamPreferences) -> Result<()> {
        let (interface, endpoint) = match (
            self.streaming.interface_number(),
            self.streaming.endpoint_address(),
        ) {
            (Some(interface), Some(endpoint)) => (interface, endpoint),
            _ => return err("no streaming endpoint", Action::StartingStream),
        };

        let best = self.select_stream(prefs)?;
        log::debug!("selected {:?}", best);
        let props = match self
            .streaming
            .extract_stream_properties(best.format_index, best.frame_index)
        {
            Some(props) => props,
            None => return err("selected frame disappeared", Action::StreamNegotiation),
        };

        session.stream_claim = Some(
            self.transport
                .claim_interface(interface, self.config.detach_kernel_driver)?,
        );

        let controls = StreamingControls::new(
            &self.transport,
            interface,
            probe_commit_len(self.control.uvc_version()),
            self.config.control_timeout,
        );
        let negotiated = controls.negotiate(&ProbeCommitControls {
            hint: ProbeHint::FIX_FRAME_INTERVAL,
            format_index: best.format_index,
            frame_index: best.frame_index,
            frame_interval: best.frame_interval,
            ..Default::default()
        })?;
        if negotiated.format_index != best.format_index
            || negotiated.frame_index != best.frame_index
        {
            log::warn!(
                "device negotiated format {} frame {} instead of format {} frame {}",
                negotiated.format_index,
                negotiated.frame_index,
                best.format_index,
                best.frame_index
            );
        }

        let clock_frequency = if negotiated.clock_frequency != 0 {
            negotiated.clock_frequency
        } else {
            self.control.clock_frequency()
        };
        if clock_frequency == 0 {
            return err(
                "neither the probe control nor the VC header report a clock frequency",
                Action::StreamNegotiation,
            );
        }

        let frame_size = self.frame_size(&best, &props, &negotiated);
        let layout = SampleLayout {
            capacity: frame_size,
            format_index: best.format_index,
            frame_index: best.frame_index,
            clock_frequency,
            allow_resize: props.stream_type != StreamType::Uncompressed,
            max_size: self.config.max_sample_size.max(frame_size),
        };

        let kind = self.transfer_kind(negotiated.max_payload_transfer_size as usize, frame_size)?;
        if let TransferKind::Isochronous { .. } = kind {
            let alt = self.alt_setting_for(negotiated.max_payload_transfer_size as usize)?;
            self.transport.set_alternate_setting(interface, alt.0)?;
            session.alt_setting = Some(alt.0);
        }

        let handler: Arc<dyn TransferHandler> = self.shared.clone();
        let mut ids = Vec::with_capacity(self.config.transfer_count);
        for _ in 0..self.config.transfer_count {
            let id = session.allocate_transfer_id();
            let setup = TransferSetup {
                id,
                endpoint,
                kind,
                timeout: self.config.transfer_timeout,
            };
            session
                .transfers
                .push(self.transport.allocate_transfer(&setup, handler.clone())?);
            ids.push(id);
        }

        {
            let mut state = lock(&self.shared.state);
            state.session = SessionState::Allocated;
            state.active = Some(Sample::new(&layout));
            state.layout = Some(layout.clone());
            state.last_frame_id = None;
            state.issued = ids.iter().copied().collect();
            state.live.clear();

            let mut samples = lock(&self.shared.samples);
            samples.clear();
            samples.set_layout(Some(layout.clone()));
            for _ in 0..PRESEEDED_SAMPLES {
                samples.give_back(Sample::new(&layout));
            }
        }

        {
            let mut state = lock(&self.shared.state);
            state.session = SessionState::Streaming;
            state.live.extend(ids.iter().copied());
        }

        let mut submitted = 0;
        for (id, transfer) in ids.iter().zip(&session.transfers) {
            match self.transport.submit(transfer) {
                Ok(()) => submitted += 1,
                Err(e) => {
                    log::error!("{}", e);
                    lock(&self.shared.state).live.remove(id);
                }
            }
        }
        if submitted == 0 {
            return err("no transfer could be submitted", Action::StartingStream);
        }

        log::info!(
            "streaming {} {}x{} at {:.2} Hz ({:?}, {} of {} transfers)",
            props.stream_type,
            props.width,
            props.height,
            interval_to_frequency(negotiated.frame_interval),
            kind,
            submitted,
            session.transfers.len()
        );
        Ok(())
    }

    /// The buffer size of one sample.
    fn frame_size(
        &self,
        best: &StreamMatch,
        props: &StreamProperties,
        negotiated: &ProbeCommitControls,
    ) -> usize {
        let reported = negotiated.max_video_frame_size as usize;

        let stream = self.streaming.stream_by_format_index(best.format_index);
        if let Some(Stream::Uncompressed(stream)) = stream {
            let pixels = props.width as usize * props.height as usize;
            let expected = match props.pixel_format {
                Some(pixel_format) => pixel_format.frame_size(props.width, props.height),
                None => pixels * usize::from(stream.format().bits_per_pixel()) / 8,
            };
            if expected != 0 && expected != reported {
                log::warn!(
                    "device reports a frame size of {} bytes, expected {}",
                    reported,
                    expected
                );
                return expected;
            }
        }

        if reported == 0 {
            let fallback = props.width as usize * props.height as usize * 2;
            log::warn!("device reports a frame size of 0, using {} bytes", fallback);
            return fallback;
        }
        reported
    }

    fn alt_setting_for(&self, payload_size: usize) -> Result<(u8, usize)> {
        match self.streaming.select_isochronous_setting(payload_size) {
            Some((alt, packet_size)) => {
                if packet_size < payload_size {
                    log::warn!(
                        "alternate setting {} carries {} bytes per packet, device wants {}",
                        alt,
                        packet_size,
                        payload_size
                    );
                }
                Ok((alt, packet_size))
            }
            None => err(
                "no alternate setting has an isochronous streaming endpoint",
                Action::SelectingAlternateSetting,
            ),
        }
    }

    fn transfer_kind(&self, payload_size: usize, frame_size: usize) -> Result<TransferKind> {
        if self.streaming.alternate_settings().len() > 1 {
            let (_, packet_size) = self.alt_setting_for(payload_size)?;
            let packets = (frame_size + packet_size - 1) / packet_size;
            let packets = packets.max(1).min(self.config.max_packets_per_transfer.max(1));
            return Ok(TransferKind::Isochronous {
                packets,
                packet_size,
            });
        }

        let buffer_size = if payload_size != 0 {
            payload_size
        } else {
            frame_size
        };
        Ok(TransferKind::Bulk { buffer_size })
    }

    /// Stops the stream, waiting for all transfers to finish.
    ///
    /// Fails if the transfers did not finish within [`Config::stop_timeout`]. They are leaked in
    /// that case, and the device is idle anyway.
    pub fn stop(&self) -> Result<()> {
        let mut session = lock(&self.session);
        self.stop_session(&mut session)
    }

    fn stop_session(&self, session: &mut Session<T>) -> Result<()> {
        {
            let mut state = lock(&self.shared.state);
            if state.session == SessionState::Idle {
                return Ok(());
            }
            state.session = SessionState::Stopping;
        }

        for transfer in &session.transfers {
            if let Err(e) = self.transport.cancel(transfer) {
                log::debug!("{}", e);
            }
        }

        let deadline = Instant::now() + self.config.stop_timeout;
        let remaining = loop {
            let live = lock(&self.shared.state).live.len();
            if live == 0 || Instant::now() >= deadline {
                break live;
            }
            thread::sleep(Duration::from_millis(1));
        };

        let transfers = mem::take(&mut session.transfers);
        if remaining != 0 {
            log::error!(
                "{} transfer(s) did not finish within {:?}, leaking them",
                remaining,
                self.config.stop_timeout
            );
            mem::forget(transfers);
        } else {
            drop(transfers);
        }

        self.reset_session(session);

        if remaining != 0 {
            return err(
                format!("{} transfer(s) did not finish", remaining),
                Action::StoppingStream,
            );
        }
        log::debug!("stream stopped");
        Ok(())
    }

    /// Releases the streaming interface and returns to `Idle`. No transfer may be live.
    fn reset_session(&self, session: &mut Session<T>) {
        session.transfers.clear();

        if let (Some(claim), Some(_)) = (&session.stream_claim, session.alt_setting.take()) {
            if let Err(e) = self
                .transport
                .set_alternate_setting(claim.interface_number(), 0)
            {
                log::warn!("failed to select alternate setting 0: {}", e);
            }
        }
        session.stream_claim = None;

        let mut state = lock(&self.shared.state);
        state.session = SessionState::Idle;
        state.issued.clear();
        state.live.clear();
        state.active = None;
        state.layout = None;
        state.last_frame_id = None;
        let mut samples = lock(&self.shared.samples);
        samples.clear();
        samples.set_layout(None);
    }

    /// Takes the oldest completed sample, along with the number of samples still queued.
    pub fn next_sample(&self) -> Option<(Sample, usize)> {
        lock(&self.shared.samples).pop()
    }

    /// Returns a sample obtained from [`next_sample`](Self::next_sample) for reuse.
    pub fn give_sample_back(&self, sample: Sample) {
        lock(&self.shared.samples).recycle(sample);
    }

    /// Looks up width, height and format of a (format, frame) combination.
    pub fn extract_stream_properties(
        &self,
        format_index: u8,
        frame_index: u8,
    ) -> Option<StreamProperties> {
        self.streaming
            .extract_stream_properties(format_index, frame_index)
    }

    pub fn state(&self) -> SessionState {
        lock(&self.shared.state).session
    }

    pub fn is_started(&self) -> bool {
        self.state() == SessionState::Streaming
    }

    /// Whether the device's UVC descriptors could be parsed.
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn control_interface(&self) -> &VideoControlInterface {
        &self.control
    }

    pub fn streaming_interface(&self) -> &VideoStreamingInterface {
        &self.streaming
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }
}

impl<T: UsbTransport> Drop for VideoDevice<T> {
    fn drop(&mut self) {
        let mut session = lock(&self.session);
        if let Err(e) = self.stop_session(&mut session) {
            log::error!("{}", e);
        }
        if let Some(mut status) = session.status.take() {
            status.shutdown(&self.transport, self.config.stop_timeout);
        }
        session.control_claim = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        descriptor::{CS_INTERFACE, VS_FRAME_MJPEG},
        format::parse::tests::{input_header, mjpeg_format, video_frame},
        transport::{mock::MockTransport, EndpointInfo, InterfaceInfo, TransferType},
    };

    fn streaming_shared(layout: &SampleLayout) -> StreamShared {
        let shared = StreamShared::new(10);
        {
            let mut state = lock(&shared.state);
            state.session = SessionState::Streaming;
            state.active = Some(Sample::new(layout));
            state.layout = Some(layout.clone());
            state.issued.insert(TransferId(0));
            state.live.insert(TransferId(0));
        }
        shared
    }

    fn layout() -> SampleLayout {
        SampleLayout {
            capacity: 64,
            format_index: 1,
            frame_index: 1,
            clock_frequency: 1_000_000,
            allow_resize: false,
            max_size: 64,
        }
    }

    fn packet(fid: bool, eof: bool, data: &[u8]) -> Vec<u8> {
        let mut raw = vec![2, 0x80 | fid as u8 | (eof as u8) << 1];
        raw.extend_from_slice(data);
        raw
    }

    fn complete(shared: &StreamShared, packets: &[Vec<u8>]) -> bool {
        let packets = packets.iter().map(|p| p.as_slice()).collect::<Vec<_>>();
        shared.transfer_completed(TransferId(0), TransferStatus::Completed, &packets)
    }

    fn queued(shared: &StreamShared) -> Vec<Vec<u8>> {
        let mut samples = lock(&shared.samples);
        let mut out = Vec::new();
        while let Some((sample, _)) = samples.pop() {
            out.push(sample.data().to_vec());
        }
        out
    }

    #[test]
    fn end_of_frame_completes_sample() {
        let shared = streaming_shared(&layout());
        assert!(complete(
            &shared,
            &[packet(false, false, &[1, 2]), packet(false, true, &[3])]
        ));
        assert!(complete(&shared, &[packet(true, true, &[4])]));
        assert_eq!(queued(&shared), vec![vec![1, 2, 3], vec![4]]);
    }

    #[test]
    fn frame_id_toggle_completes_sample() {
        let shared = streaming_shared(&layout());
        assert!(complete(
            &shared,
            &[
                packet(false, false, &[1]),
                packet(true, false, &[2]),
                packet(false, false, &[3]),
            ]
        ));
        assert_eq!(queued(&shared), vec![vec![1], vec![2]]);
    }

    #[test]
    fn header_only_packet_ends_frame() {
        let shared = streaming_shared(&layout());
        assert!(complete(
            &shared,
            &[packet(false, false, &[1]), packet(false, true, &[])]
        ));
        // nothing to deliver: an empty sample is never queued
        assert!(complete(&shared, &[packet(false, true, &[]), Vec::new()]));
        assert_eq!(queued(&shared), vec![vec![1]]);
    }

    #[test]
    fn empty_pool_allocates_new_samples() {
        let shared = streaming_shared(&layout());
        for i in 0..3 {
            assert!(complete(&shared, &[packet(i % 2 == 1, true, &[i])]));
        }
        assert_eq!(queued(&shared).len(), 3);
    }

    #[test]
    fn terminal_statuses_retire_transfers() {
        let shared = streaming_shared(&layout());
        assert!(shared.transfer_completed(TransferId(0), TransferStatus::TimedOut, &[]));
        assert!(shared.transfer_completed(TransferId(0), TransferStatus::Stall, &[]));
        assert!(!shared.transfer_completed(TransferId(0), TransferStatus::NoDevice, &[]));
        assert!(lock(&shared.state).live.is_empty());
    }

    #[test]
    fn stopping_session_does_not_resubmit() {
        let shared = streaming_shared(&layout());
        lock(&shared.state).session = SessionState::Stopping;
        assert!(!complete(&shared, &[packet(false, true, &[1])]));
        assert!(lock(&shared.state).live.is_empty());
        assert!(queued(&shared).is_empty());
    }

    #[test]
    fn foreign_transfer_ids_are_ignored() {
        let shared = streaming_shared(&layout());
        let data = packet(false, true, &[1]);
        assert!(!shared.transfer_completed(TransferId(7), TransferStatus::Completed, &[&data]));
        shared.transfer_retired(TransferId(7));
        assert!(queued(&shared).is_empty());
        assert!(lock(&shared.state).live.contains(&TransferId(0)));
    }

    #[test]
    fn failed_resubmission_retires_transfer() {
        let shared = streaming_shared(&layout());
        shared.transfer_retired(TransferId(0));
        assert!(lock(&shared.state).live.is_empty());
    }

    #[test]
    fn overflowing_sample_is_delivered_flagged() {
        let shared = streaming_shared(&layout());
        assert!(complete(
            &shared,
            &[packet(false, false, &[0; 60]), packet(false, true, &[1; 10])]
        ));
        let (sample, _) = lock(&shared.samples).pop().unwrap();
        assert_eq!(sample.len(), 60);
        assert!(sample.may_contain_error());
    }

    fn interface(
        number: u8,
        alt_setting: u8,
        subclass: u8,
        extra: Vec<u8>,
        endpoints: Vec<EndpointInfo>,
    ) -> InterfaceInfo {
        InterfaceInfo {
            number,
            alt_setting,
            class: 0x0E,
            subclass,
            protocol: 0,
            extra,
            endpoints,
        }
    }

    fn iso_camera() -> MockTransport {
        let mut vc = vec![13, CS_INTERFACE, 1, 0x10, 0x01, 13, 0];
        vc.extend_from_slice(&6_000_000u32.to_le_bytes());
        vc.extend_from_slice(&[1, 1]);

        let mut vs = input_header(0x81, 1);
        vs.extend(mjpeg_format(1, 1));
        vs.extend(video_frame(VS_FRAME_MJPEG, 1, 640, 480, &[333_333]));

        let endpoint = EndpointInfo {
            address: 0x81,
            transfer_type: TransferType::Isochronous,
            max_packet_size: 0x0400,
            interval: 1,
        };
        MockTransport::new(vec![
            interface(0, 0, 1, vc, Vec::new()),
            interface(1, 0, 2, vs, Vec::new()),
            interface(1, 1, 2, Vec::new(), vec![endpoint]),
        ])
    }

    #[test]
    fn start_and_stop_manage_interface_state() {
        let transport = iso_camera();
        let reply = ProbeCommitControls {
            format_index: 1,
            frame_index: 1,
            frame_interval: 333_333,
            max_video_frame_size: 8192,
            max_payload_transfer_size: 1024,
            ..Default::default()
        };
        transport.set_probe_reply(reply.encode(34));
        let config = Config {
            transfer_count: 2,
            ..Default::default()
        };

        let device = VideoDevice::new(transport, config).unwrap();
        device.start(&StreamPreferences::default()).unwrap();
        let transport = device.transport();
        assert_eq!(transport.claimed(), vec![1]);
        assert_eq!(transport.alt_settings(), vec![(1, 1)]);
        let setups = transport.transfer_setups();
        assert_eq!(setups.len(), 2);
        assert_eq!(
            setups[0].kind,
            TransferKind::Isochronous {
                packets: 8,
                packet_size: 1024,
            }
        );
        assert_eq!(transport.in_flight().len(), 2);

        device.stop().unwrap();
        let transport = device.transport();
        assert!(transport.claimed().is_empty());
        assert_eq!(transport.alt_settings(), vec![(1, 1), (1, 0)]);
        assert!(transport.in_flight().is_empty());
        assert_eq!(device.state(), SessionState::Idle);
    }
}
