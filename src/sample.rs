//! Reassembly of payloads into samples, and the queue that hands them to the consumer.

use std::{
    collections::VecDeque,
    fmt,
    time::{Duration, SystemTime},
};

use crate::payload::PayloadHeader;

const WRAP: u64 = 1 << 32;
const MAX_TIME_DIFFERENCE: u64 = 1 << 31;
const MIN_GROWTH: usize = 10 * 1024;

/// Which of two readings [`unwrap_timestamps`] moved past 2^32.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unwrapped {
    First,
    Second,
}

/// Unwraps two readings of a 32-bit device clock that are known to be close together.
///
/// If the readings are more than 2^31 apart, the lower one is assumed to have wrapped around and
/// 2^32 is added to it.
pub fn unwrap_timestamps(a: &mut u64, b: &mut u64) -> Option<Unwrapped> {
    if *a < *b {
        if *b - *a > MAX_TIME_DIFFERENCE {
            *a += WRAP;
            return Some(Unwrapped::First);
        }
    } else if *a - *b > MAX_TIME_DIFFERENCE {
        *b += WRAP;
        return Some(Unwrapped::Second);
    }
    None
}

/// Returns the earlier of two 32-bit device clock readings, accounting for wraparound.
pub fn earlier_timestamp(a: u64, b: u64) -> u64 {
    let (low, high) = if a < b { (a, b) } else { (b, a) };
    if high - low > MAX_TIME_DIFFERENCE {
        // `low` wrapped, so it is the later reading
        high
    } else {
        low
    }
}

/// Shifts `host` back by `ticks` device clock ticks.
fn back_project(host: SystemTime, ticks: i64, clock_frequency: u32) -> Option<SystemTime> {
    let nanos = i128::from(ticks) * 1_000_000_000 / i128::from(clock_frequency);
    let shift = Duration::from_nanos(nanos.unsigned_abs().min(u128::from(u64::MAX)) as u64);
    if nanos >= 0 {
        host.checked_sub(shift)
    } else {
        host.checked_add(shift)
    }
}

fn midpoint(a: SystemTime, b: SystemTime) -> SystemTime {
    match b.duration_since(a) {
        Ok(diff) => a + diff / 2,
        Err(e) => b + e.duration() / 2,
    }
}

/// What every sample of one stream session looks like.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleLayout {
    /// Initial buffer size.
    pub capacity: usize,
    pub format_index: u8,
    pub frame_index: u8,
    /// Device clock frequency in Hz.
    pub clock_frequency: u32,
    /// Whether the buffer may grow when a sample exceeds `capacity` (compressed streams).
    pub allow_resize: bool,
    /// Size a growing buffer is never allowed to exceed.
    pub max_size: usize,
}

/// One reassembled video frame.
///
/// The buffer is allocated once, zero-filled to its capacity, and reused across frames.
pub struct Sample {
    buffer: Vec<u8>,
    position: usize,
    may_contain_error: bool,
    capture_device_time: Option<u64>,
    payload_device_times: [u64; 2],
    payload_host_times: [SystemTime; 2],
    next_device_time_index: usize,
    allow_resize: bool,
    max_size: usize,
    format_index: u8,
    frame_index: u8,
    clock_frequency: u32,
}

impl Sample {
    pub fn new(layout: &SampleLayout) -> Self {
        Self {
            buffer: vec![0; layout.capacity],
            position: 0,
            may_contain_error: false,
            capture_device_time: None,
            payload_device_times: [0; 2],
            payload_host_times: [SystemTime::UNIX_EPOCH; 2],
            next_device_time_index: 0,
            allow_resize: layout.allow_resize,
            max_size: layout.max_size,
            format_index: layout.format_index,
            frame_index: layout.frame_index,
            clock_frequency: layout.clock_frequency,
        }
    }

    /// Whether this sample was created for `layout`.
    pub fn matches(&self, layout: &SampleLayout) -> bool {
        self.format_index == layout.format_index
            && self.frame_index == layout.frame_index
            && self.clock_frequency == layout.clock_frequency
            && self.allow_resize == layout.allow_resize
    }

    /// Appends the payload data of one packet.
    ///
    /// Records the packet's clock information, using `host_time` as the host-side arrival time
    /// of the packet. Returns `false` (and flags the sample as possibly erroneous) if the data
    /// does not fit; the existing content and timestamps are left untouched in that case.
    pub fn append(&mut self, header: &PayloadHeader, data: &[u8], host_time: SystemTime) -> bool {
        if header.has_error() {
            self.may_contain_error = true;
        }

        let needed = self.position + data.len();
        if needed > self.buffer.len() {
            if !self.allow_resize {
                log::warn!(
                    "refusing to grow sample buffer from {} to {} bytes",
                    self.buffer.len(),
                    needed
                );
                self.may_contain_error = true;
                return false;
            }

            let grown = (self.buffer.len() + data.len().max(MIN_GROWTH)).min(self.max_size);
            if needed > grown {
                log::error!(
                    "sample of {} bytes exceeds the maximum of {} bytes",
                    needed,
                    self.max_size
                );
                self.may_contain_error = true;
                return false;
            }

            self.buffer.resize(grown, 0);
            log::debug!("grew sample buffer to {} bytes", grown);
        }

        if let Some(stc) = header.source_time_clock() {
            let index = self.next_device_time_index;
            if index == 0 || (header.is_end_of_frame() && index < 2) {
                self.payload_device_times[index] = u64::from(stc);
                self.payload_host_times[index] = host_time;
                self.next_device_time_index += 1;
            }
        }

        if let Some(pts) = header.presentation_time() {
            let pts = u64::from(pts);
            self.capture_device_time = Some(match self.capture_device_time {
                None => pts,
                Some(current) if current == pts => current,
                // Some devices set the PTS bit but send 0 until the real value is known.
                Some(0) => pts,
                Some(current) if pts == 0 => current,
                Some(current) => earlier_timestamp(current, pts),
            });
        }

        self.buffer[self.position..needed].copy_from_slice(data);
        self.position = needed;
        true
    }

    /// Host time at which the frame was captured, reconstructed from the device clock readings.
    ///
    /// Returns `None` if the device did not send both a presentation time and a source clock
    /// reference.
    pub fn capture_timestamp(&self) -> Option<SystemTime> {
        let mut capture = self.capture_device_time?;
        if self.clock_frequency == 0 {
            return None;
        }

        match self.next_device_time_index {
            0 => None,
            1 => {
                let mut payload = self.payload_device_times[0];
                unwrap_timestamps(&mut capture, &mut payload);
                let delay = payload as i64 - capture as i64;
                back_project(self.payload_host_times[0], delay, self.clock_frequency)
            }
            _ => {
                let mut first = self.payload_device_times[0];
                let mut last = self.payload_device_times[1];
                unwrap_timestamps(&mut first, &mut last);
                if unwrap_timestamps(&mut capture, &mut first) == Some(Unwrapped::Second) {
                    last += WRAP;
                }

                let host_first = back_project(
                    self.payload_host_times[0],
                    first as i64 - capture as i64,
                    self.clock_frequency,
                )?;
                let host_last = back_project(
                    self.payload_host_times[1],
                    last as i64 - capture as i64,
                    self.clock_frequency,
                )?;
                Some(midpoint(host_first, host_last))
            }
        }
    }

    /// Clears everything but the buffer allocation.
    pub fn reset(&mut self) {
        self.position = 0;
        self.may_contain_error = false;
        self.capture_device_time = None;
        self.payload_device_times = [0; 2];
        self.payload_host_times = [SystemTime::UNIX_EPOCH; 2];
        self.next_device_time_index = 0;
    }

    /// The bytes received so far.
    pub fn data(&self) -> &[u8] {
        &self.buffer[..self.position]
    }

    pub fn len(&self) -> usize {
        self.position
    }

    pub fn is_empty(&self) -> bool {
        self.position == 0
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Whether a payload of this sample was flagged as erroneous or did not fit.
    pub fn may_contain_error(&self) -> bool {
        self.may_contain_error
    }

    pub fn format_index(&self) -> u8 {
        self.format_index
    }

    pub fn frame_index(&self) -> u8 {
        self.frame_index
    }

    pub fn clock_frequency(&self) -> u32 {
        self.clock_frequency
    }

    /// Presentation time in device clock ticks, if the device sent one.
    pub fn capture_device_time(&self) -> Option<u64> {
        self.capture_device_time
    }

    /// Source clock readings with the host times they were received at.
    pub fn payload_device_times(&self) -> impl Iterator<Item = (u64, SystemTime)> + '_ {
        self.payload_device_times
            .iter()
            .copied()
            .zip(self.payload_host_times.iter().copied())
            .take(self.next_device_time_index)
    }
}

impl fmt::Debug for Sample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sample")
            .field("format_index", &self.format_index)
            .field("frame_index", &self.frame_index)
            .field("len", &self.position)
            .field("capacity", &self.buffer.len())
            .field("may_contain_error", &self.may_contain_error)
            .field("capture_device_time", &self.capture_device_time)
            .field(
                "payload_device_times",
                &self.payload_device_times().collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Completed samples waiting for the consumer, and returned samples waiting for reuse.
#[derive(Debug)]
pub struct SampleQueue {
    queue: VecDeque<Sample>,
    reusable: Vec<Sample>,
    capacity: usize,
    /// Layout of the running stream. Only samples of this layout are reused.
    layout: Option<SampleLayout>,
}

impl SampleQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: VecDeque::with_capacity(capacity),
            reusable: Vec::new(),
            capacity: capacity.max(1),
            layout: None,
        }
    }

    /// Queues a completed sample. When the queue is full, the oldest sample is recycled.
    pub fn push(&mut self, sample: Sample) {
        while self.queue.len() >= self.capacity {
            if let Some(oldest) = self.queue.pop_front() {
                log::debug!("dropping queued sample");
                self.give_back(oldest);
            }
        }
        self.queue.push_back(sample);
    }

    /// Takes the oldest completed sample, along with the number of samples still queued.
    pub fn pop(&mut self) -> Option<(Sample, usize)> {
        let sample = self.queue.pop_front()?;
        Some((sample, self.queue.len()))
    }

    /// Resets `sample` and keeps it for reuse.
    pub fn give_back(&mut self, mut sample: Sample) {
        sample.reset();
        self.reusable.push(sample);
    }

    pub fn set_layout(&mut self, layout: Option<SampleLayout>) {
        self.layout = layout;
    }

    /// Keeps `sample` for reuse if it belongs to the running stream, and drops it otherwise.
    pub fn recycle(&mut self, sample: Sample) {
        match &self.layout {
            Some(layout) if sample.matches(layout) => self.give_back(sample),
            _ => log::trace!("dropping sample of a previous stream"),
        }
    }

    pub fn take_reusable(&mut self) -> Option<Sample> {
        self.reusable.pop()
    }

    /// Number of queued samples.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn reusable_len(&self) -> usize {
        self.reusable.len()
    }

    /// Drops all queued and reusable samples.
    pub fn clear(&mut self) {
        self.queue.clear();
        self.reusable.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FREQ: u32 = 1_000_000;

    fn layout(capacity: usize, allow_resize: bool) -> SampleLayout {
        SampleLayout {
            capacity,
            format_index: 1,
            frame_index: 2,
            clock_frequency: FREQ,
            allow_resize,
            max_size: 64 * 1024,
        }
    }

    /// Builds a header with the given flags and optional PTS/SCR.
    fn header(eof: bool, pts: Option<u32>, scr: Option<u32>) -> PayloadHeader {
        let mut raw = vec![2, 0x80];
        if eof {
            raw[1] |= 0x02;
        }
        if let Some(pts) = pts {
            raw[1] |= 0x04;
            raw.extend_from_slice(&pts.to_le_bytes());
        }
        if let Some(scr) = scr {
            raw[1] |= 0x08;
            raw.extend_from_slice(&scr.to_le_bytes());
            raw.extend_from_slice(&[0, 0]);
        }
        raw[0] = raw.len() as u8;
        PayloadHeader::parse(&raw)
    }

    fn at(secs: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(secs)
    }

    #[test]
    fn unwrap_across_wraparound() {
        let mut capture = 0xFFFF_FFF0;
        let mut payload = 0x0000_0010;
        assert_eq!(
            unwrap_timestamps(&mut capture, &mut payload),
            Some(Unwrapped::Second)
        );
        assert_eq!(payload - capture, 0x20);

        let mut a = 100;
        let mut b = 200;
        assert_eq!(unwrap_timestamps(&mut a, &mut b), None);
        assert_eq!((a, b), (100, 200));

        let mut a = 0x10;
        let mut b = 0xFFFF_FF00;
        assert_eq!(unwrap_timestamps(&mut a, &mut b), Some(Unwrapped::First));
        assert_eq!(a, 0x1_0000_0010);
    }

    #[test]
    fn earlier_of_two_readings() {
        assert_eq!(earlier_timestamp(10, 20), 10);
        assert_eq!(earlier_timestamp(20, 10), 10);
        assert_eq!(earlier_timestamp(0xFFFF_FFF0, 0x10), 0xFFFF_FFF0);
        assert_eq!(earlier_timestamp(0x10, 0xFFFF_FFF0), 0xFFFF_FFF0);
    }

    #[test]
    fn wrapped_payload_delay_is_small() {
        let mut sample = Sample::new(&layout(16, false));
        assert!(sample.append(&header(false, Some(0xFFFF_FFF0), Some(0x10)), &[1], at(100)));
        // 0x20 ticks at 1 MHz is 32 µs
        let capture = sample.capture_timestamp().unwrap();
        assert_eq!(at(100).duration_since(capture).unwrap(), Duration::from_micros(32));
    }

    #[test]
    fn two_readings_are_averaged() {
        let mut sample = Sample::new(&layout(16, false));
        assert!(sample.append(&header(false, Some(1_000_000), Some(1_010_000)), &[1], at(100)));
        // an SCR in the middle of the frame is ignored
        assert!(sample.append(&header(false, None, Some(1_015_000)), &[2], at(100)));
        assert!(sample.append(&header(true, None, Some(1_030_000)), &[3], at(101)));
        assert_eq!(sample.payload_device_times().count(), 2);

        // first pair projects to 100 s - 10 ms, last pair to 101 s - 30 ms
        let capture = sample.capture_timestamp().unwrap();
        let expected = at(100) + Duration::from_millis(480);
        let diff = match capture.duration_since(expected) {
            Ok(d) => d,
            Err(e) => e.duration(),
        };
        assert!(diff < Duration::from_micros(1), "{:?}", diff);
    }

    #[test]
    fn two_readings_across_wraparound() {
        let mut sample = Sample::new(&layout(16, false));
        assert!(sample.append(&header(false, Some(0xFFFF_FF00), Some(0x100)), &[1], at(50)));
        assert!(sample.append(&header(true, None, Some(0x200)), &[2], at(50)));
        // 0x200 and 0x300 ticks after capture
        let capture = sample.capture_timestamp().unwrap();
        let delay = at(50).duration_since(capture).unwrap();
        assert_eq!(delay, Duration::from_nanos(640_000));
    }

    #[test]
    fn no_clock_information() {
        let mut sample = Sample::new(&layout(16, false));
        assert!(sample.append(&header(true, None, None), &[1], at(1)));
        assert_eq!(sample.capture_timestamp(), None);

        let mut sample = Sample::new(&layout(16, false));
        assert!(sample.append(&header(true, None, Some(5)), &[1], at(1)));
        assert_eq!(sample.capture_timestamp(), None);
    }

    #[test]
    fn zero_presentation_time_heuristic() {
        let mut sample = Sample::new(&layout(16, false));
        assert!(sample.append(&header(false, Some(0), None), &[], at(1)));
        assert_eq!(sample.capture_device_time(), Some(0));
        assert!(sample.append(&header(false, Some(500), None), &[], at(1)));
        assert_eq!(sample.capture_device_time(), Some(500));
        assert!(sample.append(&header(false, Some(0), None), &[], at(1)));
        assert_eq!(sample.capture_device_time(), Some(500));
        assert!(sample.append(&header(false, Some(400), None), &[], at(1)));
        assert_eq!(sample.capture_device_time(), Some(400));
        assert!(sample.append(&header(false, Some(450), None), &[], at(1)));
        assert_eq!(sample.capture_device_time(), Some(400));
    }

    #[test]
    fn overflow_without_resize() {
        let mut sample = Sample::new(&layout(4, false));
        assert!(sample.append(&header(false, None, None), &[1, 2, 3], at(1)));
        assert!(!sample.append(&header(false, None, None), &[4, 5], at(1)));
        assert_eq!(sample.data(), &[1, 2, 3]);
        assert_eq!(sample.capacity(), 4);
        assert!(sample.may_contain_error());
    }

    #[test]
    fn rejected_append_keeps_timestamps() {
        let mut sample = Sample::new(&layout(4, false));
        assert!(sample.append(&header(false, Some(300), Some(100)), &[1, 2], at(1)));
        assert!(!sample.append(&header(true, Some(200), Some(900)), &[3; 8], at(2)));
        assert_eq!(sample.capture_device_time(), Some(300));
        let times = sample.payload_device_times().collect::<Vec<_>>();
        assert_eq!(times, vec![(100, at(1))]);
    }

    #[test]
    fn overflow_with_resize() {
        let mut sample = Sample::new(&layout(4, true));
        assert!(sample.append(&header(false, None, None), &[1, 2, 3], at(1)));
        assert!(sample.append(&header(false, None, None), &[4, 5], at(1)));
        assert_eq!(sample.data(), &[1, 2, 3, 4, 5]);
        assert!(sample.capacity() >= 4 + 2);
        assert!(!sample.may_contain_error());

        let big = vec![7; 20 * 1024];
        assert!(sample.append(&header(false, None, None), &big, at(1)));
        assert_eq!(sample.len(), 5 + big.len());
    }

    #[test]
    fn resize_stops_at_the_maximum() {
        let mut sample = Sample::new(&layout(4, true));
        let big = vec![7; 64 * 1024 + 1];
        assert!(!sample.append(&header(false, None, None), &big, at(1)));
        assert!(sample.is_empty());
        assert!(sample.may_contain_error());
    }

    #[test]
    fn reset_keeps_the_buffer() {
        let mut sample = Sample::new(&layout(4, true));
        let big = vec![7; 1024];
        assert!(sample.append(&header(true, Some(3), Some(5)), &big, at(1)));
        let capacity = sample.capacity();
        sample.reset();
        assert!(sample.is_empty());
        assert_eq!(sample.capacity(), capacity);
        assert_eq!(sample.capture_device_time(), None);
        assert_eq!(sample.payload_device_times().count(), 0);
        assert!(sample.matches(&layout(4, true)));
    }

    #[test]
    fn queue_drops_oldest() {
        let mut queue = SampleQueue::new(10);
        for i in 0..15u8 {
            let mut sample = Sample::new(&layout(4, false));
            assert!(sample.append(&header(true, None, None), &[i], at(1)));
            queue.push(sample);
        }

        assert_eq!(queue.len(), 10);
        assert_eq!(queue.reusable_len(), 5);

        let mut seen = Vec::new();
        while let Some((sample, remaining)) = queue.pop() {
            assert_eq!(remaining, 9 - seen.len());
            seen.push(sample.data()[0]);
        }
        assert_eq!(seen, (5..15).collect::<Vec<_>>());

        let recycled = queue.take_reusable().unwrap();
        assert!(recycled.is_empty());
    }

    #[test]
    fn recycling_keeps_samples_of_running_stream_only() {
        let mut queue = SampleQueue::new(4);
        queue.recycle(Sample::new(&layout(4, false)));
        assert_eq!(queue.reusable_len(), 0);

        queue.set_layout(Some(layout(4, false)));
        let mut sample = Sample::new(&layout(8, false));
        assert!(sample.append(&header(false, None, None), &[1, 2], at(1)));
        queue.recycle(sample);
        queue.recycle(Sample::new(&layout(4, true)));
        assert_eq!(queue.reusable_len(), 1);
        assert!(queue.take_reusable().unwrap().is_empty());

        queue.set_layout(None);
        queue.recycle(Sample::new(&layout(4, false)));
        assert_eq!(queue.reusable_len(), 0);
    }
}
