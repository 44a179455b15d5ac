//! Tunables of a [`VideoDevice`](crate::VideoDevice) and the stream preferences passed to
//! [`VideoDevice::start`](crate::VideoDevice::start).

use std::time::Duration;

use crate::format::{EncodingFormat, PixelFormat, StreamType};

#[derive(Debug, Clone)]
pub struct Config {
    /// Number of streaming transfers kept in flight.
    pub transfer_count: usize,
    /// Capacity of the completed-sample queue. When full, the oldest sample is dropped.
    pub sample_queue_capacity: usize,
    /// Upper bound for samples that are allowed to grow (MJPEG and frame-based streams).
    pub max_sample_size: usize,
    /// Timeout of each streaming transfer.
    pub transfer_timeout: Duration,
    /// Timeout of synchronous control requests.
    pub control_timeout: Duration,
    /// How long `stop` (and dropping the device) waits for outstanding transfers.
    pub stop_timeout: Duration,
    /// Upper bound for the number of packets packed into one isochronous transfer.
    pub max_packets_per_transfer: usize,
    /// Detach kernel drivers bound to the interfaces we claim.
    pub detach_kernel_driver: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            transfer_count: 100,
            sample_queue_capacity: 10,
            max_sample_size: 10 * 1024 * 1024,
            transfer_timeout: Duration::from_millis(5000),
            control_timeout: Duration::from_millis(1000),
            stop_timeout: Duration::from_secs(5),
            max_packets_per_transfer: 32,
            detach_kernel_driver: true,
        }
    }
}

/// What the caller would like to stream. Unset fields leave the choice to the device.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamPreferences {
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// Frames per second.
    pub frame_rate: Option<f64>,
    pub stream_type: Option<StreamType>,
    /// Only considered for uncompressed streams.
    pub pixel_format: Option<PixelFormat>,
    /// Only considered for frame-based streams.
    pub encoding_format: Option<EncodingFormat>,
}

impl StreamPreferences {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resolution(mut self, width: u32, height: u32) -> Self {
        self.width = Some(width);
        self.height = Some(height);
        self
    }

    pub fn frame_rate(mut self, frame_rate: f64) -> Self {
        self.frame_rate = Some(frame_rate);
        self
    }

    pub fn stream_type(mut self, stream_type: StreamType) -> Self {
        self.stream_type = Some(stream_type);
        self
    }

    pub fn pixel_format(mut self, pixel_format: PixelFormat) -> Self {
        self.pixel_format = Some(pixel_format);
        self
    }

    pub fn encoding_format(mut self, encoding_format: EncodingFormat) -> Self {
        self.encoding_format = Some(encoding_format);
        self
    }

    /// Whether any field restricts which streams qualify (as opposed to only ranking them).
    pub(crate) fn has_filters(&self) -> bool {
        self.stream_type.is_some() || self.pixel_format.is_some() || self.encoding_format.is_some()
    }
}
