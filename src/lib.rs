//! A USB Video Class driver core.
//!
//! [`VideoDevice`] parses a camera's Video Control and Video Streaming interfaces, picks the
//! stream that best matches a set of [`StreamPreferences`], negotiates it through the
//! probe/commit controls and reassembles the incoming payload packets into [`Sample`]s.
//!
//! The USB stack is reached through the [`UsbTransport`] trait. [`LibusbTransport`] implements
//! it with libusb.
//!
//! ```no_run
//! use uvcstream::{Config, LibusbTransport, StreamPreferences, VideoDevice};
//!
//! # fn main() -> uvcstream::Result<()> {
//! let transport = LibusbTransport::open(0x046d, 0x0825)?;
//! let device = VideoDevice::new(transport, Config::default())?;
//! device.start(&StreamPreferences::new().resolution(640, 480).frame_rate(30.0))?;
//! loop {
//!     if let Some((sample, _)) = device.next_sample() {
//!         println!("{} bytes", sample.len());
//!         device.give_sample_back(sample);
//!     }
//! }
//! # }
//! ```

#[macro_use]
mod util;
pub mod config;
pub mod control;
pub mod descriptor;
mod detect;
mod device;
mod error;
pub mod format;
pub mod payload;
pub mod sample;
mod status;
pub mod streaming_interface;
pub mod topo;
pub mod transport;

pub use config::{Config, StreamPreferences};
pub use control::ProbeCommitControls;
pub use device::{SessionState, VideoDevice};
pub use error::Error;
pub use format::{EncodingFormat, PixelFormat, StreamType};
pub use payload::PayloadHeader;
pub use sample::{Sample, SampleQueue};
pub use status::StatusPacket;
pub use streaming_interface::{StreamMatch, StreamProperties, VideoStreamingInterface};
pub use topo::VideoControlInterface;
pub use transport::{
    InterfaceClaim, LibusbTransport, TransferHandler, TransferId, TransferStatus, UsbTransport,
};
pub use util::{frequency_to_interval, interval_to_frequency, BcdVersion};

pub type Result<T> = std::result::Result<T, Error>;
