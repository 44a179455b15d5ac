//! The boundary between the UVC driver and the USB stack.
//!
//! [`UsbTransport`] covers everything the driver needs from a USB library: a snapshot of the
//! active configuration, interface claims, synchronous control transfers and asynchronous
//! isochronous/bulk/interrupt transfers. [`LibusbTransport`] implements it on top of libusb.

mod libusb;
#[cfg(test)]
pub(crate) mod mock;

use std::{sync::Arc, time::Duration};

pub use libusb::{LibusbClaim, LibusbTransfer, LibusbTransport};
pub use rusb::TransferType;

use crate::Result;

/// An endpoint of one alternate setting of an interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointInfo {
    /// `bEndpointAddress`, including the direction bit.
    pub address: u8,
    pub transfer_type: TransferType,
    /// Raw `wMaxPacketSize`, including the high-bandwidth multiplier bits.
    pub max_packet_size: u16,
    pub interval: u8,
}

impl EndpointInfo {
    /// The number of bytes the endpoint moves per (micro)frame.
    ///
    /// Bits 10..0 are the packet size, bits 12..11 the number of additional transactions per
    /// microframe on high-bandwidth endpoints.
    pub fn bytes_per_packet(&self) -> usize {
        let size = usize::from(self.max_packet_size & 0x07FF);
        let transactions = usize::from((self.max_packet_size >> 11) & 0x3) + 1;
        size * transactions
    }

    pub fn is_in(&self) -> bool {
        self.address & 0x80 != 0
    }
}

/// One alternate setting of one interface of the active configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceInfo {
    pub number: u8,
    pub alt_setting: u8,
    pub class: u8,
    pub subclass: u8,
    pub protocol: u8,
    /// The class-specific descriptors following the interface descriptor.
    pub extra: Vec<u8>,
    pub endpoints: Vec<EndpointInfo>,
}

/// A claimed interface. Releases the interface (and re-attaches a detached kernel driver) when
/// dropped.
pub trait InterfaceClaim: Send {
    fn interface_number(&self) -> u8;

    /// Whether claiming the interface required detaching a kernel driver.
    fn detached_kernel_driver(&self) -> bool;
}

/// Identifies a transfer towards its [`TransferHandler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransferId(pub u32);

primitive_enum! {
    /// Completion status of an asynchronous transfer (numerically identical to libusb's).
    pub enum TransferStatus: i32 {
        Completed = 0,
        Error = 1,
        TimedOut = 2,
        Cancelled = 3,
        Stall = 4,
        NoDevice = 5,
        Overflow = 6,
    }
}

impl TransferStatus {
    /// Whether a transfer finishing with this status should be submitted again.
    pub fn is_retryable(self) -> bool {
        match self {
            TransferStatus::Completed
            | TransferStatus::TimedOut
            | TransferStatus::Stall
            | TransferStatus::Overflow => true,
            TransferStatus::Error | TransferStatus::Cancelled | TransferStatus::NoDevice => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    /// `packets` isochronous packets of `packet_size` bytes each, in one buffer.
    Isochronous { packets: usize, packet_size: usize },
    Bulk { buffer_size: usize },
    Interrupt { buffer_size: usize },
}

impl TransferKind {
    pub fn buffer_size(&self) -> usize {
        match *self {
            TransferKind::Isochronous {
                packets,
                packet_size,
            } => packets * packet_size,
            TransferKind::Bulk { buffer_size } | TransferKind::Interrupt { buffer_size } => {
                buffer_size
            }
        }
    }
}

/// Everything needed to allocate one asynchronous transfer.
#[derive(Debug, Clone)]
pub struct TransferSetup {
    pub id: TransferId,
    pub endpoint: u8,
    pub kind: TransferKind,
    pub timeout: Duration,
}

/// Receives transfer completions, on whatever thread drives the USB event loop.
pub trait TransferHandler: Send + Sync {
    /// Called once per completed transfer, with one slice per received packet (isochronous) or a
    /// single slice (bulk, interrupt). Returns whether the transfer should be resubmitted.
    fn transfer_completed(&self, id: TransferId, status: TransferStatus, packets: &[&[u8]])
        -> bool;

    /// Called when the transport failed to resubmit a transfer after `transfer_completed`
    /// asked for it. The transfer is idle from then on.
    fn transfer_retired(&self, id: TransferId);
}

/// The USB stack as seen by the UVC driver, bound to one opened device.
pub trait UsbTransport: Send + Sync + 'static {
    type Claim: InterfaceClaim;

    /// An allocated asynchronous transfer. It must not be dropped while it is in flight.
    type Transfer: Send;

    /// Returns all alternate settings of all interfaces of the active configuration.
    fn interfaces(&self) -> Result<Vec<InterfaceInfo>>;

    fn claim_interface(&self, interface: u8, detach_kernel_driver: bool) -> Result<Self::Claim>;

    fn set_alternate_setting(&self, interface: u8, alt_setting: u8) -> Result<()>;

    /// Performs a device-to-host control transfer, returning the number of bytes read.
    fn control_in(
        &self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize>;

    /// Performs a host-to-device control transfer, returning the number of bytes written.
    fn control_out(
        &self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize>;

    fn allocate_transfer(
        &self,
        setup: &TransferSetup,
        handler: Arc<dyn TransferHandler>,
    ) -> Result<Self::Transfer>;

    fn submit(&self, transfer: &Self::Transfer) -> Result<()>;

    /// Requests cancellation. Completion is still reported through the handler.
    fn cancel(&self, transfer: &Self::Transfer) -> Result<()>;
}
