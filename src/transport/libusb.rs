//! [`UsbTransport`] on top of libusb, via `rusb`.
//!
//! Synchronous requests go through [`rusb::DeviceHandle`]. Asynchronous transfers are not covered
//! by `rusb`'s safe API and use `libusb_transfer` directly.

use std::{
    os::raw::{c_int, c_uint, c_void},
    panic::{self, AssertUnwindSafe},
    ptr::NonNull,
    slice,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use rusb::{constants::*, ffi, Context, DeviceHandle, UsbContext};

use super::*;
use crate::error::{err, Action, ResultExt};

const EVENT_POLL_INTERVAL: Duration = Duration::from_millis(100);

struct RawHandle(*mut ffi::libusb_device_handle);

// The handle pointer is only passed to libusb, which is thread-safe.
unsafe impl Send for RawHandle {}
unsafe impl Sync for RawHandle {}

struct Shared {
    context: Context,
    handle: Mutex<DeviceHandle<Context>>,
    raw: RawHandle,
}

impl Shared {
    fn handle(&self) -> MutexGuard<'_, DeviceHandle<Context>> {
        self.handle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A libusb device handle, plus a thread running the libusb event loop.
pub struct LibusbTransport {
    shared: Arc<Shared>,
    stop_events: Arc<AtomicBool>,
    event_thread: Option<JoinHandle<()>>,
}

impl LibusbTransport {
    /// Wraps an opened device and starts the event thread that completes its transfers.
    pub fn new(handle: DeviceHandle<Context>) -> Result<Self> {
        let context = handle.context().clone();
        let raw = RawHandle(handle.as_raw());
        let shared = Arc::new(Shared {
            context,
            handle: Mutex::new(handle),
            raw,
        });

        let stop_events = Arc::new(AtomicBool::new(false));
        let event_thread = {
            let shared = shared.clone();
            let stop = stop_events.clone();
            thread::Builder::new()
                .name("uvc-usb-events".into())
                .spawn(move || {
                    while !stop.load(Ordering::Acquire) {
                        if let Err(e) = shared.context.handle_events(Some(EVENT_POLL_INTERVAL)) {
                            log::error!("libusb event handling failed: {}", e);
                            thread::sleep(EVENT_POLL_INTERVAL);
                        }
                    }
                })
                .during(Action::OpeningDevice)?
        };

        Ok(Self {
            shared,
            stop_events,
            event_thread: Some(event_thread),
        })
    }

    /// Opens the first device with the given vendor and product ID.
    pub fn open(vendor_id: u16, product_id: u16) -> Result<Self> {
        let context = Context::new().during(Action::OpeningDevice)?;
        let handle = match context.open_device_with_vid_pid(vendor_id, product_id) {
            Some(handle) => handle,
            None => {
                return err(
                    format!("no device with ID {:04x}:{:04x}", vendor_id, product_id),
                    Action::OpeningDevice,
                )
            }
        };
        Self::new(handle)
    }
}

impl Drop for LibusbTransport {
    fn drop(&mut self) {
        self.stop_events.store(true, Ordering::Release);
        if let Some(thread) = self.event_thread.take() {
            if thread.join().is_err() {
                log::error!("libusb event thread panicked");
            }
        }
    }
}

/// A claimed interface of a [`LibusbTransport`].
pub struct LibusbClaim {
    shared: Arc<Shared>,
    number: u8,
    detached: bool,
}

impl InterfaceClaim for LibusbClaim {
    fn interface_number(&self) -> u8 {
        self.number
    }

    fn detached_kernel_driver(&self) -> bool {
        self.detached
    }
}

impl Drop for LibusbClaim {
    fn drop(&mut self) {
        let handle = self.shared.handle();
        if let Err(e) = handle.release_interface(self.number) {
            log::warn!("failed to release interface {}: {}", self.number, e);
        }
        if self.detached {
            if let Err(e) = handle.attach_kernel_driver(self.number) {
                log::warn!(
                    "failed to re-attach kernel driver to interface {}: {}",
                    self.number,
                    e
                );
            }
        }
    }
}

struct TransferContext {
    handler: Arc<dyn TransferHandler>,
    id: TransferId,
    packet_size: usize,
    buffer: Vec<u8>,
}

/// A `libusb_transfer` with its buffer. Must not be dropped while it is submitted.
pub struct LibusbTransfer {
    raw: NonNull<ffi::libusb_transfer>,
    context: NonNull<TransferContext>,
}

// libusb transfers may be submitted and cancelled from any thread.
unsafe impl Send for LibusbTransfer {}

impl Drop for LibusbTransfer {
    fn drop(&mut self) {
        unsafe {
            ffi::libusb_free_transfer(self.raw.as_ptr());
            drop(Box::from_raw(self.context.as_ptr()));
        }
    }
}

fn libusb_error(code: c_int) -> rusb::Error {
    match code {
        LIBUSB_ERROR_IO => rusb::Error::Io,
        LIBUSB_ERROR_INVALID_PARAM => rusb::Error::InvalidParam,
        LIBUSB_ERROR_ACCESS => rusb::Error::Access,
        LIBUSB_ERROR_NO_DEVICE => rusb::Error::NoDevice,
        LIBUSB_ERROR_NOT_FOUND => rusb::Error::NotFound,
        LIBUSB_ERROR_BUSY => rusb::Error::Busy,
        LIBUSB_ERROR_TIMEOUT => rusb::Error::Timeout,
        LIBUSB_ERROR_OVERFLOW => rusb::Error::Overflow,
        LIBUSB_ERROR_PIPE => rusb::Error::Pipe,
        LIBUSB_ERROR_INTERRUPTED => rusb::Error::Interrupted,
        LIBUSB_ERROR_NO_MEM => rusb::Error::NoMem,
        LIBUSB_ERROR_NOT_SUPPORTED => rusb::Error::NotSupported,
        _ => rusb::Error::Other,
    }
}

extern "system" fn transfer_callback(transfer: *mut ffi::libusb_transfer) {
    let res = panic::catch_unwind(AssertUnwindSafe(|| unsafe { transfer_finished(transfer) }));
    if res.is_err() {
        log::error!("transfer handler panicked");
    }
}

/// Hands a finished transfer to its handler, and resubmits it if the handler asks for it.
///
/// # Safety
///
/// `transfer` must be a transfer allocated by [`LibusbTransport::allocate_transfer`].
unsafe fn transfer_finished(transfer: *mut ffi::libusb_transfer) {
    let context = &*((*transfer).user_data as *const TransferContext);
    let status = TransferStatus::from_raw((*transfer).status).unwrap_or(TransferStatus::Error);
    let buffer = (*transfer).buffer;

    let resubmit = {
        let num_packets = (*transfer).num_iso_packets.max(0) as usize;
        let mut packets: Vec<&[u8]> = Vec::with_capacity(num_packets.max(1));
        if num_packets > 0 {
            let first = (*transfer).iso_packet_desc.as_ptr();
            let descriptors = slice::from_raw_parts(first, num_packets);
            for (i, desc) in descriptors.iter().enumerate() {
                if desc.status != LIBUSB_TRANSFER_COMPLETED {
                    log::trace!("iso packet {} of {:?} failed: {}", i, context.id, desc.status);
                    continue;
                }
                let len = (desc.actual_length as usize).min(context.packet_size);
                packets.push(slice::from_raw_parts(buffer.add(i * context.packet_size), len));
            }
        } else {
            let len = ((*transfer).actual_length.max(0) as usize).min(context.buffer.len());
            packets.push(slice::from_raw_parts(buffer, len));
        }

        context.handler.transfer_completed(context.id, status, &packets)
    };

    if resubmit {
        let rc = ffi::libusb_submit_transfer(transfer);
        if rc != 0 {
            log::error!(
                "failed to resubmit {:?}: {}",
                context.id,
                libusb_error(rc)
            );
            context.handler.transfer_retired(context.id);
        }
    }
}

impl UsbTransport for LibusbTransport {
    type Claim = LibusbClaim;
    type Transfer = LibusbTransfer;

    fn interfaces(&self) -> Result<Vec<InterfaceInfo>> {
        let handle = self.shared.handle();
        let config = handle
            .device()
            .active_config_descriptor()
            .during(Action::EnumeratingInterfaces)?;

        let mut interfaces = Vec::new();
        for interface in config.interfaces() {
            for desc in interface.descriptors() {
                interfaces.push(InterfaceInfo {
                    number: desc.interface_number(),
                    alt_setting: desc.setting_number(),
                    class: desc.class_code(),
                    subclass: desc.sub_class_code(),
                    protocol: desc.protocol_code(),
                    extra: desc.extra().to_vec(),
                    endpoints: desc
                        .endpoint_descriptors()
                        .map(|ep| EndpointInfo {
                            address: ep.address(),
                            transfer_type: ep.transfer_type(),
                            max_packet_size: ep.max_packet_size(),
                            interval: ep.interval(),
                        })
                        .collect(),
                });
            }
        }
        Ok(interfaces)
    }

    fn claim_interface(&self, interface: u8, detach_kernel_driver: bool) -> Result<LibusbClaim> {
        let handle = self.shared.handle();

        let mut detached = false;
        if detach_kernel_driver && handle.kernel_driver_active(interface).unwrap_or(false) {
            handle
                .detach_kernel_driver(interface)
                .during(Action::ClaimingInterface)?;
            log::debug!("detached kernel driver from interface {}", interface);
            detached = true;
        }

        if let Err(e) = handle.claim_interface(interface) {
            if detached {
                if let Err(e) = handle.attach_kernel_driver(interface) {
                    log::warn!("failed to re-attach kernel driver: {}", e);
                }
            }
            return Err(e).during(Action::ClaimingInterface);
        }

        Ok(LibusbClaim {
            shared: self.shared.clone(),
            number: interface,
            detached,
        })
    }

    fn set_alternate_setting(&self, interface: u8, alt_setting: u8) -> Result<()> {
        self.shared
            .handle()
            .set_alternate_setting(interface, alt_setting)
            .during(Action::SelectingAlternateSetting)
    }

    fn control_in(
        &self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize> {
        self.shared
            .handle()
            .read_control(request_type, request, value, index, buf, timeout)
            .during(Action::ReadingControl)
    }

    fn control_out(
        &self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize> {
        self.shared
            .handle()
            .write_control(request_type, request, value, index, data, timeout)
            .during(Action::WritingControl)
    }

    fn allocate_transfer(
        &self,
        setup: &TransferSetup,
        handler: Arc<dyn TransferHandler>,
    ) -> Result<LibusbTransfer> {
        let (transfer_type, iso_packets, packet_size) = match setup.kind {
            TransferKind::Isochronous {
                packets,
                packet_size,
            } => (LIBUSB_TRANSFER_TYPE_ISOCHRONOUS, packets, packet_size),
            TransferKind::Bulk { buffer_size } => (LIBUSB_TRANSFER_TYPE_BULK, 0, buffer_size),
            TransferKind::Interrupt { buffer_size } => {
                (LIBUSB_TRANSFER_TYPE_INTERRUPT, 0, buffer_size)
            }
        };
        let length = setup.kind.buffer_size();
        if length == 0 || length > c_int::MAX as usize {
            return err(
                format!("invalid transfer buffer size {}", length),
                Action::AllocatingTransfers,
            );
        }

        let mut context = Box::new(TransferContext {
            handler,
            id: setup.id,
            packet_size,
            buffer: vec![0; length],
        });

        let raw = match NonNull::new(unsafe { ffi::libusb_alloc_transfer(iso_packets as c_int) }) {
            Some(raw) => raw,
            None => return err("libusb_alloc_transfer failed", Action::AllocatingTransfers),
        };

        unsafe {
            let transfer = raw.as_ptr();
            (*transfer).dev_handle = self.shared.raw.0;
            (*transfer).endpoint = setup.endpoint;
            (*transfer).transfer_type = transfer_type;
            (*transfer).timeout = setup.timeout.as_millis().min(u128::from(c_uint::MAX)) as c_uint;
            (*transfer).buffer = context.buffer.as_mut_ptr();
            (*transfer).length = length as c_int;
            (*transfer).callback = transfer_callback;
            (*transfer).num_iso_packets = iso_packets as c_int;
            for i in 0..iso_packets {
                let desc = (*transfer).iso_packet_desc.as_mut_ptr().add(i);
                (*desc).length = packet_size as c_uint;
            }

            let context = NonNull::new_unchecked(Box::into_raw(context));
            (*transfer).user_data = context.as_ptr() as *mut c_void;

            Ok(LibusbTransfer { raw, context })
        }
    }

    fn submit(&self, transfer: &LibusbTransfer) -> Result<()> {
        let rc = unsafe { ffi::libusb_submit_transfer(transfer.raw.as_ptr()) };
        if rc != 0 {
            return Err(libusb_error(rc)).during(Action::SubmittingTransfer);
        }
        Ok(())
    }

    fn cancel(&self, transfer: &LibusbTransfer) -> Result<()> {
        let rc = unsafe { ffi::libusb_cancel_transfer(transfer.raw.as_ptr()) };
        if rc != 0 {
            return Err(libusb_error(rc)).during(Action::CancellingTransfer);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes() {
        assert_eq!(libusb_error(LIBUSB_ERROR_NOT_FOUND), rusb::Error::NotFound);
        assert_eq!(libusb_error(LIBUSB_ERROR_NO_DEVICE), rusb::Error::NoDevice);
        assert_eq!(libusb_error(-1234), rusb::Error::Other);
    }

    #[test]
    fn status_codes_match_libusb() {
        assert_eq!(
            TransferStatus::from_raw(LIBUSB_TRANSFER_COMPLETED),
            Some(TransferStatus::Completed)
        );
        assert_eq!(
            TransferStatus::from_raw(LIBUSB_TRANSFER_CANCELLED),
            Some(TransferStatus::Cancelled)
        );
        assert_eq!(
            TransferStatus::from_raw(LIBUSB_TRANSFER_NO_DEVICE),
            Some(TransferStatus::NoDevice)
        );
        assert_eq!(
            TransferStatus::from_raw(LIBUSB_TRANSFER_OVERFLOW),
            Some(TransferStatus::Overflow)
        );
    }
}
