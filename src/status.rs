//! Status packets sent on the Video Control interrupt endpoint.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use crate::{
    error::{Action, ResultExt},
    transport::{
        TransferHandler, TransferId, TransferKind, TransferSetup, TransferStatus, UsbTransport,
    },
    Result,
};

const STATUS_BUFFER_SIZE: usize = 64;
const STATUS_TRANSFER_ID: TransferId = TransferId(u32::MAX);

/// A decoded status interrupt packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusPacket {
    /// Sent by a terminal or unit of the Video Control interface.
    Control {
        /// `bOriginator`: ID of the terminal or unit.
        originator: u8,
        /// `bEvent`: 0 means a control value changed.
        event: u8,
        /// `bSelector`: the control that changed.
        selector: u8,
        /// `bAttribute`: 0 value, 1 info, 2 failure, 3 min, 4 max.
        attribute: u8,
        value: Vec<u8>,
    },
    /// Sent on behalf of a Video Streaming interface.
    Streaming {
        /// `bOriginator`: the streaming interface number.
        originator: u8,
        /// `bEvent`: 0 means a button was pressed or released.
        event: u8,
        value: Vec<u8>,
    },
}

impl StatusPacket {
    pub fn parse(raw: &[u8]) -> Option<Self> {
        match raw {
            [status_type, originator, event, selector, attribute, value @ ..]
                if status_type & 0x0F == 1 =>
            {
                Some(StatusPacket::Control {
                    originator: *originator,
                    event: *event,
                    selector: *selector,
                    attribute: *attribute,
                    value: value.to_vec(),
                })
            }
            [status_type, originator, event, value @ ..] if status_type & 0x0F == 2 => {
                Some(StatusPacket::Streaming {
                    originator: *originator,
                    event: *event,
                    value: value.to_vec(),
                })
            }
            _ => None,
        }
    }
}

struct StatusHandler {
    closing: AtomicBool,
    live: AtomicBool,
}

impl TransferHandler for StatusHandler {
    fn transfer_completed(
        &self,
        _: TransferId,
        status: TransferStatus,
        packets: &[&[u8]],
    ) -> bool {
        if status == TransferStatus::Completed {
            for packet in packets.iter().filter(|p| !p.is_empty()) {
                match StatusPacket::parse(packet) {
                    Some(decoded) => log::info!("status interrupt: {:?}", decoded),
                    None => log::debug!("unknown status interrupt {:02x?}", packet),
                }
            }
        } else if status != TransferStatus::Cancelled && status != TransferStatus::TimedOut {
            log::warn!("status interrupt transfer finished with {:?}", status);
        }

        let resubmit = status.is_retryable() && !self.closing.load(Ordering::SeqCst);
        if !resubmit {
            self.live.store(false, Ordering::SeqCst);
        }
        resubmit
    }

    fn transfer_retired(&self, _: TransferId) {
        log::error!("failed to resubmit the status interrupt transfer");
        self.live.store(false, Ordering::SeqCst);
    }
}

/// Keeps one interrupt transfer on the status endpoint in flight and logs what arrives.
pub(crate) struct StatusListener<T: UsbTransport> {
    transfer: Option<T::Transfer>,
    handler: Arc<StatusHandler>,
}

impl<T: UsbTransport> StatusListener<T> {
    pub(crate) fn start(transport: &T, endpoint: u8, timeout: Duration) -> Result<Self> {
        let handler = Arc::new(StatusHandler {
            closing: AtomicBool::new(false),
            live: AtomicBool::new(false),
        });

        let setup = TransferSetup {
            id: STATUS_TRANSFER_ID,
            endpoint,
            kind: TransferKind::Interrupt {
                buffer_size: STATUS_BUFFER_SIZE,
            },
            timeout,
        };
        let transfer = transport
            .allocate_transfer(&setup, handler.clone())
            .during(Action::AllocatingTransfers)?;

        handler.live.store(true, Ordering::SeqCst);
        if let Err(e) = transport.submit(&transfer).during(Action::SubmittingTransfer) {
            handler.live.store(false, Ordering::SeqCst);
            return Err(e);
        }
        log::debug!("listening for status interrupts on endpoint {:#04x}", endpoint);

        Ok(Self {
            transfer: Some(transfer),
            handler,
        })
    }

    /// Cancels the transfer and waits up to `timeout` for it to finish.
    pub(crate) fn shutdown(&mut self, transport: &T, timeout: Duration) {
        let transfer = match self.transfer.take() {
            Some(transfer) => transfer,
            None => return,
        };

        self.handler.closing.store(true, Ordering::SeqCst);
        if self.handler.live.load(Ordering::SeqCst) {
            if let Err(e) = transport.cancel(&transfer) {
                log::debug!("cancelling the status transfer failed: {}", e);
            }
        }

        let deadline = Instant::now() + timeout;
        while self.handler.live.load(Ordering::SeqCst) {
            if Instant::now() >= deadline {
                log::error!("status transfer did not finish, leaking it");
                std::mem::forget(transfer);
                return;
            }
            thread::sleep(Duration::from_millis(1));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockTransport;

    #[test]
    fn control_change_packet() {
        let packet = StatusPacket::parse(&[0x01, 2, 0, 0x02, 0, 0x10, 0x00]).unwrap();
        assert_eq!(
            packet,
            StatusPacket::Control {
                originator: 2,
                event: 0,
                selector: 2,
                attribute: 0,
                value: vec![0x10, 0x00],
            }
        );
    }

    #[test]
    fn button_packet() {
        let packet = StatusPacket::parse(&[0x02, 1, 0, 1]).unwrap();
        assert_eq!(
            packet,
            StatusPacket::Streaming {
                originator: 1,
                event: 0,
                value: vec![1],
            }
        );
    }

    #[test]
    fn malformed_packets() {
        assert_eq!(StatusPacket::parse(&[]), None);
        assert_eq!(StatusPacket::parse(&[0x01, 2, 0]), None);
        assert_eq!(StatusPacket::parse(&[0x05, 2, 0, 0, 0]), None);
    }

    #[test]
    fn listener_resubmits_until_shutdown() {
        let transport = MockTransport::new(Vec::new());
        let mut listener =
            StatusListener::start(&transport, 0x83, Duration::from_millis(100)).unwrap();
        assert_eq!(transport.in_flight(), vec![STATUS_TRANSFER_ID]);

        transport.complete(
            STATUS_TRANSFER_ID,
            TransferStatus::Completed,
            &[&[0x01, 2, 0, 0x02, 0, 0x10]],
        );
        assert_eq!(transport.in_flight(), vec![STATUS_TRANSFER_ID]);

        listener.shutdown(&transport, Duration::from_secs(1));
        assert!(transport.in_flight().is_empty());
        assert!(!listener.handler.live.load(Ordering::SeqCst));
    }
}
