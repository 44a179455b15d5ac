//! In-memory transport for unit tests.

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use super::*;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ControlRecord {
    pub(crate) request_type: u8,
    pub(crate) request: u8,
    pub(crate) value: u16,
    pub(crate) index: u16,
    pub(crate) len: usize,
}

#[derive(Default)]
struct MockState {
    probe_reply: Vec<u8>,
    control_log: Vec<ControlRecord>,
    claimed: Vec<u8>,
    alt_settings: Vec<(u8, u8)>,
    transfers: BTreeMap<TransferId, (TransferSetup, Arc<dyn TransferHandler>)>,
    in_flight: Vec<TransferId>,
}

pub(crate) struct MockTransport {
    interfaces: Vec<InterfaceInfo>,
    state: Arc<Mutex<MockState>>,
}

pub(crate) struct MockClaim {
    number: u8,
    state: Arc<Mutex<MockState>>,
}

impl InterfaceClaim for MockClaim {
    fn interface_number(&self) -> u8 {
        self.number
    }

    fn detached_kernel_driver(&self) -> bool {
        false
    }
}

impl Drop for MockClaim {
    fn drop(&mut self) {
        let mut state = self.state.lock().unwrap();
        state.claimed.retain(|n| *n != self.number);
    }
}

pub(crate) struct MockTransfer(TransferId);

impl MockTransport {
    pub(crate) fn new(interfaces: Vec<InterfaceInfo>) -> Self {
        Self {
            interfaces,
            state: Default::default(),
        }
    }

    /// Sets the bytes every `control_in` request answers with.
    pub(crate) fn set_probe_reply(&self, reply: Vec<u8>) {
        self.state.lock().unwrap().probe_reply = reply;
    }

    pub(crate) fn control_log(&self) -> Vec<ControlRecord> {
        self.state.lock().unwrap().control_log.clone()
    }

    pub(crate) fn claimed(&self) -> Vec<u8> {
        self.state.lock().unwrap().claimed.clone()
    }

    pub(crate) fn alt_settings(&self) -> Vec<(u8, u8)> {
        self.state.lock().unwrap().alt_settings.clone()
    }

    pub(crate) fn transfer_setups(&self) -> Vec<TransferSetup> {
        let state = self.state.lock().unwrap();
        state.transfers.values().map(|(setup, _)| setup.clone()).collect()
    }

    pub(crate) fn in_flight(&self) -> Vec<TransferId> {
        self.state.lock().unwrap().in_flight.clone()
    }

    /// Completes an in-flight transfer as the USB stack would.
    pub(crate) fn complete(&self, id: TransferId, status: TransferStatus, packets: &[&[u8]]) {
        let handler = {
            let mut state = self.state.lock().unwrap();
            let before = state.in_flight.len();
            state.in_flight.retain(|t| *t != id);
            assert_ne!(before, state.in_flight.len(), "{:?} is not in flight", id);
            state.transfers[&id].1.clone()
        };

        if handler.transfer_completed(id, status, packets) {
            self.state.lock().unwrap().in_flight.push(id);
        }
    }
}

impl UsbTransport for MockTransport {
    type Claim = MockClaim;
    type Transfer = MockTransfer;

    fn interfaces(&self) -> Result<Vec<InterfaceInfo>> {
        Ok(self.interfaces.clone())
    }

    fn claim_interface(&self, interface: u8, _detach_kernel_driver: bool) -> Result<MockClaim> {
        self.state.lock().unwrap().claimed.push(interface);
        Ok(MockClaim {
            number: interface,
            state: self.state.clone(),
        })
    }

    fn set_alternate_setting(&self, interface: u8, alt_setting: u8) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.alt_settings.push((interface, alt_setting));
        Ok(())
    }

    fn control_in(
        &self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        buf: &mut [u8],
        _timeout: Duration,
    ) -> Result<usize> {
        let mut state = self.state.lock().unwrap();
        state.control_log.push(ControlRecord {
            request_type,
            request,
            value,
            index,
            len: buf.len(),
        });
        let len = buf.len().min(state.probe_reply.len());
        buf[..len].copy_from_slice(&state.probe_reply[..len]);
        Ok(len)
    }

    fn control_out(
        &self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
        _timeout: Duration,
    ) -> Result<usize> {
        let mut state = self.state.lock().unwrap();
        state.control_log.push(ControlRecord {
            request_type,
            request,
            value,
            index,
            len: data.len(),
        });
        Ok(data.len())
    }

    fn allocate_transfer(
        &self,
        setup: &TransferSetup,
        handler: Arc<dyn TransferHandler>,
    ) -> Result<MockTransfer> {
        let mut state = self.state.lock().unwrap();
        state.transfers.insert(setup.id, (setup.clone(), handler));
        Ok(MockTransfer(setup.id))
    }

    fn submit(&self, transfer: &MockTransfer) -> Result<()> {
        self.state.lock().unwrap().in_flight.push(transfer.0);
        Ok(())
    }

    fn cancel(&self, transfer: &MockTransfer) -> Result<()> {
        let in_flight = self.state.lock().unwrap().in_flight.contains(&transfer.0);
        if !in_flight {
            return Err(rusb::Error::NotFound.into());
        }
        self.complete(transfer.0, TransferStatus::Cancelled, &[]);
        Ok(())
    }
}
