//! In-memory transports
//!
//! Drive protocol adapters and stages without hardware. A responder closure
//! plays the device: it receives every write (or control request) and
//! returns the bytes the device would answer. A cloneable handle shares the
//! transport state so a test, or another thread, can inspect traffic, inject
//! unsolicited bytes, or sever the link mid-operation.

use super::{ControlTransport, Transport};
use parking_lot::Mutex;
use stagekit_core::{ConnectionError, Result};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

const IDLE_WAIT: Duration = Duration::from_millis(1);

type StreamResponder = Box<dyn FnMut(&[u8]) -> Vec<u8> + Send>;
type ControlResponder = Box<dyn FnMut(&ControlRequest) -> Result<Vec<u8>> + Send>;

#[derive(Default)]
struct LinkState {
    open: bool,
    open_error: Option<String>,
    severed: bool,
    open_count: usize,
}

impl LinkState {
    fn open(&mut self, name: &str) -> Result<()> {
        if let Some(reason) = &self.open_error {
            return Err(ConnectionError::FailedToOpen {
                port: name.to_string(),
                reason: reason.clone(),
            }
            .into());
        }
        self.open = true;
        self.severed = false;
        self.open_count += 1;
        Ok(())
    }

    fn check(&self) -> Result<()> {
        if self.severed {
            return Err(ConnectionError::ConnectionLost {
                reason: "mock link severed".to_string(),
            }
            .into());
        }
        if !self.open {
            return Err(ConnectionError::NotConnected.into());
        }
        Ok(())
    }
}

#[derive(Default)]
struct StreamState {
    link: LinkState,
    input: VecDeque<u8>,
    written: Vec<Vec<u8>>,
    responder: Option<StreamResponder>,
}

/// In-memory byte-stream transport
pub struct MockTransport {
    name: String,
    state: Arc<Mutex<StreamState>>,
}

/// Shared view of a [`MockTransport`]
#[derive(Clone)]
pub struct MockHandle {
    state: Arc<Mutex<StreamState>>,
}

impl MockTransport {
    /// Transport with no simulated device; input only arrives via the handle
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Arc::new(Mutex::new(StreamState::default())),
        }
    }

    /// Transport answered by `responder`
    pub fn with_responder(
        name: impl Into<String>,
        responder: impl FnMut(&[u8]) -> Vec<u8> + Send + 'static,
    ) -> Self {
        let mock = Self::new(name);
        mock.state.lock().responder = Some(Box::new(responder));
        mock
    }

    pub fn handle(&self) -> MockHandle {
        MockHandle {
            state: Arc::clone(&self.state),
        }
    }
}

impl MockHandle {
    /// Queue bytes as if the device had sent them
    pub fn push_input(&self, bytes: &[u8]) {
        self.state.lock().input.extend(bytes.iter().copied());
    }

    /// Every write, in order
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.state.lock().written.clone()
    }

    /// Every write, concatenated
    pub fn written_bytes(&self) -> Vec<u8> {
        self.state.lock().written.concat()
    }

    pub fn clear_written(&self) {
        self.state.lock().written.clear();
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().link.open
    }

    /// Number of successful opens
    pub fn open_count(&self) -> usize {
        self.state.lock().link.open_count
    }

    /// Make the next opens fail
    pub fn fail_open(&self, reason: impl Into<String>) {
        self.state.lock().link.open_error = Some(reason.into());
    }

    /// Drop the link from outside the owning session
    ///
    /// Every later read or write fails with a connection error until the
    /// transport is reopened.
    pub fn sever(&self) {
        let mut state = self.state.lock();
        state.link.severed = true;
        state.input.clear();
    }

    /// Replace the simulated device
    pub fn set_responder(&self, responder: impl FnMut(&[u8]) -> Vec<u8> + Send + 'static) {
        self.state.lock().responder = Some(Box::new(responder));
    }
}

impl Transport for MockTransport {
    fn open(&mut self) -> Result<()> {
        self.state.lock().link.open(&self.name)
    }

    fn close(&mut self) {
        let mut state = self.state.lock();
        state.link.open = false;
        state.input.clear();
    }

    fn is_open(&self) -> bool {
        self.state.lock().link.open
    }

    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.link.check()?;
        state.written.push(data.to_vec());
        if let Some(responder) = state.responder.as_mut() {
            let reply = responder(data);
            state.input.extend(reply);
        }
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        {
            let state = self.state.lock();
            state.link.check()?;
            if state.input.is_empty() {
                drop(state);
                std::thread::sleep(timeout.min(IDLE_WAIT));
            }
        }
        let mut state = self.state.lock();
        state.link.check()?;
        let n = buf.len().min(state.input.len());
        for (slot, byte) in buf.iter_mut().zip(state.input.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn clear_input(&mut self) -> Result<()> {
        let mut state = self.state.lock();
        state.link.check()?;
        state.input.clear();
        Ok(())
    }

    fn name(&self) -> String {
        self.name.clone()
    }
}

/// One recorded control transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlRequest {
    pub request_type: u8,
    pub request: u8,
    pub value: u16,
    pub index: u16,
    /// Payload of an OUT transfer
    pub data: Vec<u8>,
    /// Requested length of an IN transfer
    pub length: usize,
}

#[derive(Default)]
struct ControlState {
    link: LinkState,
    requests: Vec<ControlRequest>,
    responder: Option<ControlResponder>,
}

/// In-memory control-transfer transport
pub struct MockControlTransport {
    name: String,
    state: Arc<Mutex<ControlState>>,
}

/// Shared view of a [`MockControlTransport`]
#[derive(Clone)]
pub struct MockControlHandle {
    state: Arc<Mutex<ControlState>>,
}

impl MockControlTransport {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Arc::new(Mutex::new(ControlState::default())),
        }
    }

    /// Transport answered by `responder`
    ///
    /// The responder returns the IN payload, or an error to fail the
    /// transfer. Its payload is ignored for OUT transfers.
    pub fn with_responder(
        name: impl Into<String>,
        responder: impl FnMut(&ControlRequest) -> Result<Vec<u8>> + Send + 'static,
    ) -> Self {
        let mock = Self::new(name);
        mock.state.lock().responder = Some(Box::new(responder));
        mock
    }

    pub fn handle(&self) -> MockControlHandle {
        MockControlHandle {
            state: Arc::clone(&self.state),
        }
    }

    fn transfer(&mut self, request: ControlRequest) -> Result<Vec<u8>> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.link.check()?;
        state.requests.push(request.clone());
        match state.responder.as_mut() {
            Some(responder) => responder(&request),
            None => Ok(Vec::new()),
        }
    }
}

impl MockControlHandle {
    /// Every transfer, in order
    pub fn requests(&self) -> Vec<ControlRequest> {
        self.state.lock().requests.clone()
    }

    pub fn clear_requests(&self) {
        self.state.lock().requests.clear();
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().link.open
    }

    pub fn fail_open(&self, reason: impl Into<String>) {
        self.state.lock().link.open_error = Some(reason.into());
    }

    /// Drop the link from outside the owning session
    pub fn sever(&self) {
        self.state.lock().link.severed = true;
    }

    /// Replace the simulated device
    pub fn set_responder(
        &self,
        responder: impl FnMut(&ControlRequest) -> Result<Vec<u8>> + Send + 'static,
    ) {
        self.state.lock().responder = Some(Box::new(responder));
    }
}

impl ControlTransport for MockControlTransport {
    fn open(&mut self) -> Result<()> {
        self.state.lock().link.open(&self.name)
    }

    fn close(&mut self) {
        self.state.lock().link.open = false;
    }

    fn is_open(&self) -> bool {
        self.state.lock().link.open
    }

    fn control_out(
        &mut self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
        _timeout: Duration,
    ) -> Result<usize> {
        self.transfer(ControlRequest {
            request_type,
            request,
            value,
            index,
            data: data.to_vec(),
            length: 0,
        })?;
        Ok(data.len())
    }

    fn control_in(
        &mut self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        buf: &mut [u8],
        _timeout: Duration,
    ) -> Result<usize> {
        let reply = self.transfer(ControlRequest {
            request_type,
            request,
            value,
            index,
            data: Vec::new(),
            length: buf.len(),
        })?;
        let n = reply.len().min(buf.len());
        buf[..n].copy_from_slice(&reply[..n]);
        Ok(n)
    }

    fn name(&self) -> String {
        self.name.clone()
    }
}
