//! Scripted in-memory backend for tests

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use super::backend::{HardwareInput, InputHandle, InputSender, MidiBackend, OutputHandle, PortList};
use crate::error::PortError;

pub const THROUGH_PORT: &str = "Midi Through:Midi Through Port-0 14:0";

#[derive(Default)]
pub struct MockState {
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub list_calls: usize,
    pub probe_calls: usize,
    pub list_error: Option<PortError>,
    pub probe_error: Option<PortError>,
    pub open_input_error: Option<PortError>,
    pub open_output_error: Option<PortError>,
    pub virtual_error: Option<PortError>,
    pub virtual_creations: usize,
    /// Forces hardware sends to fail even while the port is listed
    pub send_error: Option<PortError>,
    /// `(port, bytes)` for every successful send
    pub sent: Vec<(String, Vec<u8>)>,
    pub open_inputs: Vec<String>,
    pub open_outputs: Vec<String>,
    pub input_sink: Option<InputSender>,
}

/// Cloneable handle; clones share state so a test can keep one while the
/// connection manager owns another
#[derive(Clone, Default)]
pub struct MockBackend {
    state: Arc<Mutex<MockState>>,
    device_input: String,
    device_output: String,
}

impl MockBackend {
    /// Backend with a through port plus the named device plugged in
    pub fn with_device(device: &str) -> Self {
        let backend = Self {
            state: Arc::default(),
            device_input: format!("{device}:{device} MIDI 1 20:0"),
            device_output: format!("{device}:{device} MIDI 1 20:0"),
        };
        backend.plug_in();
        backend
    }

    pub fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    pub fn device_input(&self) -> &str {
        &self.device_input
    }

    pub fn device_output(&self) -> &str {
        &self.device_output
    }

    pub fn plug_in(&self) {
        let mut state = self.state();
        state.inputs = vec![THROUGH_PORT.to_string(), self.device_input.clone()];
        state.outputs = vec![THROUGH_PORT.to_string(), self.device_output.clone()];
    }

    pub fn unplug(&self) {
        let mut state = self.state();
        state.inputs = vec![THROUGH_PORT.to_string()];
        state.outputs = vec![THROUGH_PORT.to_string()];
    }

    /// Deliver raw bytes as if the open hardware input received them
    pub fn inject(&self, data: &[u8]) -> bool {
        let state = self.state();
        match &state.input_sink {
            Some(sink) => sink
                .try_send(HardwareInput {
                    received_at: Instant::now(),
                    data: data.to_vec(),
                })
                .is_ok(),
            None => false,
        }
    }

    /// Bytes sent to a given port, in order
    pub fn sent_to(&self, port: &str) -> Vec<Vec<u8>> {
        self.state()
            .sent
            .iter()
            .filter(|(name, _)| name == port)
            .map(|(_, data)| data.clone())
            .collect()
    }
}

impl MidiBackend for MockBackend {
    fn list_ports(&mut self) -> Result<PortList, PortError> {
        let mut state = self.state();
        state.list_calls += 1;
        if let Some(e) = state.list_error.clone() {
            return Err(e);
        }
        Ok(PortList {
            inputs: state.inputs.clone(),
            outputs: state.outputs.clone(),
        })
    }

    fn probe(&mut self) -> Result<(), PortError> {
        let mut state = self.state();
        state.probe_calls += 1;
        match state.probe_error.clone() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn open_input(&mut self, port: &str, sink: InputSender) -> Result<Box<dyn InputHandle>, PortError> {
        let mut state = self.state();
        if let Some(e) = state.open_input_error.clone() {
            return Err(e);
        }
        if !state.inputs.iter().any(|name| name == port) {
            return Err(PortError::NotFound { port: port.to_string() });
        }
        state.open_inputs.push(port.to_string());
        state.input_sink = Some(sink);
        Ok(Box::new(MockInput {
            name: port.to_string(),
            state: self.state.clone(),
        }))
    }

    fn open_output(&mut self, port: &str) -> Result<Box<dyn OutputHandle>, PortError> {
        let mut state = self.state();
        if let Some(e) = state.open_output_error.clone() {
            return Err(e);
        }
        if !state.outputs.iter().any(|name| name == port) {
            return Err(PortError::NotFound { port: port.to_string() });
        }
        state.open_outputs.push(port.to_string());
        Ok(Box::new(MockOutput {
            name: port.to_string(),
            state: self.state.clone(),
            is_virtual: false,
        }))
    }

    fn create_virtual_output(&mut self, name: &str) -> Result<Box<dyn OutputHandle>, PortError> {
        let mut state = self.state();
        if let Some(e) = state.virtual_error.clone() {
            return Err(e);
        }
        state.virtual_creations += 1;
        state.open_outputs.push(name.to_string());
        Ok(Box::new(MockOutput {
            name: name.to_string(),
            state: self.state.clone(),
            is_virtual: true,
        }))
    }
}

struct MockInput {
    name: String,
    state: Arc<Mutex<MockState>>,
}

impl InputHandle for MockInput {
    fn port_name(&self) -> &str {
        &self.name
    }

    fn close(self: Box<Self>) {
        let mut state = self.state.lock().unwrap();
        state.open_inputs.retain(|name| name != &self.name);
        state.input_sink = None;
    }
}

struct MockOutput {
    name: String,
    state: Arc<Mutex<MockState>>,
    is_virtual: bool,
}

impl OutputHandle for MockOutput {
    fn port_name(&self) -> &str {
        &self.name
    }

    fn send(&mut self, data: &[u8]) -> Result<(), PortError> {
        let mut state = self.state.lock().unwrap();
        if !self.is_virtual {
            if let Some(e) = state.send_error.clone() {
                return Err(e);
            }
            if !state.outputs.iter().any(|name| name == &self.name) {
                return Err(PortError::Send("device not connected".into()));
            }
        }
        state.sent.push((self.name.clone(), data.to_vec()));
        Ok(())
    }

    fn close(self: Box<Self>) {
        let mut state = self.state.lock().unwrap();
        state.open_outputs.retain(|name| name != &self.name);
    }
}
