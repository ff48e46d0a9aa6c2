//! MIDI backend seam
//!
//! The connection manager only talks to hardware through [`MidiBackend`].
//! [`MidirBackend`] is the real implementation; tests substitute a scripted
//! backend.

use midir::{Ignore, MidiInput, MidiInputConnection, MidiOutput, MidiOutputConnection};
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::error::PortError;
use crate::midi::format_hex;

/// Raw message received from the hardware input port
#[derive(Debug, Clone)]
pub struct HardwareInput {
    pub received_at: Instant,
    pub data: Vec<u8>,
}

/// Where input callbacks deliver raw messages
pub type InputSender = mpsc::Sender<HardwareInput>;

/// Snapshot of enumerated port names, in enumeration order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortList {
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
}

impl PortList {
    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty() && self.outputs.is_empty()
    }
}

/// An open input port; dropping or closing it stops delivery
pub trait InputHandle {
    fn port_name(&self) -> &str;
    fn close(self: Box<Self>);
}

/// An open output port (hardware or virtual)
pub trait OutputHandle {
    fn port_name(&self) -> &str;
    fn send(&mut self, data: &[u8]) -> Result<(), PortError>;
    fn close(self: Box<Self>);
}

/// Access to the platform MIDI subsystem
pub trait MidiBackend {
    /// Enumerate input and output port names. Expensive: may allocate a
    /// subsystem client per call.
    fn list_ports(&mut self) -> Result<PortList, PortError>;

    /// Cheapest possible check that the subsystem can be reached
    fn probe(&mut self) -> Result<(), PortError>;

    /// Open an input port by exact name, delivering messages to `sink`
    fn open_input(&mut self, port: &str, sink: InputSender) -> Result<Box<dyn InputHandle>, PortError>;

    /// Open an output port by exact name
    fn open_output(&mut self, port: &str) -> Result<Box<dyn OutputHandle>, PortError>;

    /// Create a software output port other applications can read from
    fn create_virtual_output(&mut self, name: &str) -> Result<Box<dyn OutputHandle>, PortError>;
}

/// [`MidiBackend`] on top of `midir`
pub struct MidirBackend {
    client_name: String,
}

impl MidirBackend {
    pub fn new(client_name: impl Into<String>) -> Self {
        Self { client_name: client_name.into() }
    }
}

impl MidiBackend for MidirBackend {
    fn list_ports(&mut self) -> Result<PortList, PortError> {
        let midi_in = MidiInput::new(&format!("{}-scan", self.client_name))?;
        let inputs = midi_in
            .ports()
            .iter()
            .filter_map(|port| midi_in.port_name(port).ok())
            .collect();

        let midi_out = MidiOutput::new(&format!("{}-scan", self.client_name))?;
        let outputs = midi_out
            .ports()
            .iter()
            .filter_map(|port| midi_out.port_name(port).ok())
            .collect();

        Ok(PortList { inputs, outputs })
    }

    fn probe(&mut self) -> Result<(), PortError> {
        MidiOutput::new(&format!("{}-probe", self.client_name))?;
        Ok(())
    }

    fn open_input(&mut self, port: &str, sink: InputSender) -> Result<Box<dyn InputHandle>, PortError> {
        let mut midi_in = MidiInput::new(&self.client_name)?;
        midi_in.ignore(Ignore::None);

        let target = midi_in
            .ports()
            .into_iter()
            .find(|p| midi_in.port_name(p).ok().as_deref() == Some(port))
            .ok_or_else(|| PortError::NotFound { port: port.to_string() })?;

        let connection = midi_in
            .connect(
                &target,
                &format!("{}-in", self.client_name),
                move |_timestamp, data, _| {
                    trace!("RX {}", format_hex(data));
                    // Never block the backend thread; drop on overflow
                    let _ = sink.try_send(HardwareInput {
                        received_at: Instant::now(),
                        data: data.to_vec(),
                    });
                },
                (),
            )
            .map_err(|e| PortError::Open {
                port: port.to_string(),
                reason: e.to_string(),
            })?;

        debug!("Hardware input opened: '{}'", port);
        Ok(Box::new(MidirInput {
            name: port.to_string(),
            connection,
        }))
    }

    fn open_output(&mut self, port: &str) -> Result<Box<dyn OutputHandle>, PortError> {
        let midi_out = MidiOutput::new(&self.client_name)?;

        let target = midi_out
            .ports()
            .into_iter()
            .find(|p| midi_out.port_name(p).ok().as_deref() == Some(port))
            .ok_or_else(|| PortError::NotFound { port: port.to_string() })?;

        let connection = midi_out
            .connect(&target, &format!("{}-out", self.client_name))
            .map_err(|e| PortError::Open {
                port: port.to_string(),
                reason: e.to_string(),
            })?;

        debug!("Hardware output opened: '{}'", port);
        Ok(Box::new(MidirOutput {
            name: port.to_string(),
            connection,
        }))
    }

    #[cfg(unix)]
    fn create_virtual_output(&mut self, name: &str) -> Result<Box<dyn OutputHandle>, PortError> {
        use midir::os::unix::VirtualOutput;

        let midi_out = MidiOutput::new(&self.client_name)?;
        let connection = midi_out.create_virtual(name).map_err(|e| PortError::Open {
            port: name.to_string(),
            reason: e.to_string(),
        })?;

        debug!("Virtual output created: '{}'", name);
        Ok(Box::new(MidirOutput {
            name: name.to_string(),
            connection,
        }))
    }

    #[cfg(not(unix))]
    fn create_virtual_output(&mut self, _name: &str) -> Result<Box<dyn OutputHandle>, PortError> {
        Err(PortError::VirtualUnsupported)
    }
}

struct MidirInput {
    name: String,
    connection: MidiInputConnection<()>,
}

impl InputHandle for MidirInput {
    fn port_name(&self) -> &str {
        &self.name
    }

    fn close(self: Box<Self>) {
        let _ = self.connection.close();
    }
}

struct MidirOutput {
    name: String,
    connection: MidiOutputConnection,
}

impl OutputHandle for MidirOutput {
    fn port_name(&self) -> &str {
        &self.name
    }

    fn send(&mut self, data: &[u8]) -> Result<(), PortError> {
        self.connection.send(data)?;
        Ok(())
    }

    fn close(self: Box<Self>) {
        let _ = self.connection.close();
    }
}
