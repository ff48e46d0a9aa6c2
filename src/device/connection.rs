//! Connection manager and hotplug state machine
//!
//! Owns the hardware input/output handles and the virtual output handle.
//! Two states, `Disconnected` and `Connected`, plus an orthogonal
//! subsystem-availability latch.
//!
//! Hotplug polling is driven from outside through [`ConnectionManager::on_poll_tick`]
//! and [`ConnectionManager::on_debounce_elapsed`]; the manager only keeps the
//! single pending-debounce slot. While connected, a tick costs one heartbeat
//! send and no enumeration: every enumeration may allocate a sequencer client
//! and those run out over long uptimes.

use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

use super::backend::{InputHandle, InputSender, MidiBackend, MidirBackend, OutputHandle, PortList};
use super::discovery::{find_device_name_match, PortDiscovery};
use crate::error::PortError;
use crate::events::{ConnectionEvent, DisconnectReason, Emitter, ErrorLevel};
use crate::led::LedSink;
use crate::midi::{MidiMessage, DATA_MAX};

/// "Data increment" controller, sent with value 0 as a liveness probe.
/// The nanoKONTROL2 ignores it; other hardware may not.
pub const DEFAULT_HEARTBEAT_CC: u8 = 96;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(2000);
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    /// Device name pattern used when no explicit ports are configured
    pub device_name: String,
    pub input_port: Option<String>,
    pub output_port: Option<String>,
    pub virtual_port_name: String,
    /// 0-indexed channel for LED CCs and the heartbeat
    pub led_channel: u8,
    pub heartbeat_cc: u8,
    pub debounce: Duration,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            device_name: "nanoKONTROL2".to_string(),
            input_port: None,
            output_port: None,
            virtual_port_name: "nanoKONTROL2 Remap".to_string(),
            led_channel: 0,
            heartbeat_cc: DEFAULT_HEARTBEAT_CC,
            debounce: DEFAULT_DEBOUNCE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connected { input_port: String, output_port: String },
}

#[derive(Debug, Clone)]
struct PendingPortChange {
    ports: PortList,
    deadline: Instant,
}

pub struct ConnectionManager<B: MidiBackend = MidirBackend> {
    backend: B,
    discovery: PortDiscovery,
    settings: ConnectionSettings,
    state: ConnectionState,
    input: Option<Box<dyn InputHandle>>,
    output: Option<Box<dyn OutputHandle>>,
    virtual_out: Option<Box<dyn OutputHandle>>,
    /// Set after a failed virtual port creation; cleared on subsystem recovery
    virtual_failed: bool,
    subsystem_available: bool,
    /// Hotplug baseline
    last_ports: Option<PortList>,
    pending: Option<PendingPortChange>,
    polling: bool,
    input_tx: InputSender,
    events: Emitter<ConnectionEvent>,
}

impl<B: MidiBackend> ConnectionManager<B> {
    pub fn new(
        backend: B,
        settings: ConnectionSettings,
        input_tx: InputSender,
        events: Emitter<ConnectionEvent>,
    ) -> Self {
        Self {
            backend,
            discovery: PortDiscovery::new(),
            settings,
            state: ConnectionState::Disconnected,
            input: None,
            output: None,
            virtual_out: None,
            virtual_failed: false,
            subsystem_available: true,
            last_ports: None,
            pending: None,
            polling: false,
            input_tx,
            events,
        }
    }

    pub fn settings(&self) -> &ConnectionSettings {
        &self.settings
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.state, ConnectionState::Connected { .. })
    }

    /// `(input, output)` port names while connected
    pub fn current_ports(&self) -> Option<(&str, &str)> {
        match &self.state {
            ConnectionState::Connected { input_port, output_port } => Some((input_port, output_port)),
            ConnectionState::Disconnected => None,
        }
    }

    pub fn is_subsystem_available(&self) -> bool {
        self.subsystem_available
    }

    pub fn has_virtual_port(&self) -> bool {
        self.virtual_out.is_some()
    }

    pub fn is_polling(&self) -> bool {
        self.polling
    }

    /// When the pending port-change reaction is due, if one is pending
    pub fn debounce_deadline(&self) -> Option<Instant> {
        self.pending.as_ref().map(|p| p.deadline)
    }

    /// Last enumeration the hotplug logic acted on
    pub fn last_ports(&self) -> Option<&PortList> {
        self.last_ports.as_ref()
    }

    /// Enumerate ports for diagnostics; does not touch the hotplug baseline
    pub fn list_ports(&mut self) -> PortList {
        self.discovery.list_ports(&mut self.backend)
    }

    /// Connect to the configured ports (or the first device-name match)
    pub fn connect_configured(&mut self) -> bool {
        let input = self.settings.input_port.clone();
        let output = self.settings.output_port.clone();
        self.connect_inner(input, output, None)
    }

    /// Connect, optionally to explicit ports
    ///
    /// Callable in either state; an existing hardware connection is torn
    /// down first while the virtual port stays open. Never fails loudly:
    /// problems are reported as [`ConnectionEvent::Error`].
    pub fn connect(&mut self, input_hint: Option<&str>, output_hint: Option<&str>) -> bool {
        self.connect_inner(
            input_hint.map(str::to_owned),
            output_hint.map(str::to_owned),
            None,
        )
    }

    /// `known_ports` is an enumeration the caller already holds; resolution
    /// then never enumerates again
    fn connect_inner(
        &mut self,
        input_hint: Option<String>,
        output_hint: Option<String>,
        known_ports: Option<PortList>,
    ) -> bool {
        if self.input.is_some() || self.output.is_some() {
            debug!("Tearing down current hardware ports before reconnecting");
            self.close_hardware_ports();
        }
        self.state = ConnectionState::Disconnected;

        let Some((input_name, output_name)) = self.resolve_ports(input_hint, output_hint, known_ports) else {
            if self.subsystem_available {
                self.emit_error(format!("{} not found", self.settings.device_name), ErrorLevel::Error);
            } else {
                debug!("Device not found while the MIDI subsystem is unavailable");
            }
            return false;
        };

        let input = match self.backend.open_input(&input_name, self.input_tx.clone()) {
            Ok(handle) => handle,
            Err(e) => {
                self.report_open_failure("input", &e);
                return false;
            }
        };

        let output = match self.backend.open_output(&output_name) {
            Ok(handle) => handle,
            Err(e) => {
                input.close();
                self.report_open_failure("output", &e);
                return false;
            }
        };

        self.input = Some(input);
        self.output = Some(output);
        self.ensure_virtual_port();

        // A port change queued before this connect describes a stale world
        if self.pending.take().is_some() {
            debug!("Dropping pending port change after connect");
        }

        info!("Connected: in='{}' out='{}'", input_name, output_name);
        self.state = ConnectionState::Connected {
            input_port: input_name.clone(),
            output_port: output_name.clone(),
        };
        self.events.emit(ConnectionEvent::Connected {
            input_port: input_name,
            output_port: output_name,
        });
        true
    }

    fn resolve_ports(
        &mut self,
        input_hint: Option<String>,
        output_hint: Option<String>,
        known_ports: Option<PortList>,
    ) -> Option<(String, String)> {
        if known_ports.is_none() {
            if let (Some(input), Some(output)) = (&input_hint, &output_hint) {
                return Some((input.clone(), output.clone()));
            }
        }

        let ports = match known_ports {
            Some(ports) => ports,
            None => {
                let ports = self.discovery.list_ports(&mut self.backend);
                self.note_enumeration(&ports);
                self.last_ports = Some(ports.clone());
                ports
            }
        };

        let input = match input_hint {
            Some(hint) => ports.inputs.contains(&hint).then_some(hint),
            None => self.match_device(&ports.inputs),
        };
        let output = match output_hint {
            Some(hint) => ports.outputs.contains(&hint).then_some(hint),
            None => self.match_device(&ports.outputs),
        };
        input.zip(output)
    }

    /// Device-name match, skipping our own virtual port
    fn match_device(&self, names: &[String]) -> Option<String> {
        let virtual_name = self.settings.virtual_port_name.to_lowercase();
        let candidates: Vec<&String> = names
            .iter()
            .filter(|name| !name.to_lowercase().contains(&virtual_name))
            .collect();
        find_device_name_match(candidates, &self.settings.device_name).map(str::to_owned)
    }

    fn report_open_failure(&mut self, direction: &str, error: &PortError) {
        if error.is_subsystem_failure() {
            if self.subsystem_available {
                warn!("MIDI subsystem unavailable: {}", error);
            }
            self.subsystem_available = false;
        }
        self.emit_error(format!("Hardware {} failed: {}", direction, error), ErrorLevel::Error);
    }

    fn ensure_virtual_port(&mut self) {
        if self.virtual_out.is_some() || self.virtual_failed {
            return;
        }
        match self.backend.create_virtual_output(&self.settings.virtual_port_name) {
            Ok(handle) => {
                info!("Virtual output ready: '{}'", handle.port_name());
                self.virtual_out = Some(handle);
            }
            Err(e) => {
                self.virtual_failed = true;
                warn!("Virtual output unavailable, remapped CCs will not be forwarded: {}", e);
                self.emit_error(
                    format!("Virtual port '{}' unavailable: {}", self.settings.virtual_port_name, e),
                    ErrorLevel::Warning,
                );
            }
        }
    }

    /// Track the subsystem latch from an enumeration result
    fn note_enumeration(&mut self, ports: &PortList) {
        if ports.is_empty() {
            let failed = self
                .discovery
                .last_error()
                .is_some_and(PortError::is_subsystem_failure);
            if failed && self.subsystem_available {
                warn!("MIDI subsystem unavailable, waiting for it to recover");
                self.subsystem_available = false;
            }
        } else if !self.subsystem_available {
            info!("MIDI subsystem available again");
            self.subsystem_available = true;
            self.virtual_failed = false;
        }
    }

    /// Close everything and stop polling; idempotent
    pub fn disconnect(&mut self) {
        self.stop_hotplug();
        let was_connected = self.is_connected();

        self.close_hardware_ports();
        if let Some(virtual_out) = self.virtual_out.take() {
            virtual_out.close();
        }
        self.state = ConnectionState::Disconnected;

        if was_connected {
            info!("Disconnected");
            self.events.emit(ConnectionEvent::Disconnected {
                reason: DisconnectReason::Manual,
            });
        }
    }

    fn close_hardware_ports(&mut self) {
        if let Some(input) = self.input.take() {
            input.close();
        }
        if let Some(output) = self.output.take() {
            output.close();
        }
    }

    fn handle_device_vanished(&mut self) {
        warn!("{} disconnected", self.settings.device_name);
        self.close_hardware_ports();
        self.state = ConnectionState::Disconnected;
        self.events.emit(ConnectionEvent::Disconnected {
            reason: DisconnectReason::DeviceDisconnected,
        });
    }

    /// Value-0 send on the hardware output; `false` when not connected or
    /// the device is gone
    pub fn heartbeat(&mut self) -> bool {
        let Some(output) = self.output.as_mut() else {
            return false;
        };
        let probe = MidiMessage::control_change(self.settings.led_channel, self.settings.heartbeat_cc, 0);
        match output.send(&probe.encode()) {
            Ok(()) => true,
            Err(e) => {
                debug!("Heartbeat failed: {}", e);
                false
            }
        }
    }

    pub fn start_hotplug(&mut self) {
        if !self.polling {
            debug!("Hotplug detection started");
        }
        self.polling = true;
    }

    /// Stop polling and drop any pending debounce
    pub fn stop_hotplug(&mut self) {
        if self.polling {
            debug!("Hotplug detection stopped");
        }
        self.polling = false;
        self.pending = None;
    }

    /// One hotplug poll
    pub fn on_poll_tick(&mut self, now: Instant) {
        if !self.polling {
            return;
        }

        if self.is_connected() {
            if self.heartbeat() {
                trace!("Heartbeat ok");
                return;
            }
            self.handle_device_vanished();
        }

        // While latched down, a cached probe gates the full enumeration
        if !self.subsystem_available && !self.discovery.is_subsystem_available(&mut self.backend, now) {
            trace!("MIDI subsystem still unavailable");
            return;
        }

        let ports = self.discovery.list_ports(&mut self.backend);
        self.note_enumeration(&ports);

        if self.last_ports.as_ref() == Some(&ports) {
            // Churn settled back to the baseline
            self.pending = None;
            if !self.is_connected() {
                let input = self.settings.input_port.clone();
                let output = self.settings.output_port.clone();
                self.connect_inner(input, output, Some(ports));
            }
            return;
        }

        // A different enumeration restarts the window; the same one keeps it
        if self.pending.as_ref().is_some_and(|p| p.ports == ports) {
            trace!("Port change already pending");
        } else {
            debug!("Port change detected, debouncing");
            self.pending = Some(PendingPortChange {
                ports,
                deadline: now + self.settings.debounce,
            });
        }
    }

    /// React to a settled port change once its debounce deadline has passed
    pub fn on_debounce_elapsed(&mut self, now: Instant) {
        if !self.pending.as_ref().is_some_and(|p| now >= p.deadline) {
            return;
        }
        let Some(PendingPortChange { ports, .. }) = self.pending.take() else {
            return;
        };

        info!(
            "MIDI ports changed: {} input(s), {} output(s)",
            ports.inputs.len(),
            ports.outputs.len()
        );
        self.last_ports = Some(ports.clone());
        self.events.emit(ConnectionEvent::PortsChanged {
            inputs: ports.inputs.clone(),
            outputs: ports.outputs.clone(),
        });

        let vanished = match &self.state {
            ConnectionState::Connected { input_port, output_port } => {
                Some(!ports.inputs.contains(input_port) || !ports.outputs.contains(output_port))
            }
            ConnectionState::Disconnected => None,
        };

        match vanished {
            Some(true) => self.handle_device_vanished(),
            Some(false) => {}
            None => {
                let input = self.settings.input_port.clone();
                let output = self.settings.output_port.clone();
                self.connect_inner(input, output, Some(ports));
            }
        }
    }

    /// Send a remapped CC on the virtual output (0-indexed channel, values
    /// clamped)
    pub fn send_virtual(&mut self, channel: u8, cc: u8, value: u8) -> bool {
        let Some(virtual_out) = self.virtual_out.as_mut() else {
            return false;
        };
        let message = MidiMessage::control_change(channel, cc, value);
        match virtual_out.send(&message.encode()) {
            Ok(()) => true,
            Err(e) => {
                debug!("Virtual send failed: {}", e);
                false
            }
        }
    }

    /// Close everything best-effort
    pub fn shutdown(&mut self) {
        self.disconnect();
        debug!("Connection manager shut down");
    }

    fn emit_error(&self, message: String, level: ErrorLevel) {
        self.events.emit(ConnectionEvent::Error { message, level });
    }
}

impl<B: MidiBackend> LedSink for ConnectionManager<B> {
    fn send_led_cc(&mut self, cc: u8, is_on: bool) -> bool {
        let Some(output) = self.output.as_mut() else {
            return false;
        };
        let value = if is_on { DATA_MAX } else { 0 };
        let message = MidiMessage::control_change(self.settings.led_channel, cc, value);
        output.send(&message.encode()).is_ok()
    }
}
