//! Events emitted by the remapper core
//!
//! Each category travels on its own typed channel so a consumer can only
//! subscribe to what it understands:
//! - [`ConnectionEvent`] from the connection manager
//! - [`ProcessedMessage`] (cc processed) from the remap engine
//! - [`ButtonStateChanged`] from the remap engine

use std::fmt;
use tokio::sync::mpsc;

/// Fire-and-forget sender for one event category
///
/// Emitting never blocks and never fails: if nobody is listening the event
/// is dropped.
#[derive(Debug)]
pub struct Emitter<T> {
    tx: Option<mpsc::UnboundedSender<T>>,
}

impl<T> Emitter<T> {
    /// Create an emitter together with its receiving end
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<T>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// An emitter with no subscriber
    pub fn detached() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, event: T) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}

impl<T> Clone for Emitter<T> {
    fn clone(&self) -> Self {
        Self { tx: self.tx.clone() }
    }
}

/// Why the hardware connection went away
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// `disconnect()` was called
    Manual,
    /// Heartbeat failed or the ports vanished from enumeration
    DeviceDisconnected,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::Manual => write!(f, "manual"),
            DisconnectReason::DeviceDisconnected => write!(f, "device disconnected"),
        }
    }
}

/// Severity of a reported error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorLevel {
    /// Degraded operation, everything else keeps working
    Warning,
    Error,
}

/// Connection lifecycle events
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connected { input_port: String, output_port: String },
    Disconnected { reason: DisconnectReason },
    PortsChanged { inputs: Vec<String>, outputs: Vec<String> },
    Error { message: String, level: ErrorLevel },
}

/// Result of routing one CC through the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedMessage {
    pub input_cc: u8,
    pub output_cc: u8,
    /// Output channel, 1-16
    pub channel: u8,
    pub value: u8,
    /// Qualified control name, e.g. `track3.solo`
    pub control: String,
    pub is_button: bool,
    /// New toggle/press state, buttons only
    pub button_state: Option<bool>,
    pub label: Option<String>,
}

/// A button's tracked on/off state changed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ButtonStateChanged {
    pub input_cc: u8,
    pub is_on: bool,
    pub control: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emitter_delivers_in_order() {
        let (emitter, mut rx) = Emitter::channel();
        emitter.emit(1);
        emitter.clone().emit(2);

        assert_eq!(rx.try_recv().ok(), Some(1));
        assert_eq!(rx.try_recv().ok(), Some(2));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_emitter_without_subscriber() {
        Emitter::<u8>::detached().emit(1);

        let (emitter, rx) = Emitter::channel();
        drop(rx);
        emitter.emit(2u8);
    }

    #[test]
    fn test_disconnect_reason_display() {
        assert_eq!(DisconnectReason::Manual.to_string(), "manual");
        assert_eq!(DisconnectReason::DeviceDisconnected.to_string(), "device disconnected");
    }
}
