//! Error types for the port backend and the mapping model.

use thiserror::Error;

/// Error text fragments the platform MIDI layer produces when the subsystem
/// itself is unusable (no sequencer, no memory, missing device node,
/// missing permissions). Matched case-insensitively.
pub const SUBSYSTEM_FAILURE_SIGNATURES: &[&str] = &[
    "could not be initialized",
    "could not create alsa sequencer",
    "cannot allocate memory",
    "out of memory",
    "no such file or directory",
    "/dev/snd/seq",
    "permission denied",
];

/// Whether an error message matches a known subsystem-failure signature
pub fn is_subsystem_failure(message: &str) -> bool {
    let lower = message.to_lowercase();
    SUBSYSTEM_FAILURE_SIGNATURES
        .iter()
        .any(|signature| lower.contains(signature))
}

/// Failures reported by a [`crate::device::MidiBackend`]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PortError {
    #[error("MIDI subsystem error: {0}")]
    Init(String),

    #[error("MIDI port '{port}' not available")]
    NotFound { port: String },

    #[error("Failed to open MIDI port '{port}': {reason}")]
    Open { port: String, reason: String },

    #[error("MIDI send failed: {0}")]
    Send(String),

    #[error("Virtual MIDI ports are not supported on this platform")]
    VirtualUnsupported,
}

impl PortError {
    /// True when this error means the MIDI subsystem is broken, not just that
    /// the device is absent
    pub fn is_subsystem_failure(&self) -> bool {
        match self {
            PortError::Init(_) => true,
            PortError::NotFound { .. } | PortError::VirtualUnsupported => false,
            PortError::Open { reason, .. } => is_subsystem_failure(reason),
            PortError::Send(reason) => is_subsystem_failure(reason),
        }
    }
}

impl From<midir::InitError> for PortError {
    fn from(e: midir::InitError) -> Self {
        PortError::Init(e.to_string())
    }
}

impl From<midir::SendError> for PortError {
    fn from(e: midir::SendError) -> Self {
        PortError::Send(e.to_string())
    }
}

/// Structural problems in a mapping table
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MappingError {
    #[error("{control}: {field} {value} is out of range (must be {min}-{max})")]
    OutOfRange {
        control: String,
        field: &'static str,
        value: u8,
        min: u8,
        max: u8,
    },

    #[error("inputCC {cc} is used by both {first} and {second}")]
    DuplicateInputCc { cc: u8, first: String, second: String },

    #[error("{control}: {field} is only valid on {expected} controls")]
    FieldNotAllowed {
        control: String,
        field: &'static str,
        expected: &'static str,
    },

    #[error("{control}: minValue {min} is greater than maxValue {max}")]
    InvertedRange { control: String, min: u8, max: u8 },
}
