//! Hardware device access
//!
//! - [`backend`]: the platform MIDI seam (`midir`)
//! - [`discovery`]: port enumeration and device-name matching
//! - [`connection`]: connection lifecycle and hotplug detection

pub mod backend;
pub mod connection;
pub mod discovery;

#[cfg(test)]
pub(crate) mod mock;

pub use backend::{HardwareInput, InputSender, MidiBackend, MidirBackend, PortList};
pub use connection::{ConnectionManager, ConnectionSettings, ConnectionState};
pub use discovery::{find_device_name_match, PortDiscovery};
