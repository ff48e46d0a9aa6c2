//! nanoKONTROL2 Remap
//!
//! CC remapper for the KORG nanoKONTROL2: hardware CCs are rewritten through
//! a mapping preset and re-emitted on a virtual MIDI port, button LEDs follow
//! toggle/momentary state, and the device may be unplugged and replugged at
//! any time.

pub mod app;
pub mod cli;
pub mod config;
pub mod device;
pub mod engine;
pub mod error;
pub mod events;
pub mod led;
pub mod mapping;
pub mod midi;
pub mod paths;
pub mod sniffer;

/// MIDI client name registered with the platform subsystem
pub const CLIENT_NAME: &str = "nanokontrol-remap";
