//! Port discovery
//!
//! Enumeration never fails from the caller's point of view: backend errors
//! are logged, remembered in [`PortDiscovery::last_error`] and reported as an
//! empty [`PortList`].

use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::backend::{MidiBackend, PortList};
use crate::error::PortError;

/// How long a subsystem availability probe stays valid
pub const AVAILABILITY_CACHE_TTL: Duration = Duration::from_secs(5);

pub struct PortDiscovery {
    availability: Option<(bool, Instant)>,
    cache_ttl: Duration,
    last_error: Option<PortError>,
}

impl PortDiscovery {
    pub fn new() -> Self {
        Self::with_cache_ttl(AVAILABILITY_CACHE_TTL)
    }

    pub fn with_cache_ttl(cache_ttl: Duration) -> Self {
        Self {
            availability: None,
            cache_ttl,
            last_error: None,
        }
    }

    /// Enumerate ports; an empty list on any backend failure
    pub fn list_ports<B: MidiBackend + ?Sized>(&mut self, backend: &mut B) -> PortList {
        match backend.list_ports() {
            Ok(ports) => {
                self.last_error = None;
                debug!(
                    "Enumerated {} input(s), {} output(s)",
                    ports.inputs.len(),
                    ports.outputs.len()
                );
                ports
            }
            Err(e) => {
                warn!("Port enumeration failed: {}", e);
                self.availability = None;
                self.last_error = Some(e);
                PortList::default()
            }
        }
    }

    /// Whether the MIDI subsystem can be reached, probing at most once per TTL
    pub fn is_subsystem_available<B: MidiBackend + ?Sized>(&mut self, backend: &mut B, now: Instant) -> bool {
        if let Some((available, checked_at)) = self.availability {
            if now.saturating_duration_since(checked_at) < self.cache_ttl {
                return available;
            }
        }

        let available = match backend.probe() {
            Ok(()) => true,
            Err(e) => {
                debug!("Subsystem probe failed: {}", e);
                self.last_error = Some(e);
                false
            }
        };
        self.availability = Some((available, now));
        available
    }

    /// Error from the most recent failed enumeration or probe, cleared by
    /// the next successful enumeration
    pub fn last_error(&self) -> Option<&PortError> {
        self.last_error.as_ref()
    }
}

impl Default for PortDiscovery {
    fn default() -> Self {
        Self::new()
    }
}

/// First name that belongs to `device_name`
///
/// Matches case-insensitively when the name equals `device_name` or starts
/// with it followed by `:` or a space (ALSA reports
/// `nanoKONTROL2:nanoKONTROL2 MIDI 1 20:0`, CoreMIDI `nanoKONTROL2 SLIDER/KNOB`).
pub fn find_device_name_match<'a, I>(names: I, device_name: &str) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a String>,
{
    let pattern = device_name.to_lowercase();
    names
        .into_iter()
        .find(|name| {
            let lower = name.to_lowercase();
            match lower.strip_prefix(&pattern) {
                Some(rest) => rest.is_empty() || rest.starts_with(':') || rest.starts_with(' '),
                None => false,
            }
        })
        .map(String::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::mock::MockBackend;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_name_match_alsa_style() {
        let ports = names(&["Midi Through:Midi Through Port-0 14:0", "nanoKONTROL2:nanoKONTROL2 MIDI 1 20:0"]);
        assert_eq!(
            find_device_name_match(&ports, "nanoKONTROL2"),
            Some("nanoKONTROL2:nanoKONTROL2 MIDI 1 20:0")
        );
    }

    #[test]
    fn test_name_match_is_case_insensitive() {
        let ports = names(&["NANOKONTROL2 SLIDER/KNOB"]);
        assert_eq!(find_device_name_match(&ports, "nanoKONTROL2"), Some("NANOKONTROL2 SLIDER/KNOB"));
    }

    #[test]
    fn test_name_match_requires_separator() {
        let ports = names(&["nanoKONTROL2x", "nanoKONTROL", "Other nanoKONTROL2"]);
        assert_eq!(find_device_name_match(&ports, "nanoKONTROL2"), None);

        let exact = names(&["nanoKONTROL2"]);
        assert_eq!(find_device_name_match(&exact, "nanoKONTROL2"), Some("nanoKONTROL2"));
    }

    #[test]
    fn test_name_match_takes_first() {
        let ports = names(&["nanoKONTROL2 1", "nanoKONTROL2 2"]);
        assert_eq!(find_device_name_match(&ports, "nanokontrol2"), Some("nanoKONTROL2 1"));
    }

    #[test]
    fn test_list_ports_swallows_errors() {
        let mut backend = MockBackend::with_device("nanoKONTROL2");
        let mut discovery = PortDiscovery::new();

        let ports = discovery.list_ports(&mut backend);
        assert_eq!(ports.inputs.len(), 2);
        assert!(ports.inputs.iter().any(|name| name == backend.device_input()));
        assert!(discovery.last_error().is_none());

        backend.state().list_error = Some(PortError::Init("could not create ALSA sequencer client".into()));
        assert!(discovery.list_ports(&mut backend).is_empty());
        assert!(discovery.last_error().is_some_and(PortError::is_subsystem_failure));

        backend.state().list_error = None;
        discovery.list_ports(&mut backend);
        assert!(discovery.last_error().is_none());
    }

    #[test]
    fn test_availability_is_cached() {
        let mut backend = MockBackend::with_device("nanoKONTROL2");
        let mut discovery = PortDiscovery::with_cache_ttl(Duration::from_secs(5));
        let t0 = Instant::now();

        assert!(discovery.is_subsystem_available(&mut backend, t0));
        backend.state().probe_error = Some(PortError::Init("down".into()));

        // Still cached
        assert!(discovery.is_subsystem_available(&mut backend, t0 + Duration::from_secs(1)));
        assert_eq!(backend.state().probe_calls, 1);

        // Expired
        assert!(!discovery.is_subsystem_available(&mut backend, t0 + Duration::from_secs(6)));
        assert_eq!(backend.state().probe_calls, 2);
    }
}
