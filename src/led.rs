//! Button LED feedback
//!
//! The nanoKONTROL2 lights a button's LED when it receives a CC with the
//! button's own controller number: 127 lights it, 0 turns it off.

use tracing::{debug, trace};

use crate::events::ButtonStateChanged;

/// Narrow send capability for LED updates
pub trait LedSink {
    /// Send an LED CC; `false` when it could not be delivered
    fn send_led_cc(&mut self, cc: u8, is_on: bool) -> bool;
}

#[derive(Debug, Clone)]
pub struct LedController {
    enabled: bool,
}

impl LedController {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Mirror one button state change onto its LED
    pub fn on_button_state<S: LedSink + ?Sized>(&self, sink: &mut S, event: &ButtonStateChanged) -> bool {
        if !self.enabled {
            return false;
        }
        trace!("LED {} -> {}", event.control, if event.is_on { "on" } else { "off" });
        sink.send_led_cc(event.input_cc, event.is_on)
    }

    /// Turn every listed LED off; returns how many sends succeeded
    pub fn all_off<S: LedSink + ?Sized>(&self, sink: &mut S, ccs: &[u8]) -> usize {
        if !self.enabled {
            return 0;
        }
        let sent = ccs.iter().filter(|&&cc| sink.send_led_cc(cc, false)).count();
        debug!("LEDs off: {}/{}", sent, ccs.len());
        sent
    }

    /// Push a full state snapshot to the hardware
    pub fn sync<S: LedSink + ?Sized>(&self, sink: &mut S, states: &[(u8, bool)]) -> usize {
        if !self.enabled {
            return 0;
        }
        let sent = states
            .iter()
            .filter(|&&(cc, is_on)| sink.send_led_cc(cc, is_on))
            .count();
        debug!("LED sync: {}/{}", sent, states.len());
        sent
    }
}
