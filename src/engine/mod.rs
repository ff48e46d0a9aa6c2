//! Remap engine
//!
//! Routes hardware CC messages through the active [`MappingConfig`]:
//! `(channel, cc, value)` in, `(channel, cc, value)` out, or nothing when the
//! control is unmapped. Owns the per-button toggle state.
//!
//! The lookup table is derived from the mapping and is always rebuilt in
//! full on [`RemapEngine::load`], then swapped in. It is never patched in
//! place, so a reload is all-or-nothing.

use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info, trace};

use crate::error::MappingError;
use crate::events::{ButtonStateChanged, Emitter, ProcessedMessage};
use crate::mapping::{Behavior, ControlId, MappingConfig, MappingEntry, PRESS_THRESHOLD};


/// One row of the derived lookup table
#[derive(Debug, Clone)]
struct LookupEntry {
    entry: MappingEntry,
    control: ControlId,
    name: String,
    /// `None` for continuous controls
    behavior: Option<Behavior>,
}

impl LookupEntry {
    fn is_button(&self) -> bool {
        self.behavior.is_some()
    }
}

type LookupTable = HashMap<u8, LookupEntry>;

fn build_lookup(config: &MappingConfig) -> LookupTable {
    config
        .controls()
        .into_iter()
        .map(|(control, entry)| {
            let behavior = if control.is_button() {
                entry.behavior.or(control.default_behavior())
            } else {
                None
            };
            let row = LookupEntry {
                entry: entry.clone(),
                control,
                name: control.qualified_name(),
                behavior,
            };
            (entry.input_cc, row)
        })
        .collect()
}

/// Stateful CC router
pub struct RemapEngine {
    config: Option<MappingConfig>,
    table: LookupTable,
    /// Keyed by inputCC; ordered so bulk resets emit deterministically
    button_states: BTreeMap<u8, bool>,
    cc_events: Emitter<ProcessedMessage>,
    button_events: Emitter<ButtonStateChanged>,
}

impl RemapEngine {
    /// Create an engine with an empty table; every input is unmapped until
    /// [`load`](Self::load) succeeds
    pub fn new(
        cc_events: Emitter<ProcessedMessage>,
        button_events: Emitter<ButtonStateChanged>,
    ) -> Self {
        Self {
            config: None,
            table: LookupTable::new(),
            button_states: BTreeMap::new(),
            cc_events,
            button_events,
        }
    }

    /// Replace the active mapping
    ///
    /// Every button starts out off, except buttons whose inputCC was also a
    /// button in the previous mapping: those keep their state. An invalid
    /// mapping is rejected and the current one stays active.
    pub fn load(&mut self, config: MappingConfig) -> Result<(), MappingError> {
        config.validate()?;

        let table = build_lookup(&config);
        let button_states: BTreeMap<u8, bool> = table
            .iter()
            .filter(|(_, row)| row.is_button())
            .map(|(&cc, _)| {
                let was_button = self.table.get(&cc).is_some_and(LookupEntry::is_button);
                let state = was_button && self.button_state(cc);
                (cc, state)
            })
            .collect();

        let preserved = button_states.values().filter(|on| **on).count();
        self.table = table;
        self.button_states = button_states;
        self.config = Some(config);

        info!(
            "Mapping loaded: {} controls, {} button states preserved",
            self.table.len(),
            preserved
        );
        Ok(())
    }

    /// The active mapping, if one has been loaded
    pub fn config(&self) -> Option<&MappingConfig> {
        self.config.as_ref()
    }

    /// Number of entries in the lookup table
    pub fn mapping_count(&self) -> usize {
        self.table.len()
    }

    /// Qualified control name for an inputCC
    pub fn control_name(&self, input_cc: u8) -> Option<&str> {
        self.table.get(&input_cc).map(|row| row.name.as_str())
    }

    /// Button inputCCs that have a hardware LED, ascending
    pub fn led_ccs(&self) -> Vec<u8> {
        let mut ccs: Vec<u8> = self
            .table
            .iter()
            .filter(|(_, row)| row.is_button() && row.control.has_led())
            .map(|(&cc, _)| cc)
            .collect();
        ccs.sort_unstable();
        ccs
    }

    /// Snapshot of all tracked button states, ascending by inputCC
    pub fn button_states(&self) -> Vec<(u8, bool)> {
        self.button_states.iter().map(|(&cc, &on)| (cc, on)).collect()
    }

    /// Route one hardware CC
    ///
    /// The hardware channel is not part of the lookup key. Returns `None`
    /// for unmapped controls (the raw value must not be forwarded) and for
    /// toggle releases.
    pub fn process_input(&mut self, channel: u8, cc: u8, value: u8) -> Option<ProcessedMessage> {
        let Some(row) = self.table.get(&cc) else {
            trace!("Unmapped CC ch:{} cc:{} v:{}", channel + 1, cc, value);
            return None;
        };
        let value = value.min(127);

        let (out_value, button_state) = match row.behavior {
            None => (value, None),
            Some(Behavior::Toggle) => {
                if value < PRESS_THRESHOLD {
                    return None;
                }
                let is_on = !self.button_states.get(&cc).copied().unwrap_or(false);
                (button_value(&row.entry, is_on), Some(is_on))
            }
            Some(Behavior::Momentary) => {
                let is_on = value >= PRESS_THRESHOLD;
                (button_value(&row.entry, is_on), Some(is_on))
            }
        };

        let message = ProcessedMessage {
            input_cc: cc,
            output_cc: row.entry.output_cc,
            channel: row.entry.channel,
            value: out_value,
            control: row.name.clone(),
            is_button: row.is_button(),
            button_state,
            label: row.entry.label.clone(),
        };

        if let Some(is_on) = button_state {
            self.button_states.insert(cc, is_on);
            self.button_events.emit(ButtonStateChanged {
                input_cc: cc,
                is_on,
                control: message.control.clone(),
            });
        }

        debug!(
            "{} cc:{} v:{} -> ch:{} cc:{} v:{}",
            message.control, cc, value, message.channel, message.output_cc, message.value
        );
        self.cc_events.emit(message.clone());
        Some(message)
    }

    /// Route a manually driven value (UI or command line) for a named control
    ///
    /// Unlike [`process_input`](Self::process_input), continuous controls are
    /// scaled into their `minValue..=maxValue` range here. Buttons treat
    /// values >= 64 as on.
    pub fn process_manual(&mut self, control: &str, value: u8) -> Option<ProcessedMessage> {
        let id = ControlId::parse(control)?;
        let cc = self.config.as_ref()?.entry(id)?.input_cc;
        let row = self.table.get(&cc)?.clone();

        let (out_value, button_state) = if row.is_button() {
            let is_on = value >= PRESS_THRESHOLD;
            self.set_button_state(cc, is_on);
            (button_value(&row.entry, is_on), Some(is_on))
        } else {
            (row.entry.scale(value), None)
        };

        let message = ProcessedMessage {
            input_cc: cc,
            output_cc: row.entry.output_cc,
            channel: row.entry.channel,
            value: out_value,
            control: row.name,
            is_button: button_state.is_some(),
            button_state,
            label: row.entry.label,
        };
        self.cc_events.emit(message.clone());
        Some(message)
    }

    /// Tracked state of a button; `false` when untracked
    pub fn button_state(&self, input_cc: u8) -> bool {
        self.button_states.get(&input_cc).copied().unwrap_or(false)
    }

    /// Override a button's state, emitting a change event only when it differs
    pub fn set_button_state(&mut self, input_cc: u8, is_on: bool) {
        let Some(row) = self.table.get(&input_cc).filter(|row| row.is_button()) else {
            debug!("Ignoring state override for non-button CC {}", input_cc);
            return;
        };

        let previous = self.button_states.insert(input_cc, is_on).unwrap_or(false);
        if previous != is_on {
            self.button_events.emit(ButtonStateChanged {
                input_cc,
                is_on,
                control: row.name.clone(),
            });
        }
    }

    /// Turn every lit button off, emitting one event per button that flips
    pub fn reset_all_button_states(&mut self) {
        let mut flipped = 0;
        for (&cc, state) in self.button_states.iter_mut().filter(|(_, on)| **on) {
            *state = false;
            flipped += 1;
            if let Some(row) = self.table.get(&cc) {
                self.button_events.emit(ButtonStateChanged {
                    input_cc: cc,
                    is_on: false,
                    control: row.name.clone(),
                });
            }
        }
        debug!("Reset {} button states", flipped);
    }
}

fn button_value(entry: &MappingEntry, is_on: bool) -> u8 {
    if is_on {
        entry.on_value()
    } else {
        entry.off_value()
    }
}
