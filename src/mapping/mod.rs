//! Mapping model for the nanoKONTROL2
//!
//! A [`MappingConfig`] always has the same shape: eight channel strips
//! (knob, slider, solo, mute, rec) and eleven transport buttons. Presets are
//! stored as JSON or YAML and validated here before they reach the engine.

pub mod watcher;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use tokio::fs;

use crate::error::MappingError;

pub use watcher::MappingWatcher;

/// Number of channel strips on the device
pub const TRACK_COUNT: usize = 8;

/// Total number of physical controls: 8 strips x 5 controls + 11 transport buttons
pub const CONTROL_COUNT: usize = TRACK_COUNT * TrackControl::ALL.len() + TransportControl::ALL.len();

/// Inputs at or above this value count as a button press
pub const PRESS_THRESHOLD: u8 = 64;

const DEFAULT_ON_VALUE: u8 = 127;
const DEFAULT_OFF_VALUE: u8 = 0;

/// Button behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Behavior {
    /// Each press flips a persisted on/off state
    Toggle,
    /// Output mirrors physical press/release
    Momentary,
}

/// Routing rule for one physical control
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingEntry {
    /// CC the hardware sends for this control (lookup key)
    #[serde(rename = "inputCC")]
    pub input_cc: u8,
    /// CC emitted on the virtual port
    #[serde(rename = "outputCC")]
    pub output_cc: u8,
    /// Output channel, 1-16
    pub channel: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub behavior: Option<Behavior>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_value: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_value: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_value: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub off_value: Option<u8>,
}

impl MappingEntry {
    /// Entry with no optional fields set
    pub fn new(input_cc: u8, output_cc: u8, channel: u8) -> Self {
        Self {
            input_cc,
            output_cc,
            channel,
            behavior: None,
            label: None,
            min_value: None,
            max_value: None,
            on_value: None,
            off_value: None,
        }
    }

    pub fn with_behavior(mut self, behavior: Behavior) -> Self {
        self.behavior = Some(behavior);
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_range(mut self, min: u8, max: u8) -> Self {
        self.min_value = Some(min);
        self.max_value = Some(max);
        self
    }

    pub fn with_button_values(mut self, on: u8, off: u8) -> Self {
        self.on_value = Some(on);
        self.off_value = Some(off);
        self
    }

    /// Output value for a button in the "on" state
    pub fn on_value(&self) -> u8 {
        self.on_value.unwrap_or(DEFAULT_ON_VALUE)
    }

    /// Output value for a button in the "off" state
    pub fn off_value(&self) -> u8 {
        self.off_value.unwrap_or(DEFAULT_OFF_VALUE)
    }

    /// Scale a 0-127 value into `minValue..=maxValue`
    ///
    /// Only applied to manually driven values; hardware input is forwarded
    /// verbatim.
    pub fn scale(&self, value: u8) -> u8 {
        let min = self.min_value.unwrap_or(0) as u32;
        let max = self.max_value.unwrap_or(127) as u32;
        let value = value.min(127) as u32;
        if max <= min {
            return min as u8;
        }
        (min + (value * (max - min) + 63) / 127) as u8
    }
}

/// Controls present on every channel strip
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackControl {
    Knob,
    Slider,
    Solo,
    Mute,
    Rec,
}

impl TrackControl {
    pub const ALL: [TrackControl; 5] = [
        TrackControl::Knob,
        TrackControl::Slider,
        TrackControl::Solo,
        TrackControl::Mute,
        TrackControl::Rec,
    ];

    pub fn name(self) -> &'static str {
        match self {
            TrackControl::Knob => "knob",
            TrackControl::Slider => "slider",
            TrackControl::Solo => "solo",
            TrackControl::Mute => "mute",
            TrackControl::Rec => "rec",
        }
    }

    pub fn is_button(self) -> bool {
        matches!(self, TrackControl::Solo | TrackControl::Mute | TrackControl::Rec)
    }
}

/// Transport section buttons
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportControl {
    TrackLeft,
    TrackRight,
    Cycle,
    MarkerSet,
    MarkerLeft,
    MarkerRight,
    Rewind,
    FastForward,
    Stop,
    Play,
    Record,
}

impl TransportControl {
    pub const ALL: [TransportControl; 11] = [
        TransportControl::TrackLeft,
        TransportControl::TrackRight,
        TransportControl::Cycle,
        TransportControl::MarkerSet,
        TransportControl::MarkerLeft,
        TransportControl::MarkerRight,
        TransportControl::Rewind,
        TransportControl::FastForward,
        TransportControl::Stop,
        TransportControl::Play,
        TransportControl::Record,
    ];

    pub fn name(self) -> &'static str {
        match self {
            TransportControl::TrackLeft => "trackLeft",
            TransportControl::TrackRight => "trackRight",
            TransportControl::Cycle => "cycle",
            TransportControl::MarkerSet => "markerSet",
            TransportControl::MarkerLeft => "markerLeft",
            TransportControl::MarkerRight => "markerRight",
            TransportControl::Rewind => "rewind",
            TransportControl::FastForward => "fastForward",
            TransportControl::Stop => "stop",
            TransportControl::Play => "play",
            TransportControl::Record => "record",
        }
    }

    /// Track and marker navigation buttons have no LED
    pub fn has_led(self) -> bool {
        !matches!(
            self,
            TransportControl::TrackLeft
                | TransportControl::TrackRight
                | TransportControl::MarkerSet
                | TransportControl::MarkerLeft
                | TransportControl::MarkerRight
        )
    }
}

/// Identifies one physical control
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlId {
    /// Strip control; `track` is 1-8
    Track { track: u8, control: TrackControl },
    Transport(TransportControl),
}

impl ControlId {
    pub fn is_button(&self) -> bool {
        match self {
            ControlId::Track { control, .. } => control.is_button(),
            ControlId::Transport(_) => true,
        }
    }

    /// Whether the hardware has an LED for this control
    pub fn has_led(&self) -> bool {
        match self {
            ControlId::Track { control, .. } => control.is_button(),
            ControlId::Transport(control) => control.has_led(),
        }
    }

    /// Behavior used when an entry does not specify one
    pub fn default_behavior(&self) -> Option<Behavior> {
        match self {
            ControlId::Track { control, .. } if control.is_button() => Some(Behavior::Toggle),
            ControlId::Track { .. } => None,
            ControlId::Transport(_) => Some(Behavior::Momentary),
        }
    }

    /// Qualified name such as `track3.solo` or `transport.play`
    pub fn qualified_name(&self) -> String {
        self.to_string()
    }

    /// Parse a qualified control name (case-insensitive)
    pub fn parse(name: &str) -> Option<Self> {
        let (section, control) = name.trim().split_once('.')?;
        let section = section.to_lowercase();

        if section == "transport" {
            return TransportControl::ALL
                .into_iter()
                .find(|c| c.name().eq_ignore_ascii_case(control))
                .map(ControlId::Transport);
        }

        let track: u8 = section.strip_prefix("track")?.parse().ok()?;
        if !(1..=TRACK_COUNT as u8).contains(&track) {
            return None;
        }
        TrackControl::ALL
            .into_iter()
            .find(|c| c.name().eq_ignore_ascii_case(control))
            .map(|control| ControlId::Track { track, control })
    }
}

impl fmt::Display for ControlId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlId::Track { track, control } => write!(f, "track{}.{}", track, control.name()),
            ControlId::Transport(control) => write!(f, "transport.{}", control.name()),
        }
    }
}

/// Mapping for one channel strip
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TrackMapping {
    pub knob: MappingEntry,
    pub slider: MappingEntry,
    pub solo: MappingEntry,
    pub mute: MappingEntry,
    pub rec: MappingEntry,
}

impl TrackMapping {
    pub fn entry(&self, control: TrackControl) -> &MappingEntry {
        match control {
            TrackControl::Knob => &self.knob,
            TrackControl::Slider => &self.slider,
            TrackControl::Solo => &self.solo,
            TrackControl::Mute => &self.mute,
            TrackControl::Rec => &self.rec,
        }
    }

    pub fn entry_mut(&mut self, control: TrackControl) -> &mut MappingEntry {
        match control {
            TrackControl::Knob => &mut self.knob,
            TrackControl::Slider => &mut self.slider,
            TrackControl::Solo => &mut self.solo,
            TrackControl::Mute => &mut self.mute,
            TrackControl::Rec => &mut self.rec,
        }
    }
}

/// Mapping for the transport section
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportMapping {
    pub track_left: MappingEntry,
    pub track_right: MappingEntry,
    pub cycle: MappingEntry,
    pub marker_set: MappingEntry,
    pub marker_left: MappingEntry,
    pub marker_right: MappingEntry,
    pub rewind: MappingEntry,
    pub fast_forward: MappingEntry,
    pub stop: MappingEntry,
    pub play: MappingEntry,
    pub record: MappingEntry,
}

impl TransportMapping {
    pub fn entry(&self, control: TransportControl) -> &MappingEntry {
        match control {
            TransportControl::TrackLeft => &self.track_left,
            TransportControl::TrackRight => &self.track_right,
            TransportControl::Cycle => &self.cycle,
            TransportControl::MarkerSet => &self.marker_set,
            TransportControl::MarkerLeft => &self.marker_left,
            TransportControl::MarkerRight => &self.marker_right,
            TransportControl::Rewind => &self.rewind,
            TransportControl::FastForward => &self.fast_forward,
            TransportControl::Stop => &self.stop,
            TransportControl::Play => &self.play,
            TransportControl::Record => &self.record,
        }
    }

    pub fn entry_mut(&mut self, control: TransportControl) -> &mut MappingEntry {
        match control {
            TransportControl::TrackLeft => &mut self.track_left,
            TransportControl::TrackRight => &mut self.track_right,
            TransportControl::Cycle => &mut self.cycle,
            TransportControl::MarkerSet => &mut self.marker_set,
            TransportControl::MarkerLeft => &mut self.marker_left,
            TransportControl::MarkerRight => &mut self.marker_right,
            TransportControl::Rewind => &mut self.rewind,
            TransportControl::FastForward => &mut self.fast_forward,
            TransportControl::Stop => &mut self.stop,
            TransportControl::Play => &mut self.play,
            TransportControl::Record => &mut self.record,
        }
    }
}

/// Complete routing table: 8 strips plus the transport section
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct MappingConfig {
    pub tracks: [TrackMapping; TRACK_COUNT],
    pub transport: TransportMapping,
}

impl MappingConfig {
    /// Factory CC layout of the nanoKONTROL2, forwarded unchanged on channel 1
    pub fn factory_default() -> Self {
        let identity = |cc: u8| MappingEntry::new(cc, cc, 1);
        let tracks = std::array::from_fn(|i| {
            let i = i as u8;
            TrackMapping {
                knob: identity(16 + i),
                slider: identity(i),
                solo: identity(32 + i),
                mute: identity(48 + i),
                rec: identity(64 + i),
            }
        });

        Self {
            tracks,
            transport: TransportMapping {
                track_left: identity(58),
                track_right: identity(59),
                cycle: identity(46),
                marker_set: identity(60),
                marker_left: identity(61),
                marker_right: identity(62),
                rewind: identity(43),
                fast_forward: identity(44),
                stop: identity(42),
                play: identity(41),
                record: identity(45),
            },
        }
    }

    /// All 51 controls in a stable order (strips first, then transport)
    pub fn controls(&self) -> Vec<(ControlId, &MappingEntry)> {
        let mut controls = Vec::with_capacity(CONTROL_COUNT);
        for (index, track) in self.tracks.iter().enumerate() {
            for control in TrackControl::ALL {
                let id = ControlId::Track { track: index as u8 + 1, control };
                controls.push((id, track.entry(control)));
            }
        }
        for control in TransportControl::ALL {
            controls.push((ControlId::Transport(control), self.transport.entry(control)));
        }
        controls
    }

    /// Look up an entry by control id
    pub fn entry(&self, id: ControlId) -> Option<&MappingEntry> {
        match id {
            ControlId::Track { track, control } => self
                .tracks
                .get((track as usize).checked_sub(1)?)
                .map(|t| t.entry(control)),
            ControlId::Transport(control) => Some(self.transport.entry(control)),
        }
    }

    /// Mutable access by control id
    pub fn entry_mut(&mut self, id: ControlId) -> Option<&mut MappingEntry> {
        match id {
            ControlId::Track { track, control } => self
                .tracks
                .get_mut((track as usize).checked_sub(1)?)
                .map(|t| t.entry_mut(control)),
            ControlId::Transport(control) => Some(self.transport.entry_mut(control)),
        }
    }

    /// Check ranges, field/kind compatibility and inputCC uniqueness
    pub fn validate(&self) -> Result<(), MappingError> {
        let mut seen: HashMap<u8, ControlId> = HashMap::with_capacity(CONTROL_COUNT);

        for (id, entry) in self.controls() {
            validate_entry(id, entry)?;
            if let Some(first) = seen.insert(entry.input_cc, id) {
                return Err(MappingError::DuplicateInputCc {
                    cc: entry.input_cc,
                    first: first.qualified_name(),
                    second: id.qualified_name(),
                });
            }
        }

        Ok(())
    }

    /// Parse a preset from JSON or YAML (chosen by file extension) and validate it
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read mapping file: {}", path.display()))?;

        let is_yaml = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"))
            .unwrap_or(false);

        let config: MappingConfig = if is_yaml {
            serde_yaml::from_str(&contents)
                .with_context(|| format!("Failed to parse YAML mapping: {}", path.display()))?
        } else {
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse JSON mapping: {}", path.display()))?
        };

        config
            .validate()
            .with_context(|| format!("Invalid mapping: {}", path.display()))?;

        Ok(config)
    }

    /// Write the preset as pretty JSON
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self).context("Failed to serialize mapping")?;
        fs::write(path, json)
            .await
            .with_context(|| format!("Failed to write mapping file: {}", path.display()))?;
        Ok(())
    }
}

impl Default for MappingConfig {
    fn default() -> Self {
        Self::factory_default()
    }
}

fn validate_entry(id: ControlId, entry: &MappingEntry) -> Result<(), MappingError> {
    let control = id.qualified_name();
    let check = |field: &'static str, value: u8, min: u8, max: u8| {
        if value < min || value > max {
            Err(MappingError::OutOfRange {
                control: control.clone(),
                field,
                value,
                min,
                max,
            })
        } else {
            Ok(())
        }
    };

    check("inputCC", entry.input_cc, 0, 127)?;
    check("outputCC", entry.output_cc, 0, 127)?;
    check("channel", entry.channel, 1, 16)?;
    for (field, value) in [
        ("minValue", entry.min_value),
        ("maxValue", entry.max_value),
        ("onValue", entry.on_value),
        ("offValue", entry.off_value),
    ] {
        if let Some(value) = value {
            check(field, value, 0, 127)?;
        }
    }

    let not_allowed = |field: &'static str, expected: &'static str| MappingError::FieldNotAllowed {
        control: control.clone(),
        field,
        expected,
    };

    if id.is_button() {
        if entry.min_value.is_some() {
            return Err(not_allowed("minValue", "continuous"));
        }
        if entry.max_value.is_some() {
            return Err(not_allowed("maxValue", "continuous"));
        }
    } else {
        if entry.behavior.is_some() {
            return Err(not_allowed("behavior", "button"));
        }
        if entry.on_value.is_some() {
            return Err(not_allowed("onValue", "button"));
        }
        if entry.off_value.is_some() {
            return Err(not_allowed("offValue", "button"));
        }
        if let (Some(min), Some(max)) = (entry.min_value, entry.max_value) {
            if min > max {
                return Err(MappingError::InvertedRange { control, min, max });
            }
        }
    }

    Ok(())
}
