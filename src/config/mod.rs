//! Configuration management for the remapper
//!
//! Handles loading, defaulting and validation of the YAML application
//! configuration. Mapping presets live in their own files, see
//! [`crate::mapping`].

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::info;

use crate::device::ConnectionSettings;

/// Root configuration structure
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub virtual_port: VirtualPortConfig,
    #[serde(default)]
    pub hotplug: HotplugConfig,
    #[serde(default)]
    pub leds: LedConfig,
    /// Preset file; the factory layout is used when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mapping: Option<PathBuf>,
    #[serde(default = "default_true")]
    pub watch_mapping: bool,
}

/// Hardware device selection
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct DeviceConfig {
    #[serde(default = "default_device_name")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_port: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_port: Option<String>,
    /// 1-16
    #[serde(default = "default_led_channel")]
    pub led_channel: u8,
}

/// Virtual output port
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct VirtualPortConfig {
    #[serde(default = "default_virtual_port_name")]
    pub name: String,
}

/// Hotplug detection
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct HotplugConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Controller used for the value-0 liveness probe
    #[serde(default = "default_heartbeat_cc")]
    pub heartbeat_cc: u8,
}

/// Button LED feedback
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct LedConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl AppConfig {
    /// Load configuration from file with validation
    pub async fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config = Self::parse(&contents)
            .with_context(|| format!("Invalid config file: {}", path.display()))?;

        Ok(config)
    }

    /// Like [`load`](Self::load), but a missing file yields the defaults
    pub async fn load_or_default(path: &Path) -> Result<Self> {
        if !fs::try_exists(path).await.unwrap_or(false) {
            info!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        Self::load(path).await
    }

    /// Parse and validate a YAML document; an empty document is all defaults
    pub fn parse(contents: &str) -> Result<Self> {
        let config: AppConfig = if contents.trim().is_empty() {
            AppConfig::default()
        } else {
            serde_yaml::from_str(contents).context("Failed to parse YAML config")?
        };

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub async fn save(&self, path: &Path) -> Result<()> {
        let yaml = serde_yaml::to_string(self).context("Failed to serialize config to YAML")?;

        fs::write(path, yaml)
            .await
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Validate configuration for correctness and consistency
    pub fn validate(&self) -> Result<()> {
        if self.device.name.trim().is_empty() {
            anyhow::bail!("device.name cannot be empty");
        }
        if !(1..=16).contains(&self.device.led_channel) {
            anyhow::bail!(
                "device.led_channel {} is invalid (must be 1-16)",
                self.device.led_channel
            );
        }
        if matches!(&self.device.input_port, Some(port) if port.is_empty()) {
            anyhow::bail!("device.input_port cannot be empty");
        }
        if matches!(&self.device.output_port, Some(port) if port.is_empty()) {
            anyhow::bail!("device.output_port cannot be empty");
        }

        if self.virtual_port.name.trim().is_empty() {
            anyhow::bail!("virtual_port.name cannot be empty");
        }

        if self.hotplug.poll_interval_ms == 0 {
            anyhow::bail!("hotplug.poll_interval_ms must be greater than 0");
        }
        if self.hotplug.debounce_ms == 0 {
            anyhow::bail!("hotplug.debounce_ms must be greater than 0");
        }
        if self.hotplug.heartbeat_cc > 127 {
            anyhow::bail!(
                "hotplug.heartbeat_cc {} is invalid (must be 0-127)",
                self.hotplug.heartbeat_cc
            );
        }

        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.hotplug.poll_interval_ms)
    }

    /// Settings for the connection manager, channels converted to 0-indexed
    pub fn connection_settings(&self) -> ConnectionSettings {
        ConnectionSettings {
            device_name: self.device.name.clone(),
            input_port: self.device.input_port.clone(),
            output_port: self.device.output_port.clone(),
            virtual_port_name: self.virtual_port.name.clone(),
            led_channel: self.device.led_channel.saturating_sub(1),
            heartbeat_cc: self.hotplug.heartbeat_cc,
            debounce: Duration::from_millis(self.hotplug.debounce_ms),
        }
    }

    /// Preset path, relative paths resolved against the config file's directory
    pub fn mapping_path(&self, config_path: &Path) -> Option<PathBuf> {
        let mapping = self.mapping.as_ref()?;
        if mapping.is_absolute() {
            return Some(mapping.clone());
        }
        let base = config_path.parent().unwrap_or_else(|| Path::new("."));
        Some(base.join(mapping))
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            device: DeviceConfig::default(),
            virtual_port: VirtualPortConfig::default(),
            hotplug: HotplugConfig::default(),
            leds: LedConfig::default(),
            mapping: None,
            watch_mapping: default_true(),
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name: default_device_name(),
            input_port: None,
            output_port: None,
            led_channel: default_led_channel(),
        }
    }
}

impl Default for VirtualPortConfig {
    fn default() -> Self {
        Self {
            name: default_virtual_port_name(),
        }
    }
}

impl Default for HotplugConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            poll_interval_ms: default_poll_interval_ms(),
            debounce_ms: default_debounce_ms(),
            heartbeat_cc: default_heartbeat_cc(),
        }
    }
}

impl Default for LedConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
        }
    }
}

// Default value functions
fn default_true() -> bool { true }
fn default_device_name() -> String { "nanoKONTROL2".to_string() }
fn default_led_channel() -> u8 { 1 }
fn default_virtual_port_name() -> String { "nanoKONTROL2 Remap".to_string() }
fn default_poll_interval_ms() -> u64 { 2000 }
fn default_debounce_ms() -> u64 { 500 }
fn default_heartbeat_cc() -> u8 { crate::device::connection::DEFAULT_HEARTBEAT_CC }

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_empty_document_is_defaults() {
        let config = AppConfig::parse("").unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(AppConfig::parse("{}").unwrap(), AppConfig::default());

        assert_eq!(config.device.name, "nanoKONTROL2");
        assert_eq!(config.virtual_port.name, "nanoKONTROL2 Remap");
        assert_eq!(config.hotplug.poll_interval_ms, 2000);
        assert_eq!(config.hotplug.debounce_ms, 500);
        assert_eq!(config.hotplug.heartbeat_cc, 96);
        assert!(config.leds.enabled);
        assert!(config.watch_mapping);
    }

    #[test]
    fn test_partial_sections_keep_defaults() {
        let yaml = r#"
device:
  led_channel: 3
hotplug:
  debounce_ms: 250
"#;
        let config = AppConfig::parse(yaml).unwrap();
        assert_eq!(config.device.name, "nanoKONTROL2");
        assert_eq!(config.device.led_channel, 3);
        assert_eq!(config.hotplug.debounce_ms, 250);
        assert_eq!(config.hotplug.poll_interval_ms, 2000);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(AppConfig::parse("device:\n  led_channel: 0\n").is_err());
        assert!(AppConfig::parse("device:\n  led_channel: 17\n").is_err());
        assert!(AppConfig::parse("device:\n  name: \"\"\n").is_err());
        assert!(AppConfig::parse("hotplug:\n  poll_interval_ms: 0\n").is_err());
        assert!(AppConfig::parse("hotplug:\n  heartbeat_cc: 128\n").is_err());
        assert!(AppConfig::parse("virtual_port:\n  name: \" \"\n").is_err());
    }

    #[test]
    fn test_connection_settings_are_zero_indexed() {
        let mut config = AppConfig::default();
        config.device.led_channel = 16;
        config.device.input_port = Some("in".into());

        let settings = config.connection_settings();
        assert_eq!(settings.led_channel, 15);
        assert_eq!(settings.input_port.as_deref(), Some("in"));
        assert_eq!(settings.output_port, None);
        assert_eq!(settings.debounce, Duration::from_millis(500));
    }

    #[test]
    fn test_mapping_path_resolution() {
        let mut config = AppConfig::default();
        assert_eq!(config.mapping_path(Path::new("/etc/remap/config.yaml")), None);

        config.mapping = Some(PathBuf::from("presets/live.json"));
        assert_eq!(
            config.mapping_path(Path::new("/etc/remap/config.yaml")),
            Some(PathBuf::from("/etc/remap/presets/live.json"))
        );
    }

    #[tokio::test]
    async fn test_load_or_default_and_save() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("config.yaml");

        assert_eq!(AppConfig::load_or_default(&path).await?, AppConfig::default());

        let mut config = AppConfig::default();
        config.hotplug.enabled = false;
        config.mapping = Some(PathBuf::from("preset.json"));
        config.save(&path).await?;

        let loaded = AppConfig::load_or_default(&path).await?;
        assert_eq!(loaded, config);
        Ok(())
    }
}
