//! Application path management for portable and installed modes.
//!
//! - **Portable mode**: a `.portable` marker file next to the executable
//!   keeps `config.yaml` and `logs/` in that directory.
//! - **Installed mode** (default): configuration lives in the platform config
//!   directory (`~/.config/nanokontrol-remap` on Linux), logs in the local
//!   data directory.

use std::path::{Path, PathBuf};
use tracing::debug;

/// Directory name used below the platform directories
const APP_DIR: &str = "nanokontrol-remap";

/// Application paths for config and logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppPaths {
    /// Path to the configuration file
    pub config: PathBuf,
    /// Path to the logs directory
    pub logs_dir: PathBuf,
    /// Whether running in portable mode (config next to exe)
    pub is_portable: bool,
}

impl AppPaths {
    /// Detect the appropriate paths based on environment.
    ///
    /// In debug builds a `config.yaml` in the current working directory wins,
    /// so `cargo run` picks up the project's copy.
    ///
    /// Called before logging is initialized, hence `eprintln!`.
    pub fn detect() -> Self {
        let exe_dir = std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(Path::to_path_buf))
            .unwrap_or_else(|| PathBuf::from("."));

        #[cfg(debug_assertions)]
        {
            let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
            if cwd.join("config.yaml").exists() {
                eprintln!("[paths] Running in DEV mode (config.yaml found in {})", cwd.display());
                return Self::portable(&cwd);
            }
        }

        if exe_dir.join(".portable").exists() {
            #[cfg(debug_assertions)]
            eprintln!("[paths] Running in PORTABLE mode (.portable marker found)");
            return Self::portable(&exe_dir);
        }

        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| {
                eprintln!("[paths] WARNING: no platform config directory, falling back to exe dir");
                exe_dir.clone()
            })
            .join(APP_DIR);
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| config_dir.clone())
            .join(APP_DIR);

        Self {
            config: config_dir.join("config.yaml"),
            logs_dir: data_dir.join("logs"),
            is_portable: false,
        }
    }

    /// Everything below one directory
    pub fn portable(base: &Path) -> Self {
        Self {
            config: base.join("config.yaml"),
            logs_dir: base.join("logs"),
            is_portable: true,
        }
    }

    /// Directory holding the config file; relative preset paths resolve here
    pub fn base_dir(&self) -> PathBuf {
        self.config
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Ensure the logs directory exists.
    pub fn ensure_logs_dir(&self) -> anyhow::Result<()> {
        if !self.logs_dir.exists() {
            debug!("Creating logs directory: {}", self.logs_dir.display());
            std::fs::create_dir_all(&self.logs_dir)?;
        }
        Ok(())
    }
}
