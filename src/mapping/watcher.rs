//! Mapping file watcher for preset hot-reload

use anyhow::{Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::MappingConfig;

/// Settle time before re-reading a modified file
const RELOAD_SETTLE: Duration = Duration::from_millis(100);

/// Watches a preset file and yields validated mappings whenever it changes
pub struct MappingWatcher {
    _watcher: RecommendedWatcher,
    rx: mpsc::Receiver<MappingConfig>,
}

impl MappingWatcher {
    /// Load the preset and start watching it
    pub async fn new(path: impl Into<PathBuf>) -> Result<(Self, MappingConfig)> {
        let path = path.into();
        let (tx, rx) = mpsc::channel(10);

        let initial = MappingConfig::load(&path)
            .await
            .context("Failed to load initial mapping")?;

        // notify callbacks run on their own OS thread, not in Tokio context
        let runtime_handle = tokio::runtime::Handle::current();
        let watched_path = path.clone();

        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            match res {
                Ok(event) => {
                    if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                        return;
                    }
                    debug!("Mapping file modified: {:?}", event.paths);

                    let path = watched_path.clone();
                    let tx = tx.clone();
                    runtime_handle.spawn(async move {
                        tokio::time::sleep(RELOAD_SETTLE).await;

                        match MappingConfig::load(&path).await {
                            Ok(mapping) => {
                                if let Err(e) = tx.send(mapping).await {
                                    error!("Failed to deliver mapping update: {}", e);
                                }
                            }
                            Err(e) => {
                                warn!("Failed to reload mapping (keeping current one): {:#}", e);
                            }
                        }
                    });
                }
                Err(e) => {
                    error!("Watch error: {}", e);
                }
            }
        })?;

        watcher
            .watch(Path::new(&path), RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch mapping file: {}", path.display()))?;

        info!("Mapping file watcher started for: {}", path.display());

        Ok((Self { _watcher: watcher, rx }, initial))
    }

    /// Wait for the next valid mapping; `None` once the watcher is gone
    pub async fn next_mapping(&mut self) -> Option<MappingConfig> {
        self.rx.recv().await
    }
}
