//! Config hot reload
//!
//! Each save is re-read and validated after a short debounce. A config is
//! only delivered when it differs from the last one delivered: every delivery
//! tears the surface session down and rebuilds it, so a save that changes
//! nothing (or only comments) must not bounce the pads.

use anyhow::{Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::AppConfig;

/// Let the editor finish writing before reading the file back
const DEBOUNCE: Duration = Duration::from_millis(100);

/// Watches the config file and yields changed, valid configs
pub struct ConfigWatcher {
    _watcher: RecommendedWatcher,
    rx: mpsc::Receiver<AppConfig>,
}

/// Shared between the notify callback and the reload tasks it spawns
struct Reloader {
    path: String,
    last_delivered: Mutex<AppConfig>,
    tx: mpsc::Sender<AppConfig>,
}

impl Reloader {
    async fn reload(&self) {
        tokio::time::sleep(DEBOUNCE).await;

        let config = match AppConfig::load(&self.path).await {
            Ok(config) => config,
            Err(e) => {
                warn!("Invalid config ignored, session unchanged: {:#}", e);
                return;
            }
        };

        {
            let mut last = self.last_delivered.lock();
            if *last == config {
                debug!("Config saved without changes, session kept");
                return;
            }
            *last = config.clone();
        }

        info!("Configuration changed: {}", self.path);
        if self.tx.send(config).await.is_err() {
            debug!("Config receiver gone, dropping update");
        }
    }
}

impl ConfigWatcher {
    /// Load the config and start watching it
    pub async fn new(config_path: String) -> Result<(Self, Arc<AppConfig>)> {
        let initial = AppConfig::load(&config_path)
            .await
            .context("Failed to load initial config")?;

        let (tx, rx) = mpsc::channel(4);
        let reloader = Arc::new(Reloader {
            path: config_path.clone(),
            last_delivered: Mutex::new(initial.clone()),
            tx,
        });

        // notify calls back on its own thread
        let runtime = tokio::runtime::Handle::current();
        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            match res {
                Ok(event) if matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) => {
                    debug!("Config file event: {:?}", event.kind);
                    let reloader = Arc::clone(&reloader);
                    runtime.spawn(async move { reloader.reload().await });
                }
                Ok(_) => {}
                Err(e) => error!("Config watch error: {}", e),
            }
        })?;

        watcher
            .watch(Path::new(&config_path), RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch config file: {}", config_path))?;
        info!("Watching {} for changes", config_path);

        Ok((
            Self {
                _watcher: watcher,
                rx,
            },
            Arc::new(initial),
        ))
    }

    /// Wait for the next changed config; None once the watcher is gone
    pub async fn next_config(&mut self) -> Option<AppConfig> {
        self.rx.recv().await
    }
}
