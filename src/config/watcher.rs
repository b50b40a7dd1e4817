//! Seed file watcher for hot reload.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::seed::{apply_seed, SeedFile};
use crate::engine::Engine;
use crate::lifecycle::ShutdownSignal;

/// A watcher that monitors the seed file for changes.
pub struct SeedWatcher {
    path: PathBuf,
    update_tx: mpsc::UnboundedSender<SeedFile>,
}

impl SeedWatcher {
    /// Create a new SeedWatcher.
    ///
    /// Returns the watcher and a receiver for parsed seed updates.
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<SeedFile>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();

        (
            Self {
                path: path.to_path_buf(),
                update_tx,
            },
            update_rx,
        )
    }

    /// Start watching the file in a background thread.
    ///
    /// The returned handle must be kept alive for as long as updates are wanted.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let tx = self.update_tx.clone();
        let path = self.path.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if event.kind.is_modify() || event.kind.is_create() {
                        tracing::info!(path = ?path, "Seed file change detected, reloading");
                        match SeedFile::load(&path) {
                            Ok(seed) => {
                                let _ = tx.send(seed);
                            }
                            Err(e) => {
                                tracing::error!(error = %e, "Failed to reload seed file, keeping stored topology");
                            }
                        }
                    }
                }
                Err(e) => tracing::error!(error = ?e, "Seed watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&self.path, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?self.path, "Seed watcher started");
        Ok(watcher)
    }
}

/// Apply seed updates to the store until shutdown or the watcher goes away.
pub async fn apply_updates(
    engine: Engine,
    mut updates: mpsc::UnboundedReceiver<SeedFile>,
    mut shutdown: ShutdownSignal,
) {
    loop {
        let seed = tokio::select! {
            _ = shutdown.recv() => break,
            seed = updates.recv() => match seed {
                Some(seed) => seed,
                None => break,
            },
        };
        // Editors often emit several events per save; only the latest matters.
        let mut seed = seed;
        while let Ok(newer) = updates.try_recv() {
            seed = newer;
        }
        if let Err(e) = apply_seed(&engine, &seed).await {
            tracing::error!(error = %e, "Failed to apply seed update");
        }
    }
}
