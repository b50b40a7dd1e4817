//! Store connection lifecycle.
//!
//! # Data Flow
//! ```text
//! snapshot → Reconciler::bootstrap
//!     → spawn Engine::subscribe(after = last applied revision)
//!     → Reconciler::run drains the channel until the subscription ends
//!     → subscription outcome:
//!         cancelled / store closed gracefully → stop
//!         compacted  → back off, re-snapshot, re-bootstrap
//!         other error → back off, resubscribe from the last revision
//! ```
//!
//! # Design Decisions
//! - The reconciler lives on the supervisor task; only the subscription
//!   is spawned, so the last applied revision is always at hand
//! - The backoff resets whenever a subscription delivered changes

use std::time::Duration;

use tokio::sync::mpsc;

use crate::engine::Engine;
use crate::error::Error;
use crate::lifecycle::ShutdownSignal;
use crate::observability::metrics;
use crate::reconciler::Reconciler;
use crate::resilience::Backoff;
use crate::store::StoreError;

/// Tuning for the supervisor loop.
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub channel_capacity: usize,
    pub retry_base: Duration,
    pub retry_max: Duration,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            channel_capacity: 2000,
            retry_base: Duration::from_millis(500),
            retry_max: Duration::from_millis(5000),
        }
    }
}

/// Keeps a reconciler fed from the store across watch failures.
#[derive(Debug)]
pub struct Supervisor {
    engine: Engine,
    reconciler: Reconciler,
    settings: SupervisorSettings,
}

enum Next {
    Resume,
    Resnapshot,
}

impl Supervisor {
    pub fn new(engine: Engine, reconciler: Reconciler, settings: SupervisorSettings) -> Self {
        Self {
            engine,
            reconciler,
            settings,
        }
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    /// Run until shutdown or until the store ends the watch gracefully.
    ///
    /// Returns the reconciler so callers can inspect the final state.
    pub async fn run(mut self, mut shutdown: ShutdownSignal) -> Reconciler {
        let mut backoff = Backoff::new(
            self.settings.retry_base.as_millis() as u64,
            self.settings.retry_max.as_millis() as u64,
        );
        let mut next = Next::Resnapshot;

        loop {
            if shutdown.is_triggered() {
                break;
            }

            if matches!(next, Next::Resnapshot) {
                match self.engine.snapshot().await {
                    Ok(snapshot) => {
                        self.reconciler.bootstrap(&snapshot);
                        next = Next::Resume;
                    }
                    Err(Error::Store(StoreError::Closed)) => {
                        tracing::info!("Store closed, nothing to read");
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, attempt = backoff.attempt(), "Snapshot failed");
                        if !self.pause(&mut backoff, &mut shutdown).await {
                            break;
                        }
                        continue;
                    }
                }
            }

            let after = self.reconciler.revision();
            let (tx, mut rx) = mpsc::channel(self.settings.channel_capacity.max(1));
            let engine = self.engine.clone();
            let cancel = shutdown.clone();
            let subscription = tokio::spawn(async move { engine.subscribe(tx, after, cancel).await });

            let applied = self.reconciler.run(&mut rx).await;
            if applied > 0 {
                backoff.reset();
            }

            match subscription.await {
                Ok(Ok(())) => {
                    if !shutdown.is_triggered() {
                        tracing::info!(revision = self.reconciler.revision(), "Store ended the watch");
                    }
                    break;
                }
                Ok(Err(Error::Store(StoreError::Closed))) => {
                    tracing::info!(revision = self.reconciler.revision(), "Store closed the watch");
                    break;
                }
                Ok(Err(Error::Store(StoreError::Compacted { requested, compacted }))) => {
                    tracing::warn!(requested, compacted, "Watch history compacted, re-reading snapshot");
                    metrics::record_watch_restart("compacted");
                    next = Next::Resnapshot;
                }
                Ok(Err(e)) => {
                    tracing::warn!(
                        error = %e,
                        revision = self.reconciler.revision(),
                        "Watch failed, resubscribing"
                    );
                    metrics::record_watch_restart(e.kind());
                }
                Err(e) => {
                    tracing::error!(error = %e, "Subscription task failed");
                    metrics::record_watch_restart("task_failed");
                }
            }

            if !self.pause(&mut backoff, &mut shutdown).await {
                break;
            }
        }

        tracing::info!(revision = self.reconciler.revision(), "Supervisor stopped");
        self.reconciler
    }

    /// Sleep for the next backoff delay; false if shutdown won the race.
    async fn pause(&self, backoff: &mut Backoff, shutdown: &mut ShutdownSignal) -> bool {
        let delay = backoff.next_delay();
        tracing::debug!(delay_ms = delay.as_millis() as u64, attempt = backoff.attempt(), "Backing off");
        tokio::select! {
            _ = shutdown.recv() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::keys::BackendKey;
    use crate::lifecycle::Shutdown;
    use crate::model::{Backend, BackendSettings, Frontend, Server};
    use crate::proxy::Topology;
    use crate::store::MemoryStore;
    use std::sync::Arc;

    fn fast() -> SupervisorSettings {
        SupervisorSettings {
            channel_capacity: 16,
            retry_base: Duration::from_millis(5),
            retry_max: Duration::from_millis(20),
        }
    }

    async fn eventually(check: impl Fn() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    async fn seed(engine: &Engine) {
        engine
            .upsert_backend(&Backend::new("b1", BackendSettings::default()).unwrap())
            .await
            .unwrap();
        engine
            .upsert_frontend(
                &Frontend::new("f1", "b1", r#"PathPrefix("/")"#, Default::default()).unwrap(),
                None,
            )
            .await
            .unwrap();
    }

    fn start(
        store: &Arc<MemoryStore>,
        shutdown: &Shutdown,
    ) -> (Engine, Arc<Topology>, tokio::task::JoinHandle<Reconciler>) {
        let engine = Engine::new(store.clone(), "/p", None);
        let topology = Arc::new(Topology::new());
        let supervisor = Supervisor::new(engine.clone(), Reconciler::new(topology.clone()), fast());
        let handle = tokio::spawn(supervisor.run(shutdown.subscribe()));
        (engine, topology, handle)
    }

    #[tokio::test]
    async fn test_resumes_after_transient_failure() {
        let store = Arc::new(MemoryStore::new());
        let shutdown = Shutdown::new();
        let (engine, topology, handle) = start(&store, &shutdown);
        seed(&engine).await;
        eventually(|| topology.find_route("f1").is_some()).await;

        store.disconnect_watchers();
        let b1 = BackendKey::new("b1");
        engine
            .upsert_server(&b1, &Server::new("s1", "http://10.0.0.1:80").unwrap(), None)
            .await
            .unwrap();

        eventually(|| topology.find_route("f1").is_some_and(|r| r.pool().len() == 1)).await;
        assert_eq!(topology.revision(), store.revision());

        shutdown.trigger();
        let reconciler = handle.await.unwrap();
        assert_eq!(reconciler.revision(), store.revision());
    }

    #[tokio::test]
    async fn test_compaction_forces_resnapshot() {
        let store = Arc::new(MemoryStore::with_history_limit(1));
        let shutdown = Shutdown::new();
        let (engine, topology, handle) = start(&store, &shutdown);
        seed(&engine).await;
        eventually(|| topology.find_route("f1").is_some()).await;

        store.disconnect_watchers();
        let b1 = BackendKey::new("b1");
        for (id, ip) in [("s1", "10.0.0.1"), ("s2", "10.0.0.2"), ("s3", "10.0.0.3")] {
            let url = format!("http://{}:80", ip);
            engine
                .upsert_server(&b1, &Server::new(id, url).unwrap(), None)
                .await
                .unwrap();
        }

        eventually(|| topology.find_route("f1").is_some_and(|r| r.pool().len() == 3)).await;
        shutdown.trigger();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_store_close_stops_supervisor() {
        let store = Arc::new(MemoryStore::new());
        let shutdown = Shutdown::new();
        let (engine, topology, handle) = start(&store, &shutdown);
        seed(&engine).await;
        eventually(|| topology.find_route("f1").is_some()).await;

        store.close();
        let reconciler = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("supervisor did not stop")
            .unwrap();
        assert!(reconciler.topology().find_route("f1").is_some());
    }

    #[tokio::test]
    async fn test_closed_store_stops_before_first_snapshot() {
        let store = Arc::new(MemoryStore::new());
        store.close();
        let shutdown = Shutdown::new();
        let (_, topology, handle) = start(&store, &shutdown);
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("supervisor kept retrying a closed store")
            .unwrap();
        assert!(topology.routers().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_during_backoff() {
        let store = Arc::new(MemoryStore::new());
        let shutdown = Shutdown::new();
        let engine = Engine::new(store.clone(), "/p", None);
        let settings = SupervisorSettings {
            retry_base: Duration::from_secs(30),
            retry_max: Duration::from_secs(30),
            ..fast()
        };
        let supervisor =
            Supervisor::new(engine, Reconciler::new(Arc::new(Topology::new())), settings);
        let handle = tokio::spawn(supervisor.run(shutdown.subscribe()));

        eventually(|| store.watcher_count() > 0).await;
        store.disconnect_watchers();
        tokio::time::sleep(Duration::from_millis(20)).await;
        shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("supervisor ignored shutdown")
            .unwrap();
    }
}
