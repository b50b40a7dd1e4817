//! Shared fixtures for integration tests.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use dynproxy::engine::keys::BackendKey;
use dynproxy::lifecycle::{Shutdown, Supervisor, SupervisorSettings};
use dynproxy::model::{Backend, BackendSettings, Frontend, Server};
use dynproxy::store::MemoryStore;
use dynproxy::{Engine, Reconciler, Topology};

/// A running control plane over an in-memory store.
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub engine: Engine,
    pub topology: Arc<Topology>,
    pub shutdown: Shutdown,
    pub task: tokio::task::JoinHandle<Reconciler>,
}

impl Harness {
    pub async fn stop(self) -> Reconciler {
        self.shutdown.trigger();
        self.task.await.unwrap()
    }
}

pub fn fast_settings() -> SupervisorSettings {
    SupervisorSettings {
        channel_capacity: 64,
        retry_base: Duration::from_millis(5),
        retry_max: Duration::from_millis(25),
    }
}

/// Start a supervisor over `store` under the `/it` namespace.
pub fn start(store: Arc<MemoryStore>) -> Harness {
    let engine = Engine::new(store.clone(), "/it", None);
    let topology = Arc::new(Topology::new());
    let shutdown = Shutdown::new();
    let supervisor = Supervisor::new(
        engine.clone(),
        Reconciler::new(topology.clone()),
        fast_settings(),
    );
    let task = tokio::spawn(supervisor.run(shutdown.subscribe()));
    Harness {
        store,
        engine,
        topology,
        shutdown,
        task,
    }
}

/// Poll `check` until it holds or two seconds pass.
pub async fn eventually(check: impl Fn() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

pub async fn add_backend(engine: &Engine, id: &str, servers: &[(&str, &str)]) {
    engine
        .upsert_backend(&Backend::new(id, BackendSettings::default()).unwrap())
        .await
        .unwrap();
    let key = BackendKey::new(id);
    for (sid, url) in servers {
        engine
            .upsert_server(&key, &Server::new(*sid, *url).unwrap(), None)
            .await
            .unwrap();
    }
}

pub async fn add_frontend(engine: &Engine, id: &str, backend: &str, route: &str) {
    engine
        .upsert_frontend(
            &Frontend::new(id, backend, route, Default::default()).unwrap(),
            None,
        )
        .await
        .unwrap();
}

/// Sorted endpoint URLs of the route serving `frontend_id`.
pub fn endpoints(topology: &Topology, frontend_id: &str) -> Vec<String> {
    let mut urls: Vec<String> = topology
        .find_route(frontend_id)
        .map(|r| r.pool().endpoints().iter().map(|u| u.to_string()).collect())
        .unwrap_or_default();
    urls.sort();
    urls
}
