//! Point-in-time read of the whole configuration.
//!
//! # Responsibilities
//! - Read the namespace with one prefix get at one revision
//! - Partition entries into hosts, listeners, frontends and backends,
//!   nesting middlewares and servers under their owners in a single pass
//!
//! # Design Decisions
//! - A malformed entity is skipped with a warning; it never fails the
//!   snapshot. A skipped frontend or backend takes its children with it
//! - Entries arrive sorted by key, so an owner is always seen before the
//!   entries below it

use std::collections::BTreeMap;

use crate::engine::keys::EntityKey;
use crate::engine::Engine;
use crate::error::Error;
use crate::model::{Backend, Frontend, Host, Listener, Middleware, Server};
use crate::store::Revision;

/// A frontend with its middlewares.
#[derive(Debug, Clone, PartialEq)]
pub struct FrontendSpec {
    pub frontend: Frontend,
    pub middlewares: Vec<Middleware>,
}

/// A backend with its servers.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendSpec {
    pub backend: Backend,
    pub servers: Vec<Server>,
}

/// Every entity as of one store revision.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub revision: Revision,
    pub hosts: Vec<Host>,
    pub listeners: Vec<Listener>,
    pub frontends: Vec<FrontendSpec>,
    pub backends: Vec<BackendSpec>,
}

impl Snapshot {
    pub fn frontend(&self, id: &str) -> Option<&FrontendSpec> {
        self.frontends.iter().find(|f| f.frontend.id == id)
    }

    pub fn backend(&self, id: &str) -> Option<&BackendSpec> {
        self.backends.iter().find(|b| b.backend.id == id)
    }
}

impl Engine {
    /// Read a consistent snapshot of the configuration.
    pub async fn snapshot(&self) -> Result<Snapshot, Error> {
        let resp = self.store.get(&self.keys.namespace()).await?;

        let mut hosts = Vec::new();
        let mut listeners = Vec::new();
        let mut frontends: BTreeMap<String, FrontendSpec> = BTreeMap::new();
        let mut backends: BTreeMap<String, BackendSpec> = BTreeMap::new();
        let mut skipped = 0usize;

        for kv in &resp.entries {
            let Some(entity) = self.keys.classify(&kv.key) else {
                continue;
            };
            let parsed: Result<(), Error> = match entity {
                EntityKey::Host(key) => self
                    .codec
                    .decode_host(&key, &kv.value)
                    .map(|h| hosts.push(h)),
                EntityKey::Listener(key) => self
                    .codec
                    .decode_listener(&key, &kv.value)
                    .map(|l| listeners.push(l)),
                EntityKey::Frontend(key) => {
                    self.codec.decode_frontend(&key, &kv.value).map(|frontend| {
                        frontends.insert(
                            key.id,
                            FrontendSpec {
                                frontend,
                                middlewares: Vec::new(),
                            },
                        );
                    })
                }
                EntityKey::Backend(key) => {
                    self.codec.decode_backend(&key, &kv.value).map(|backend| {
                        backends.insert(
                            key.id,
                            BackendSpec {
                                backend,
                                servers: Vec::new(),
                            },
                        );
                    })
                }
                EntityKey::Middleware(key) => match frontends.get_mut(&key.frontend.id) {
                    Some(spec) => self
                        .codec
                        .decode_middleware(&key, &kv.value)
                        .map(|m| spec.middlewares.push(m)),
                    None => {
                        tracing::debug!(key = %kv.key, "Skipping middleware of absent frontend");
                        Ok(())
                    }
                },
                EntityKey::Server(key) => match backends.get_mut(&key.backend.id) {
                    Some(spec) => self
                        .codec
                        .decode_server(&key, &kv.value)
                        .map(|s| spec.servers.push(s)),
                    None => {
                        tracing::debug!(key = %kv.key, "Skipping server of absent backend");
                        Ok(())
                    }
                },
            };

            if let Err(e) = parsed {
                skipped += 1;
                tracing::warn!(key = %kv.key, error = %e, "Skipping invalid entity in snapshot");
            }
        }

        let snapshot = Snapshot {
            revision: resp.revision,
            hosts,
            listeners,
            frontends: frontends.into_values().collect(),
            backends: backends.into_values().collect(),
        };

        tracing::info!(
            revision = snapshot.revision,
            hosts = snapshot.hosts.len(),
            listeners = snapshot.listeners.len(),
            frontends = snapshot.frontends.len(),
            backends = snapshot.backends.len(),
            skipped,
            "Snapshot read"
        );
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::keys::{BackendKey, FrontendKey};
    use crate::model::{BackendSettings, HostSettings};
    use crate::store::{KvStore, MemoryStore};
    use std::sync::Arc;

    async fn seeded() -> (Arc<MemoryStore>, Engine) {
        let store = Arc::new(MemoryStore::new());
        let engine = Engine::new(store.clone(), "/p", None);
        let b1 = BackendKey::new("b1");
        engine
            .upsert_backend(&Backend::new("b1", BackendSettings::default()).unwrap())
            .await
            .unwrap();
        engine
            .upsert_server(&b1, &Server::new("s1", "http://10.0.0.1:80").unwrap(), None)
            .await
            .unwrap();
        engine
            .upsert_server(&b1, &Server::new("s2", "http://10.0.0.2:80").unwrap(), None)
            .await
            .unwrap();
        for id in ["f1", "f2"] {
            let route = format!(r#"PathPrefix("/{}")"#, id);
            engine
                .upsert_frontend(&Frontend::new(id, "b1", route, Default::default()).unwrap(), None)
                .await
                .unwrap();
        }
        engine
            .upsert_middleware(
                &FrontendKey::new("f1"),
                &Middleware::new("m1", 1, "headers", serde_json::json!({})).unwrap(),
                None,
            )
            .await
            .unwrap();
        engine
            .upsert_host(&Host::new("a.com", HostSettings::default()).unwrap())
            .await
            .unwrap();
        (store, engine)
    }

    #[tokio::test]
    async fn test_snapshot_nests_children() {
        let (store, engine) = seeded().await;
        let snapshot = engine.snapshot().await.unwrap();

        assert_eq!(snapshot.revision, store.revision());
        assert_eq!(snapshot.hosts.len(), 1);
        assert_eq!(snapshot.backend("b1").unwrap().servers.len(), 2);
        assert_eq!(snapshot.frontend("f1").unwrap().middlewares.len(), 1);
        assert!(snapshot.frontend("f2").unwrap().middlewares.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_entity_is_isolated() {
        let (store, engine) = seeded().await;
        store
            .put("/p/frontends/f2/frontend", "{garbage".into(), None)
            .await
            .unwrap();
        store
            .put("/p/backends/b1/servers/s3", r#"{"url":"nope"}"#.into(), None)
            .await
            .unwrap();
        store.put("/p/hosts/b.com/host", "[]".into(), None).await.unwrap();

        let snapshot = engine.snapshot().await.unwrap();
        assert!(snapshot.frontend("f2").is_none());
        assert!(snapshot.frontend("f1").is_some());
        assert_eq!(snapshot.backend("b1").unwrap().servers.len(), 2);
        assert_eq!(snapshot.hosts.len(), 1);
    }

    #[tokio::test]
    async fn test_children_of_malformed_owner_are_dropped() {
        let (store, engine) = seeded().await;
        store
            .put("/p/frontends/f1/frontend", "{garbage".into(), None)
            .await
            .unwrap();
        let snapshot = engine.snapshot().await.unwrap();
        assert!(snapshot.frontend("f1").is_none());
        assert_eq!(snapshot.frontends.len(), 1);
    }

    #[tokio::test]
    async fn test_foreign_keys_are_ignored() {
        let (store, engine) = seeded().await;
        store.put("/p/stats/requests", "42".into(), None).await.unwrap();
        store.put("/other/hosts/x/host", "{}".into(), None).await.unwrap();
        let snapshot = engine.snapshot().await.unwrap();
        assert_eq!(snapshot.hosts.len(), 1);
    }
}
