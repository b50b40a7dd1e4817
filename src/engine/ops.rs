//! Direct entity reads and writes.
//!
//! # Responsibilities
//! - Validate entities before they reach the store
//! - Enforce references: frontends need their backend, middlewares their
//!   frontend, servers their backend
//! - Refuse to delete a backend that frontends still use
//!
//! # Design Decisions
//! - Every error is returned to the caller; nothing is retried here
//! - Deleting an entity deletes its directory, which cascades to the
//!   servers or middlewares below it

use std::fmt::Display;
use std::time::Duration;

use crate::engine::keys::{
    BackendKey, EntityKey, FrontendKey, HostKey, ListenerKey, MiddlewareKey, ServerKey,
};
use crate::engine::Engine;
use crate::error::Error;
use crate::model::{Backend, Frontend, Host, Listener, Middleware, Server};
use crate::store::{KeyValue, Revision};

impl Engine {
    async fn read_value(&self, key: &str, what: &(dyn Display + Sync)) -> Result<String, Error> {
        self.store
            .get_key(key)
            .await?
            .map(|kv| kv.value)
            .ok_or_else(|| Error::NotFound(what.to_string()))
    }

    async fn exists(&self, key: &str) -> Result<bool, Error> {
        Ok(self.store.get_key(key).await?.is_some())
    }

    async fn remove(&self, dir: &str, what: &(dyn Display + Sync)) -> Result<Revision, Error> {
        let resp = self.store.delete(dir).await?;
        if resp.deleted == 0 {
            return Err(Error::NotFound(what.to_string()));
        }
        tracing::debug!(entity = %what, keys = resp.deleted, revision = resp.revision, "Deleted");
        Ok(resp.revision)
    }

    async fn list(&self, prefix: &str) -> Result<Vec<(EntityKey, KeyValue)>, Error> {
        let resp = self.store.get(prefix).await?;
        Ok(resp
            .entries
            .into_iter()
            .filter_map(|kv| self.keys.classify(&kv.key).map(|k| (k, kv)))
            .collect())
    }

    // --- Hosts ---

    pub async fn get_host(&self, key: &HostKey) -> Result<Host, Error> {
        let raw = self.read_value(&self.keys.host(key), key).await?;
        self.codec.decode_host(key, &raw)
    }

    pub async fn get_hosts(&self) -> Result<Vec<Host>, Error> {
        let mut hosts = Vec::new();
        for (key, kv) in self.list(&self.keys.hosts()).await? {
            if let EntityKey::Host(key) = key {
                hosts.push(self.codec.decode_host(&key, &kv.value)?);
            }
        }
        Ok(hosts)
    }

    pub async fn upsert_host(&self, host: &Host) -> Result<Revision, Error> {
        host.validate()?;
        let key = HostKey::new(host.name.clone());
        let value = self.codec.encode_host(host)?;
        Ok(self.store.put(&self.keys.host(&key), value, None).await?)
    }

    pub async fn delete_host(&self, key: &HostKey) -> Result<Revision, Error> {
        self.remove(&self.keys.host_dir(key), key).await
    }

    // --- Listeners ---

    pub async fn get_listener(&self, key: &ListenerKey) -> Result<Listener, Error> {
        let raw = self.read_value(&self.keys.listener(key), key).await?;
        self.codec.decode_listener(key, &raw)
    }

    pub async fn get_listeners(&self) -> Result<Vec<Listener>, Error> {
        let mut listeners = Vec::new();
        for (key, kv) in self.list(&self.keys.listeners()).await? {
            if let EntityKey::Listener(key) = key {
                listeners.push(self.codec.decode_listener(&key, &kv.value)?);
            }
        }
        Ok(listeners)
    }

    pub async fn upsert_listener(&self, listener: &Listener) -> Result<Revision, Error> {
        listener.validate()?;
        let key = ListenerKey::new(listener.id.clone());
        let value = self.codec.encode(listener)?;
        Ok(self.store.put(&self.keys.listener(&key), value, None).await?)
    }

    pub async fn delete_listener(&self, key: &ListenerKey) -> Result<Revision, Error> {
        self.remove(&self.keys.listener(key), key).await
    }

    // --- Frontends ---

    pub async fn get_frontend(&self, key: &FrontendKey) -> Result<Frontend, Error> {
        let raw = self.read_value(&self.keys.frontend(key), key).await?;
        self.codec.decode_frontend(key, &raw)
    }

    pub async fn get_frontends(&self) -> Result<Vec<Frontend>, Error> {
        let mut frontends = Vec::new();
        for (key, kv) in self.list(&self.keys.frontends()).await? {
            if let EntityKey::Frontend(key) = key {
                frontends.push(self.codec.decode_frontend(&key, &kv.value)?);
            }
        }
        Ok(frontends)
    }

    /// Write a frontend; its backend must already exist.
    pub async fn upsert_frontend(
        &self,
        frontend: &Frontend,
        ttl: Option<Duration>,
    ) -> Result<Revision, Error> {
        frontend.validate()?;
        let backend = BackendKey::new(frontend.backend_id.clone());
        if !self.exists(&self.keys.backend(&backend)).await? {
            return Err(Error::NotFound(backend.to_string()));
        }
        let key = FrontendKey::new(frontend.id.clone());
        let value = self.codec.encode(frontend)?;
        Ok(self.store.put(&self.keys.frontend(&key), value, ttl).await?)
    }

    pub async fn delete_frontend(&self, key: &FrontendKey) -> Result<Revision, Error> {
        self.remove(&self.keys.frontend_dir(key), key).await
    }

    // --- Middlewares ---

    pub async fn get_middleware(&self, key: &MiddlewareKey) -> Result<Middleware, Error> {
        let raw = self.read_value(&self.keys.middleware(key), key).await?;
        self.codec.decode_middleware(key, &raw)
    }

    pub async fn get_middlewares(&self, frontend: &FrontendKey) -> Result<Vec<Middleware>, Error> {
        let mut middlewares = Vec::new();
        for (key, kv) in self.list(&self.keys.middlewares(frontend)).await? {
            if let EntityKey::Middleware(key) = key {
                middlewares.push(self.codec.decode_middleware(&key, &kv.value)?);
            }
        }
        Ok(middlewares)
    }

    /// Write a middleware; its frontend must already exist.
    pub async fn upsert_middleware(
        &self,
        frontend: &FrontendKey,
        middleware: &Middleware,
        ttl: Option<Duration>,
    ) -> Result<Revision, Error> {
        middleware.validate()?;
        if !self.exists(&self.keys.frontend(frontend)).await? {
            return Err(Error::NotFound(frontend.to_string()));
        }
        let key = MiddlewareKey {
            frontend: frontend.clone(),
            id: middleware.id.clone(),
        };
        let value = self.codec.encode(middleware)?;
        Ok(self.store.put(&self.keys.middleware(&key), value, ttl).await?)
    }

    pub async fn delete_middleware(&self, key: &MiddlewareKey) -> Result<Revision, Error> {
        self.remove(&self.keys.middleware(key), key).await
    }

    // --- Backends ---

    pub async fn get_backend(&self, key: &BackendKey) -> Result<Backend, Error> {
        let raw = self.read_value(&self.keys.backend(key), key).await?;
        self.codec.decode_backend(key, &raw)
    }

    pub async fn get_backends(&self) -> Result<Vec<Backend>, Error> {
        let mut backends = Vec::new();
        for (key, kv) in self.list(&self.keys.backends()).await? {
            if let EntityKey::Backend(key) = key {
                backends.push(self.codec.decode_backend(&key, &kv.value)?);
            }
        }
        Ok(backends)
    }

    pub async fn upsert_backend(&self, backend: &Backend) -> Result<Revision, Error> {
        backend.validate()?;
        let key = BackendKey::new(backend.id.clone());
        let value = self.codec.encode(backend)?;
        Ok(self.store.put(&self.keys.backend(&key), value, None).await?)
    }

    /// Ids of the frontends pointing at `key`, sorted.
    ///
    /// A frontend that no longer decodes still counts when its raw value
    /// names the backend; one without a readable `backend_id` is skipped.
    pub async fn backend_used_by(&self, key: &BackendKey) -> Result<Vec<String>, Error> {
        let mut ids = Vec::new();
        for (entity, kv) in self.list(&self.keys.frontends()).await? {
            let EntityKey::Frontend(frontend) = entity else {
                continue;
            };
            let backend_id = match self.codec.decode_frontend(&frontend, &kv.value) {
                Ok(f) => Some(f.backend_id),
                Err(e) => {
                    let raw = serde_json::from_str::<serde_json::Value>(&kv.value)
                        .ok()
                        .and_then(|v| v.get("backend_id")?.as_str().map(str::to_string));
                    if raw.is_none() {
                        tracing::warn!(
                            key = %kv.key,
                            error = %e,
                            "Skipping unreadable frontend while checking backend references"
                        );
                    }
                    raw
                }
            };
            if backend_id.as_deref() == Some(key.id.as_str()) {
                ids.push(frontend.id);
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Delete a backend and its servers; fails while frontends use it.
    pub async fn delete_backend(&self, key: &BackendKey) -> Result<Revision, Error> {
        let frontends = self.backend_used_by(key).await?;
        if !frontends.is_empty() {
            return Err(Error::InUse {
                backend: key.id.clone(),
                frontends,
            });
        }
        self.remove(&self.keys.backend_dir(key), key).await
    }

    // --- Servers ---

    pub async fn get_server(&self, key: &ServerKey) -> Result<Server, Error> {
        let raw = self.read_value(&self.keys.server(key), key).await?;
        self.codec.decode_server(key, &raw)
    }

    pub async fn get_servers(&self, backend: &BackendKey) -> Result<Vec<Server>, Error> {
        let mut servers = Vec::new();
        for (key, kv) in self.list(&self.keys.servers(backend)).await? {
            if let EntityKey::Server(key) = key {
                servers.push(self.codec.decode_server(&key, &kv.value)?);
            }
        }
        Ok(servers)
    }

    /// Write a server; its backend must already exist.
    pub async fn upsert_server(
        &self,
        backend: &BackendKey,
        server: &Server,
        ttl: Option<Duration>,
    ) -> Result<Revision, Error> {
        server.validate()?;
        if !self.exists(&self.keys.backend(backend)).await? {
            return Err(Error::NotFound(backend.to_string()));
        }
        let key = ServerKey {
            backend: backend.clone(),
            id: server.id.clone(),
        };
        let value = self.codec.encode(server)?;
        Ok(self.store.put(&self.keys.server(&key), value, ttl).await?)
    }

    pub async fn delete_server(&self, key: &ServerKey) -> Result<Revision, Error> {
        self.remove(&self.keys.server(key), key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BackendSettings, HostSettings};
    use crate::store::MemoryStore;
    use std::sync::Arc;

    fn engine() -> Engine {
        Engine::new(Arc::new(MemoryStore::new()), "/test", None)
    }

    fn frontend(id: &str, backend: &str) -> Frontend {
        Frontend::new(id, backend, r#"PathPrefix("/")"#, Default::default()).unwrap()
    }

    #[tokio::test]
    async fn test_frontend_requires_backend() {
        let engine = engine();
        let err = engine.upsert_frontend(&frontend("f1", "b1"), None).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(ref what) if what == "backend(b1)"));

        engine
            .upsert_backend(&Backend::new("b1", BackendSettings::default()).unwrap())
            .await
            .unwrap();
        engine.upsert_frontend(&frontend("f1", "b1"), None).await.unwrap();
        assert_eq!(engine.get_frontend(&FrontendKey::new("f1")).await.unwrap().backend_id, "b1");
    }

    #[tokio::test]
    async fn test_delete_backend_in_use_lists_frontends() {
        let engine = engine();
        engine
            .upsert_backend(&Backend::new("b1", BackendSettings::default()).unwrap())
            .await
            .unwrap();
        engine.upsert_frontend(&frontend("f2", "b1"), None).await.unwrap();
        engine.upsert_frontend(&frontend("f1", "b1"), None).await.unwrap();

        let err = engine.delete_backend(&BackendKey::new("b1")).await.unwrap_err();
        match err {
            Error::InUse { backend, frontends } => {
                assert_eq!(backend, "b1");
                assert_eq!(frontends, vec!["f1", "f2"]);
            }
            other => panic!("unexpected error: {other}"),
        }

        engine.delete_frontend(&FrontendKey::new("f1")).await.unwrap();
        engine.delete_frontend(&FrontendKey::new("f2")).await.unwrap();
        engine.delete_backend(&BackendKey::new("b1")).await.unwrap();
    }

    #[tokio::test]
    async fn test_unreadable_frontend_does_not_block_backend_delete() {
        let engine = engine();
        for id in ["b1", "b2"] {
            engine
                .upsert_backend(&Backend::new(id, BackendSettings::default()).unwrap())
                .await
                .unwrap();
        }
        engine
            .store
            .put("/test/frontends/junk/frontend", "{garbage".into(), None)
            .await
            .unwrap();
        engine
            .store
            .put(
                "/test/frontends/broken/frontend",
                r#"{"route":"Nope((","backend_id":"b1"}"#.into(),
                None,
            )
            .await
            .unwrap();

        engine.delete_backend(&BackendKey::new("b2")).await.unwrap();

        let err = engine.delete_backend(&BackendKey::new("b1")).await.unwrap_err();
        assert!(matches!(err, Error::InUse { ref frontends, .. } if frontends == &["broken"]));
    }

    #[tokio::test]
    async fn test_delete_backend_cascades_servers() {
        let engine = engine();
        let b1 = BackendKey::new("b1");
        engine
            .upsert_backend(&Backend::new("b1", BackendSettings::default()).unwrap())
            .await
            .unwrap();
        engine
            .upsert_server(&b1, &Server::new("s1", "http://10.0.0.1:80").unwrap(), None)
            .await
            .unwrap();
        engine.delete_backend(&b1).await.unwrap();
        assert!(engine.get_servers(&b1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_server_and_middleware_require_parent() {
        let engine = engine();
        let server = Server::new("s1", "http://10.0.0.1:80").unwrap();
        assert!(matches!(
            engine.upsert_server(&BackendKey::new("nope"), &server, None).await,
            Err(Error::NotFound(_))
        ));

        let m = Middleware::new("m1", 1, "headers", serde_json::Value::Null).unwrap();
        assert!(matches!(
            engine.upsert_middleware(&FrontendKey::new("nope"), &m, None).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_missing_is_not_found() {
        let engine = engine();
        assert!(matches!(
            engine.delete_host(&HostKey::new("missing.com")).await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            engine.delete_listener(&ListenerKey::new("l1")).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_invalid_entities_never_reach_store() {
        let engine = engine();
        let mut host = Host::new("a.com", HostSettings::default()).unwrap();
        host.name = String::new();
        assert!(matches!(engine.upsert_host(&host).await, Err(Error::InvalidFormat(_))));
        assert!(engine.get_hosts().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_listing() {
        let engine = engine();
        engine
            .upsert_listener(&Listener::new("l1", "http", "tcp", ":80").unwrap())
            .await
            .unwrap();
        engine
            .upsert_host(&Host::new("a.com", HostSettings::default()).unwrap())
            .await
            .unwrap();
        assert_eq!(engine.get_listeners().await.unwrap().len(), 1);
        assert_eq!(engine.get_hosts().await.unwrap()[0].name, "a.com");
    }
}
