//! Raw mutation to typed change event.
//!
//! # Responsibilities
//! - Classify the mutated key with the ordered matchers
//! - Re-read the entity on put so the event carries current store state
//! - Carry only the identity on delete
//!
//! # Design Decisions
//! - Keys no matcher accepts are ignored, not errors
//! - An operation that is neither put nor delete fails that event only

use crate::engine::keys::{
    BackendKey, EntityKey, FrontendKey, HostKey, ListenerKey, MiddlewareKey, ServerKey,
};
use crate::engine::Engine;
use crate::error::Error;
use crate::model::{Backend, Frontend, Host, Listener, Middleware, Server};
use crate::store::{Operation, Revision, WatchEvent};

/// A typed change to one entity.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    HostUpserted(Host),
    HostDeleted(HostKey),
    ListenerUpserted(Listener),
    ListenerDeleted(ListenerKey),
    FrontendUpserted(Frontend),
    FrontendDeleted(FrontendKey),
    MiddlewareUpserted {
        frontend: FrontendKey,
        middleware: Middleware,
    },
    MiddlewareDeleted(MiddlewareKey),
    BackendUpserted(Backend),
    BackendDeleted(BackendKey),
    ServerUpserted {
        backend: BackendKey,
        server: Server,
    },
    ServerDeleted(ServerKey),
}

impl ChangeEvent {
    /// Short label used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ChangeEvent::HostUpserted(_) => "host_upserted",
            ChangeEvent::HostDeleted(_) => "host_deleted",
            ChangeEvent::ListenerUpserted(_) => "listener_upserted",
            ChangeEvent::ListenerDeleted(_) => "listener_deleted",
            ChangeEvent::FrontendUpserted(_) => "frontend_upserted",
            ChangeEvent::FrontendDeleted(_) => "frontend_deleted",
            ChangeEvent::MiddlewareUpserted { .. } => "middleware_upserted",
            ChangeEvent::MiddlewareDeleted(_) => "middleware_deleted",
            ChangeEvent::BackendUpserted(_) => "backend_upserted",
            ChangeEvent::BackendDeleted(_) => "backend_deleted",
            ChangeEvent::ServerUpserted { .. } => "server_upserted",
            ChangeEvent::ServerDeleted(_) => "server_deleted",
        }
    }
}

/// A change event tagged with the revision that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    pub revision: Revision,
    pub event: ChangeEvent,
}

impl Engine {
    /// Turn one watched mutation into a change event.
    ///
    /// Returns `Ok(None)` for keys outside the known layout.
    pub async fn parse(&self, event: &WatchEvent) -> Result<Option<ChangeEvent>, Error> {
        let Some(entity) = self.keys.classify(&event.key) else {
            tracing::trace!(key = %event.key, "Ignoring unrecognized key");
            return Ok(None);
        };

        let change = match event.op {
            Operation::Put => self.refetch(entity).await?,
            Operation::Delete => match entity {
                EntityKey::Server(key) => ChangeEvent::ServerDeleted(key),
                EntityKey::Backend(key) => ChangeEvent::BackendDeleted(key),
                EntityKey::Middleware(key) => ChangeEvent::MiddlewareDeleted(key),
                EntityKey::Frontend(key) => ChangeEvent::FrontendDeleted(key),
                EntityKey::Host(key) => ChangeEvent::HostDeleted(key),
                EntityKey::Listener(key) => ChangeEvent::ListenerDeleted(key),
            },
            Operation::Other(ref op) => {
                return Err(Error::UnsupportedOperation {
                    key: event.key.clone(),
                    op: op.clone(),
                })
            }
        };
        Ok(Some(change))
    }

    async fn refetch(&self, entity: EntityKey) -> Result<ChangeEvent, Error> {
        Ok(match entity {
            EntityKey::Server(key) => {
                let server = self.get_server(&key).await?;
                ChangeEvent::ServerUpserted {
                    backend: key.backend,
                    server,
                }
            }
            EntityKey::Backend(key) => ChangeEvent::BackendUpserted(self.get_backend(&key).await?),
            EntityKey::Middleware(key) => {
                let middleware = self.get_middleware(&key).await?;
                ChangeEvent::MiddlewareUpserted {
                    frontend: key.frontend,
                    middleware,
                }
            }
            EntityKey::Frontend(key) => {
                ChangeEvent::FrontendUpserted(self.get_frontend(&key).await?)
            }
            EntityKey::Host(key) => ChangeEvent::HostUpserted(self.get_host(&key).await?),
            EntityKey::Listener(key) => {
                ChangeEvent::ListenerUpserted(self.get_listener(&key).await?)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::BackendSettings;
    use crate::store::{KvStore, MemoryStore};
    use std::sync::Arc;

    fn setup() -> (Arc<MemoryStore>, Engine) {
        let store = Arc::new(MemoryStore::new());
        let engine = Engine::new(store.clone(), "/p", None);
        (store, engine)
    }

    fn put(key: &str, revision: Revision) -> WatchEvent {
        WatchEvent {
            key: key.into(),
            value: Some("ignored".into()),
            op: Operation::Put,
            revision,
        }
    }

    fn delete(key: &str, revision: Revision) -> WatchEvent {
        WatchEvent {
            key: key.into(),
            value: None,
            op: Operation::Delete,
            revision,
        }
    }

    #[tokio::test]
    async fn test_put_refetches_current_value() {
        let (_, engine) = setup();
        let mut backend = Backend::new("b1", BackendSettings::default()).unwrap();
        engine.upsert_backend(&backend).await.unwrap();
        backend.settings.timeouts.read = Some("7s".into());
        engine.upsert_backend(&backend).await.unwrap();

        // The watch payload is stale; the event must carry the stored value.
        let event = engine.parse(&put("/p/backends/b1/backend", 1)).await.unwrap();
        assert_eq!(event, Some(ChangeEvent::BackendUpserted(backend)));
    }

    #[tokio::test]
    async fn test_server_put_is_classified_as_server() {
        let (_, engine) = setup();
        let b1 = BackendKey::new("b1");
        engine
            .upsert_backend(&Backend::new("b1", BackendSettings::default()).unwrap())
            .await
            .unwrap();
        let server = Server::new("s1", "http://10.0.0.1:80").unwrap();
        engine.upsert_server(&b1, &server, None).await.unwrap();

        let event = engine.parse(&put("/p/backends/b1/servers/s1", 2)).await.unwrap();
        assert_eq!(
            event,
            Some(ChangeEvent::ServerUpserted {
                backend: b1,
                server
            })
        );
    }

    #[tokio::test]
    async fn test_delete_carries_identity_only() {
        let (_, engine) = setup();
        let event = engine
            .parse(&delete("/p/frontends/f1/middlewares/m1", 9))
            .await
            .unwrap();
        assert_eq!(
            event,
            Some(ChangeEvent::MiddlewareDeleted(MiddlewareKey::new("f1", "m1")))
        );

        let event = engine.parse(&delete("/p/hosts/a.com/host", 9)).await.unwrap();
        assert_eq!(event, Some(ChangeEvent::HostDeleted(HostKey::new("a.com"))));
    }

    #[tokio::test]
    async fn test_unknown_key_is_ignored() {
        let (_, engine) = setup();
        assert_eq!(engine.parse(&put("/p/unknown/x", 1)).await.unwrap(), None);
        assert_eq!(engine.parse(&delete("/elsewhere/hosts/a/host", 1)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_unsupported_operation() {
        let (_, engine) = setup();
        let event = WatchEvent {
            key: "/p/listeners/l1".into(),
            value: None,
            op: Operation::Other("compact".into()),
            revision: 1,
        };
        assert!(matches!(
            engine.parse(&event).await,
            Err(Error::UnsupportedOperation { ref op, .. }) if op == "compact"
        ));
    }

    #[tokio::test]
    async fn test_put_of_vanished_key_is_not_found() {
        let (store, engine) = setup();
        store.put("/p/listeners/l1", "{}".into(), None).await.unwrap();
        store.delete("/p/listeners/l1").await.unwrap();
        assert!(matches!(
            engine.parse(&put("/p/listeners/l1", 1)).await,
            Err(Error::NotFound(_))
        ));
    }
}
