//! Topology seed files.
//!
//! # Responsibilities
//! - Parse a TOML description of hosts, listeners, backends (with servers)
//!   and frontends (with middlewares)
//! - Write it to the store through the engine, so the usual referential
//!   checks apply
//! - Delete stored entities the file no longer mentions
//!
//! # Design Decisions
//! - The file is authoritative for the namespace it is applied to
//! - Unchanged entities are not rewritten, so re-applying a file produces
//!   no watch events
//! - Writes go parents first and deletes go children first

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::loader::ConfigError;
use crate::config::validation::ValidationError;
use crate::engine::keys::{
    BackendKey, FrontendKey, HostKey, ListenerKey, MiddlewareKey, ServerKey,
};
use crate::engine::{Engine, Snapshot};
use crate::error::Error;
use crate::model::{Backend, Frontend, Host, Listener, Middleware, Server};

/// A backend and its servers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendSeed {
    #[serde(flatten)]
    pub backend: Backend,
    #[serde(default)]
    pub servers: Vec<Server>,
}

/// A frontend and its middlewares.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrontendSeed {
    #[serde(flatten)]
    pub frontend: Frontend,
    #[serde(default)]
    pub middlewares: Vec<Middleware>,
}

/// Contents of a seed file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeedFile {
    pub hosts: Vec<Host>,
    pub listeners: Vec<Listener>,
    pub backends: Vec<BackendSeed>,
    pub frontends: Vec<FrontendSeed>,
}

/// What applying a seed changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub upserted: usize,
    pub deleted: usize,
    pub unchanged: usize,
}

impl SeedFile {
    /// Parse and check a seed document.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let seed: SeedFile = toml::from_str(content)?;
        seed.validate().map_err(ConfigError::Validation)?;
        Ok(seed)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Entity validation, duplicate ids and backend references.
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();
        let mut entity = |field: &'static str, id: &str, result: Result<(), Error>| {
            if let Err(e) = result {
                errors.push(ValidationError {
                    field,
                    message: format!("'{}': {}", id, e),
                });
            }
        };

        for h in &self.hosts {
            entity("hosts", &h.name, h.validate());
        }
        for l in &self.listeners {
            entity("listeners", &l.id, l.validate());
        }
        for b in &self.backends {
            entity("backends", &b.backend.id, b.backend.validate());
            for s in &b.servers {
                entity("servers", &s.id, s.validate());
            }
        }
        for f in &self.frontends {
            entity("frontends", &f.frontend.id, f.frontend.validate());
            for m in &f.middlewares {
                entity("middlewares", &m.id, m.validate());
            }
        }

        duplicates(&mut errors, "hosts", self.hosts.iter().map(|h| h.name.as_str()));
        duplicates(&mut errors, "listeners", self.listeners.iter().map(|l| l.id.as_str()));
        duplicates(
            &mut errors,
            "backends",
            self.backends.iter().map(|b| b.backend.id.as_str()),
        );
        duplicates(
            &mut errors,
            "frontends",
            self.frontends.iter().map(|f| f.frontend.id.as_str()),
        );
        for b in &self.backends {
            duplicates(&mut errors, "servers", b.servers.iter().map(|s| s.id.as_str()));
        }
        for f in &self.frontends {
            duplicates(&mut errors, "middlewares", f.middlewares.iter().map(|m| m.id.as_str()));
        }

        let backends: HashSet<&str> = self.backends.iter().map(|b| b.backend.id.as_str()).collect();
        for f in &self.frontends {
            if !backends.contains(f.frontend.backend_id.as_str()) {
                errors.push(ValidationError {
                    field: "frontends",
                    message: format!(
                        "'{}' references unknown backend '{}'",
                        f.frontend.id, f.frontend.backend_id
                    ),
                });
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

fn duplicates<'a>(
    errors: &mut Vec<ValidationError>,
    field: &'static str,
    ids: impl Iterator<Item = &'a str>,
) {
    let mut seen = HashSet::new();
    for id in ids {
        if !seen.insert(id) {
            errors.push(ValidationError {
                field,
                message: format!("duplicate id '{}'", id),
            });
        }
    }
}

/// Make the store match `seed`.
pub async fn apply_seed(engine: &Engine, seed: &SeedFile) -> Result<SeedReport, Error> {
    let current = engine.snapshot().await?;
    let mut report = SeedReport::default();

    for host in &seed.hosts {
        if current.hosts.contains(host) {
            report.unchanged += 1;
        } else {
            engine.upsert_host(host).await?;
            report.upserted += 1;
        }
    }
    for listener in &seed.listeners {
        if current.listeners.contains(listener) {
            report.unchanged += 1;
        } else {
            engine.upsert_listener(listener).await?;
            report.upserted += 1;
        }
    }
    for entry in &seed.backends {
        let stored = current.backend(&entry.backend.id);
        if stored.is_some_and(|b| b.backend == entry.backend) {
            report.unchanged += 1;
        } else {
            engine.upsert_backend(&entry.backend).await?;
            report.upserted += 1;
        }
        let key = BackendKey::new(entry.backend.id.clone());
        for server in &entry.servers {
            if stored.is_some_and(|b| b.servers.contains(server)) {
                report.unchanged += 1;
            } else {
                engine.upsert_server(&key, server, None).await?;
                report.upserted += 1;
            }
        }
    }
    for entry in &seed.frontends {
        let stored = current.frontend(&entry.frontend.id);
        if stored.is_some_and(|f| f.frontend == entry.frontend) {
            report.unchanged += 1;
        } else {
            engine.upsert_frontend(&entry.frontend, None).await?;
            report.upserted += 1;
        }
        let key = FrontendKey::new(entry.frontend.id.clone());
        for middleware in &entry.middlewares {
            if stored.is_some_and(|f| f.middlewares.contains(middleware)) {
                report.unchanged += 1;
            } else {
                engine.upsert_middleware(&key, middleware, None).await?;
                report.upserted += 1;
            }
        }
    }

    report.deleted = prune(engine, seed, &current).await?;

    tracing::info!(
        upserted = report.upserted,
        deleted = report.deleted,
        unchanged = report.unchanged,
        "Seed applied"
    );
    Ok(report)
}

async fn prune(engine: &Engine, seed: &SeedFile, current: &Snapshot) -> Result<usize, Error> {
    let mut deleted = 0;

    for stored in &current.frontends {
        let id = &stored.frontend.id;
        let key = FrontendKey::new(id.clone());
        match seed.frontends.iter().find(|f| &f.frontend.id == id) {
            None => {
                engine.delete_frontend(&key).await?;
                deleted += 1;
            }
            Some(wanted) => {
                for m in &stored.middlewares {
                    if !wanted.middlewares.iter().any(|w| w.id == m.id) {
                        engine
                            .delete_middleware(&MiddlewareKey::new(id.clone(), m.id.clone()))
                            .await?;
                        deleted += 1;
                    }
                }
            }
        }
    }

    for stored in &current.backends {
        let id = &stored.backend.id;
        match seed.backends.iter().find(|b| &b.backend.id == id) {
            None => {
                engine.delete_backend(&BackendKey::new(id.clone())).await?;
                deleted += 1;
            }
            Some(wanted) => {
                for s in &stored.servers {
                    if !wanted.servers.iter().any(|w| w.id == s.id) {
                        engine
                            .delete_server(&ServerKey::new(id.clone(), s.id.clone()))
                            .await?;
                        deleted += 1;
                    }
                }
            }
        }
    }

    for stored in &current.listeners {
        if !seed.listeners.iter().any(|l| l.id == stored.id) {
            engine.delete_listener(&ListenerKey::new(stored.id.clone())).await?;
            deleted += 1;
        }
    }
    for stored in &current.hosts {
        if !seed.hosts.iter().any(|h| h.name == stored.name) {
            engine.delete_host(&HostKey::new(stored.name.clone())).await?;
            deleted += 1;
        }
    }
    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::sync::Arc;

    const SEED: &str = r#"
        [[listeners]]
        id = "http"
        protocol = "http"
        address = { network = "tcp", address = "0.0.0.0:80" }

        [[backends]]
        id = "b1"
        settings = { timeouts = { read = "5s" } }
        servers = [
            { id = "s1", url = "http://10.0.0.1:8080" },
            { id = "s2", url = "http://10.0.0.2:8080" },
        ]

        [[frontends]]
        id = "f1"
        route = 'Host("example.com") && PathPrefix("/")'
        backend_id = "b1"

        [[frontends.middlewares]]
        id = "rl"
        priority = 1
        type = "ratelimit"
        middleware = { requests = 100, period = "1s" }
    "#;

    fn engine() -> Engine {
        Engine::new(Arc::new(MemoryStore::new()), "/p", None)
    }

    #[test]
    fn test_parse_seed() {
        let seed = SeedFile::parse(SEED).unwrap();
        assert_eq!(seed.backends[0].servers.len(), 2);
        assert_eq!(seed.frontends[0].middlewares[0].kind, "ratelimit");
        assert_eq!(
            seed.frontends[0].middlewares[0].middleware["requests"],
            serde_json::json!(100)
        );
    }

    #[test]
    fn test_validation_catches_references_and_duplicates() {
        let err = SeedFile::parse(
            r#"
            [[backends]]
            id = "b1"
            [[backends]]
            id = "b1"

            [[frontends]]
            id = "f1"
            route = 'Path("/")'
            backend_id = "nope"
            "#,
        )
        .unwrap_err();
        let ConfigError::Validation(errors) = err else {
            panic!("expected validation error");
        };
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().any(|e| e.message.contains("duplicate id 'b1'")));
        assert!(errors.iter().any(|e| e.message.contains("unknown backend 'nope'")));
    }

    #[tokio::test]
    async fn test_apply_is_idempotent() {
        let engine = engine();
        let seed = SeedFile::parse(SEED).unwrap();

        let first = apply_seed(&engine, &seed).await.unwrap();
        assert_eq!(first.upserted, 6);
        assert_eq!(first.deleted, 0);

        let second = apply_seed(&engine, &seed).await.unwrap();
        assert_eq!(second.upserted, 0);
        assert_eq!(second.unchanged, 6);
    }

    #[tokio::test]
    async fn test_apply_prunes_removed_entities() {
        let engine = engine();
        apply_seed(&engine, &SeedFile::parse(SEED).unwrap()).await.unwrap();

        let mut seed = SeedFile::parse(SEED).unwrap();
        seed.backends[0].servers.truncate(1);
        seed.frontends[0].middlewares.clear();
        seed.listeners.clear();
        let report = apply_seed(&engine, &seed).await.unwrap();
        assert_eq!(report.deleted, 3);

        let snapshot = engine.snapshot().await.unwrap();
        assert!(snapshot.listeners.is_empty());
        assert_eq!(snapshot.backend("b1").unwrap().servers.len(), 1);
        assert!(snapshot.frontend("f1").unwrap().middlewares.is_empty());

        // Dropping the frontend and its backend together succeeds.
        let report = apply_seed(&engine, &SeedFile::default()).await.unwrap();
        assert_eq!(report.deleted, 2);
        let snapshot = engine.snapshot().await.unwrap();
        assert!(snapshot.frontends.is_empty() && snapshot.backends.is_empty());
    }
}
