//! Live proxy topology.
//!
//! # Responsibilities
//! - Own the per-host routers and the listener registry
//! - Resolve a request (host, path) to a route for the serving path
//! - Record the store revision the topology reflects
//!
//! # Design Decisions
//! - Only the reconciler mutates the topology; everything else reads it
//! - Routers live in a `DashMap`, so adding a host never blocks lookups
//!   on other hosts; each router swaps its own route table

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use crate::model::Listener;
use crate::routing::{matcher::normalize_host, HostRouter, Route, CATCH_ALL};
use crate::store::Revision;

/// The in-memory object graph the proxy serves from.
#[derive(Debug, Default)]
pub struct Topology {
    routers: DashMap<String, Arc<HostRouter>>,
    listeners: DashMap<String, Listener>,
    revision: AtomicU64,
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn router(&self, host: &str) -> Option<Arc<HostRouter>> {
        self.routers.get(host).map(|r| r.value().clone())
    }

    /// Get the router for `host`, creating it on first use.
    ///
    /// The flag is true when the router was created by this call.
    pub fn ensure_router(&self, host: &str) -> (Arc<HostRouter>, bool) {
        if let Some(router) = self.router(host) {
            return (router, false);
        }
        let mut created = false;
        let router = self
            .routers
            .entry(host.to_string())
            .or_insert_with(|| {
                created = true;
                Arc::new(HostRouter::new(host))
            })
            .value()
            .clone();
        if created {
            tracing::debug!(host = %host, "Router created");
        }
        (router, created)
    }

    pub fn remove_router(&self, host: &str) -> Option<Arc<HostRouter>> {
        self.routers.remove(host).map(|(_, router)| router)
    }

    /// All routers, sorted by host name.
    pub fn routers(&self) -> Vec<Arc<HostRouter>> {
        let mut routers: Vec<_> = self.routers.iter().map(|r| r.value().clone()).collect();
        routers.sort_by(|a, b| a.name().cmp(b.name()));
        routers
    }

    /// Find a route by frontend id across all routers.
    pub fn find_route(&self, frontend_id: &str) -> Option<Arc<Route>> {
        self.routers
            .iter()
            .find_map(|r| r.value().route(frontend_id))
    }

    /// Route a request: the host's router first, then the catch-all router.
    pub fn resolve(&self, host: &str, path: &str) -> Option<Arc<Route>> {
        let host = normalize_host(host);
        self.router(&host)
            .and_then(|r| r.match_path(path))
            .or_else(|| self.router(CATCH_ALL).and_then(|r| r.match_path(path)))
    }

    pub fn upsert_listener(&self, listener: Listener) {
        self.listeners.insert(listener.id.clone(), listener);
    }

    pub fn remove_listener(&self, id: &str) -> Option<Listener> {
        self.listeners.remove(id).map(|(_, l)| l)
    }

    /// All listeners, sorted by id.
    pub fn listeners(&self) -> Vec<Listener> {
        let mut listeners: Vec<_> = self.listeners.iter().map(|l| l.value().clone()).collect();
        listeners.sort_by(|a, b| a.id.cmp(&b.id));
        listeners
    }

    /// Revision of the last change applied to the topology.
    pub fn revision(&self) -> Revision {
        self.revision.load(Ordering::Acquire)
    }

    pub fn set_revision(&self, revision: Revision) {
        self.revision.store(revision, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::RouteRule;

    fn attach(topology: &Topology, id: &str, rule: &str) {
        let rule = RouteRule::parse(rule).unwrap();
        let (router, _) = topology.ensure_router(rule.router_key());
        let route = Route::new(id, rule, "b1", Default::default(), Default::default());
        router.add_route(Arc::new(route)).unwrap();
    }

    #[test]
    fn test_ensure_router_reuses() {
        let topology = Topology::new();
        let (a, created) = topology.ensure_router("example.com");
        assert!(created);
        let (b, created) = topology.ensure_router("example.com");
        assert!(!created);
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_resolve_falls_back_to_catch_all() {
        let topology = Topology::new();
        attach(&topology, "site", r#"Host("example.com") && PathPrefix("/")"#);
        attach(&topology, "health", r#"Path("/health")"#);

        assert_eq!(
            topology.resolve("Example.com:443", "/x").unwrap().frontend_id(),
            "site"
        );
        assert_eq!(
            topology.resolve("other.org", "/health").unwrap().frontend_id(),
            "health"
        );
        assert!(topology.resolve("other.org", "/x").is_none());
        assert_eq!(topology.find_route("health").unwrap().frontend_id(), "health");
    }

    #[test]
    fn test_listener_registry() {
        let topology = Topology::new();
        topology.upsert_listener(Listener::new("b", "http", "tcp", ":80").unwrap());
        topology.upsert_listener(Listener::new("a", "https", "tcp", ":443").unwrap());
        let ids: Vec<_> = topology.listeners().into_iter().map(|l| l.id).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(topology.remove_listener("a").is_some());
        assert_eq!(topology.listeners().len(), 1);
    }
}
