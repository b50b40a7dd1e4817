//! Reconciler: applies snapshots and change events to the live topology.
//!
//! # Data Flow
//! ```text
//! Snapshot ──bootstrap──▶ Reconciler ──▶ Topology (routers, routes, pools, listeners)
//! Change   ──apply──────▶     │
//!                             └─ remembers what it applied (hosts, backends with
//!                                servers, frontends with middlewares) so later
//!                                events can be resolved without reading the store
//! ```
//!
//! # Design Decisions
//! - Single consumer: only this type writes to the topology
//! - Every operation is idempotent; replaying a change leaves the
//!   topology as it was
//! - Deletes of children whose owner is already gone are no-ops, because
//!   prefix deletes arrive as one event per key in arbitrary order
//! - Endpoint updates touch only the difference between live and desired
//!   sets, so unchanged endpoints keep their in-flight counters

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use tokio::sync::mpsc;
use url::Url;

use crate::engine::keys::{BackendKey, FrontendKey, HostKey, MiddlewareKey, ServerKey};
use crate::engine::{Change, ChangeEvent, Snapshot};
use crate::error::Error;
use crate::model::{Backend, Frontend, Host, Listener, Middleware, Server};
use crate::observability::metrics;
use crate::proxy::Topology;
use crate::routing::{Route, RouteRule};
use crate::store::Revision;

#[derive(Debug, Clone)]
struct BackendState {
    backend: Backend,
    servers: BTreeMap<String, Server>,
}

#[derive(Debug, Clone)]
struct FrontendState {
    frontend: Frontend,
    rule: RouteRule,
    middlewares: BTreeMap<String, Middleware>,
}

/// Outcome of a bootstrap pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BootstrapReport {
    pub applied: usize,
    pub failed: usize,
    pub pruned: usize,
}

/// Keeps a [`Topology`] converged on the stored configuration.
#[derive(Debug)]
pub struct Reconciler {
    topology: Arc<Topology>,
    hosts: HashMap<String, Host>,
    backends: HashMap<String, BackendState>,
    frontends: HashMap<String, FrontendState>,
    revision: Revision,
    /// Backends whose endpoints changed during a batch, synced when it ends.
    pending: Option<BTreeSet<String>>,
}

/// Upper bound on changes drained into one batch.
const MAX_BATCH: usize = 256;

impl Reconciler {
    pub fn new(topology: Arc<Topology>) -> Self {
        Self {
            topology,
            hosts: HashMap::new(),
            backends: HashMap::new(),
            frontends: HashMap::new(),
            revision: 0,
            pending: None,
        }
    }

    pub fn topology(&self) -> &Arc<Topology> {
        &self.topology
    }

    /// Revision of the last snapshot or change consumed.
    pub fn revision(&self) -> Revision {
        self.revision
    }

    /// Converge on a snapshot.
    ///
    /// Every entity in the snapshot is applied; entities known from an
    /// earlier bootstrap or event stream but absent from the snapshot are
    /// removed. Individual failures are logged and counted.
    pub fn bootstrap(&mut self, snapshot: &Snapshot) -> BootstrapReport {
        let mut report = BootstrapReport::default();
        let mut tally = |what: &str, id: &str, result: Result<(), Error>| match result {
            Ok(()) => report.applied += 1,
            Err(e) => {
                report.failed += 1;
                tracing::warn!(entity = what, id = %id, error = %e, "Bootstrap skipped entity");
            }
        };

        for listener in &snapshot.listeners {
            self.topology.upsert_listener(listener.clone());
            tally("listener", &listener.id, Ok(()));
        }
        for host in &snapshot.hosts {
            tally("host", &host.name, self.upsert_host(host.clone()));
        }
        for spec in &snapshot.backends {
            let result = self.upsert_backend(spec.backend.clone()).map(|()| {
                if let Some(state) = self.backends.get_mut(&spec.backend.id) {
                    state.servers = spec
                        .servers
                        .iter()
                        .map(|s| (s.id.clone(), s.clone()))
                        .collect();
                }
            });
            tally("backend", &spec.backend.id, result);
        }
        for spec in &snapshot.frontends {
            let result =
                self.upsert_frontend(spec.frontend.clone(), Some(spec.middlewares.clone()));
            if result.is_err() {
                // An older version must not outlive a snapshot that rejects it.
                self.delete_frontend(&FrontendKey::new(spec.frontend.id.clone()));
            }
            tally("frontend", &spec.frontend.id, result);
        }
        // Servers may have changed for backends whose frontends were untouched.
        let backend_ids: Vec<String> = self.backends.keys().cloned().collect();
        for id in &backend_ids {
            self.sync_backend(id);
        }

        report.pruned = self.prune(snapshot);
        self.advance(snapshot.revision);
        metrics::record_snapshot_revision(snapshot.revision);

        tracing::info!(
            revision = snapshot.revision,
            applied = report.applied,
            failed = report.failed,
            pruned = report.pruned,
            "Bootstrap complete"
        );
        report
    }

    fn prune(&mut self, snapshot: &Snapshot) -> usize {
        let mut pruned = 0;

        let stale: Vec<String> = self
            .frontends
            .keys()
            .filter(|id| snapshot.frontend(id).is_none())
            .cloned()
            .collect();
        for id in stale {
            self.delete_frontend(&FrontendKey::new(id));
            pruned += 1;
        }

        let stale: Vec<String> = self
            .backends
            .keys()
            .filter(|id| snapshot.backend(id).is_none())
            .cloned()
            .collect();
        for id in stale {
            let key = BackendKey::new(id);
            match self.delete_backend(&key) {
                Ok(()) => pruned += 1,
                Err(e) => tracing::warn!(backend = %key, error = %e, "Kept stale backend"),
            }
        }

        let stale: Vec<String> = self
            .hosts
            .keys()
            .filter(|name| !snapshot.hosts.iter().any(|h| &host_router_key(&h.name) == *name))
            .cloned()
            .collect();
        for name in stale {
            self.delete_host(&HostKey::new(name));
            pruned += 1;
        }

        for listener in self.topology.listeners() {
            if !snapshot.listeners.iter().any(|l| l.id == listener.id) {
                self.topology.remove_listener(&listener.id);
                pruned += 1;
            }
        }
        pruned
    }

    /// Apply one change to the topology.
    pub fn apply(&mut self, change: Change) -> Result<(), Error> {
        let Change { revision, event } = change;
        let result = match event {
            ChangeEvent::HostUpserted(host) => self.upsert_host(host),
            ChangeEvent::HostDeleted(key) => {
                self.delete_host(&key);
                Ok(())
            }
            ChangeEvent::ListenerUpserted(listener) => {
                self.upsert_listener(listener);
                Ok(())
            }
            ChangeEvent::ListenerDeleted(key) => {
                if self.topology.remove_listener(&key.id).is_some() {
                    tracing::info!(listener = %key, "Listener removed");
                }
                Ok(())
            }
            ChangeEvent::FrontendUpserted(frontend) => self.upsert_frontend(frontend, None),
            ChangeEvent::FrontendDeleted(key) => {
                self.delete_frontend(&key);
                Ok(())
            }
            ChangeEvent::MiddlewareUpserted {
                frontend,
                middleware,
            } => self.upsert_middleware(&frontend, middleware),
            ChangeEvent::MiddlewareDeleted(key) => {
                self.delete_middleware(&key);
                Ok(())
            }
            ChangeEvent::BackendUpserted(backend) => self.upsert_backend(backend),
            ChangeEvent::BackendDeleted(key) => self.delete_backend(&key),
            ChangeEvent::ServerUpserted { backend, server } => {
                self.upsert_server(&backend, server)
            }
            ChangeEvent::ServerDeleted(key) => {
                self.delete_server(&key);
                Ok(())
            }
        };
        self.advance(revision);
        result
    }

    /// Apply ready changes as one unit.
    ///
    /// Server changes only update the desired state; each touched backend
    /// is converged once at the end, so a replace (delete then add) never
    /// leaves a pool empty. Failed changes are logged and dropped. Returns
    /// the number applied.
    pub fn apply_batch(&mut self, changes: Vec<Change>) -> usize {
        self.pending = Some(BTreeSet::new());
        let mut applied = 0;
        for change in changes {
            if self.apply_logged(change) {
                applied += 1;
            }
        }
        let touched = self.pending.take().unwrap_or_default();
        for id in &touched {
            self.sync_backend(id);
        }
        applied
    }

    /// Drain a change channel until every sender is gone.
    ///
    /// Changes already queued are applied together through
    /// [`Reconciler::apply_batch`]. Returns the number applied.
    pub async fn run(&mut self, rx: &mut mpsc::Receiver<Change>) -> usize {
        let mut applied = 0;
        while let Some(first) = rx.recv().await {
            let mut batch = vec![first];
            while batch.len() < MAX_BATCH {
                match rx.try_recv() {
                    Ok(change) => batch.push(change),
                    Err(_) => break,
                }
            }
            applied += self.apply_batch(batch);
        }
        applied
    }

    fn apply_logged(&mut self, change: Change) -> bool {
        let kind = change.event.kind();
        let revision = change.revision;
        match self.apply(change) {
            Ok(()) => {
                metrics::record_event_applied(kind);
                tracing::debug!(kind, revision, "Change applied");
                true
            }
            Err(e) => {
                metrics::record_event_dropped(kind, e.kind());
                tracing::warn!(kind, revision, error = %e, "Dropping change");
                false
            }
        }
    }

    fn advance(&mut self, revision: Revision) {
        if revision > self.revision {
            self.revision = revision;
            self.topology.set_revision(revision);
        }
    }

    // --- Hosts ---

    fn upsert_host(&mut self, host: Host) -> Result<(), Error> {
        let name = host_router_key(&host.name);
        let (router, created) = self.topology.ensure_router(&name);
        router.set_settings(Some(host.settings.clone()));
        self.hosts.insert(name.clone(), host);
        tracing::info!(host = %name, created, "Host upserted");
        Ok(())
    }

    /// Forget a declared host. Routes of frontends naming it stay live.
    fn delete_host(&mut self, key: &HostKey) {
        let name = host_router_key(&key.name);
        if self.hosts.remove(&name).is_none() {
            return;
        }
        let Some(router) = self.topology.router(&name) else {
            return;
        };
        router.set_settings(None);
        if router.is_empty() {
            self.topology.remove_router(&name);
            tracing::info!(host = %name, "Host router removed");
        } else {
            tracing::info!(host = %name, routes = router.routes().len(), "Host settings cleared");
        }
    }

    // --- Listeners ---

    fn upsert_listener(&mut self, listener: Listener) {
        tracing::info!(
            listener = %listener.id,
            address = %listener.address.address,
            "Listener registered"
        );
        self.topology.upsert_listener(listener);
    }

    // --- Frontends ---

    fn upsert_frontend(
        &mut self,
        frontend: Frontend,
        middlewares: Option<Vec<Middleware>>,
    ) -> Result<(), Error> {
        if !self.backends.contains_key(&frontend.backend_id) {
            return Err(Error::NotFound(
                BackendKey::new(frontend.backend_id.clone()).to_string(),
            ));
        }
        let rule = frontend.rule()?;
        let id = frontend.id.clone();

        let previous = self.frontends.get(&id).cloned();
        let middlewares = match (middlewares, &previous) {
            (Some(list), _) => list.into_iter().map(|m| (m.id.clone(), m)).collect(),
            (None, Some(prev)) => prev.middlewares.clone(),
            (None, None) => BTreeMap::new(),
        };
        let state = FrontendState {
            frontend,
            rule,
            middlewares,
        };

        match &previous {
            Some(prev) if prev.rule == state.rule => {
                match self.live_route(&id, &state.rule) {
                    Some(route) => self.refresh_route(&route, &state),
                    None => {
                        self.install_route(&state)?;
                    }
                }
            }
            _ => {
                self.install_route(&state)?;
                if let Some(prev) = &previous {
                    if prev.rule.router_key() != state.rule.router_key() {
                        self.detach(&id, &prev.rule);
                    }
                    tracing::info!(frontend = %id, from = %prev.rule, to = %state.rule, "Route moved");
                }
            }
        }

        let backend_id = state.frontend.backend_id.clone();
        self.frontends.insert(id.clone(), state);
        self.sync_frontend(&id, &backend_id);
        tracing::info!(frontend = %id, backend = %backend_id, "Frontend upserted");
        Ok(())
    }

    fn delete_frontend(&mut self, key: &FrontendKey) {
        let Some(state) = self.frontends.remove(&key.id) else {
            tracing::debug!(frontend = %key, "Delete of unknown frontend ignored");
            return;
        };
        self.detach(&key.id, &state.rule);
        tracing::info!(frontend = %key, "Frontend removed");
    }

    /// Build a fresh route for `state` and publish it in its router.
    fn install_route(&self, state: &FrontendState) -> Result<Arc<Route>, Error> {
        let backend_settings = self
            .backends
            .get(&state.frontend.backend_id)
            .map(|b| b.backend.settings.clone())
            .unwrap_or_default();
        let route = Arc::new(Route::new(
            state.frontend.id.clone(),
            state.rule.clone(),
            state.frontend.backend_id.clone(),
            state.frontend.settings.clone(),
            backend_settings,
        ));
        route.chain().replace_all(state.middlewares.values().cloned());
        // Endpoints first, so the route is never served with an empty pool.
        let desired = self.desired_endpoints(&state.frontend.backend_id);
        self.sync_pool(&route, &state.frontend.backend_id, &desired);

        let key = state.rule.router_key();
        let (router, created) = self.topology.ensure_router(key);
        if let Err(e) = router.add_route(route.clone()) {
            if created && router.is_empty() && !self.hosts.contains_key(key) {
                self.topology.remove_router(key);
            }
            return Err(e);
        }
        Ok(route)
    }

    fn refresh_route(&self, route: &Route, state: &FrontendState) {
        route.set_backend_id(&state.frontend.backend_id);
        route.update_settings(state.frontend.settings.clone());
        if let Some(backend) = self.backends.get(&state.frontend.backend_id) {
            route.pool().update_settings(backend.backend.settings.clone());
        }
        route.chain().replace_all(state.middlewares.values().cloned());
    }

    fn detach(&self, id: &str, rule: &RouteRule) {
        let key = rule.router_key();
        let Some(router) = self.topology.router(key) else {
            return;
        };
        router.remove_route(id);
        // Routers created implicitly for a frontend go away with their last route.
        if router.is_empty() && !self.hosts.contains_key(key) {
            self.topology.remove_router(key);
            tracing::debug!(host = %key, "Empty router removed");
        }
    }

    fn live_route(&self, id: &str, rule: &RouteRule) -> Option<Arc<Route>> {
        self.topology
            .router(rule.router_key())
            .and_then(|router| router.route(id))
    }

    // --- Middlewares ---

    fn upsert_middleware(
        &mut self,
        frontend: &FrontendKey,
        middleware: Middleware,
    ) -> Result<(), Error> {
        let Some(state) = self.frontends.get_mut(&frontend.id) else {
            return Err(Error::NotFound(frontend.to_string()));
        };
        state.middlewares.insert(middleware.id.clone(), middleware.clone());
        let rule = state.rule.clone();
        if let Some(route) = self.live_route(&frontend.id, &rule) {
            tracing::info!(frontend = %frontend, middleware = %middleware.id, "Middleware upserted");
            route.chain().upsert(middleware);
        }
        Ok(())
    }

    fn delete_middleware(&mut self, key: &MiddlewareKey) {
        let Some(state) = self.frontends.get_mut(&key.frontend.id) else {
            tracing::debug!(middleware = %key, "Delete of middleware of unknown frontend ignored");
            return;
        };
        state.middlewares.remove(&key.id);
        let rule = state.rule.clone();
        if let Some(route) = self.live_route(&key.frontend.id, &rule) {
            if route.chain().remove(&key.id) {
                tracing::info!(middleware = %key, "Middleware removed");
            }
        }
    }

    // --- Backends ---

    fn upsert_backend(&mut self, backend: Backend) -> Result<(), Error> {
        let id = backend.id.clone();
        match self.backends.get_mut(&id) {
            Some(state) => state.backend = backend,
            None => {
                self.backends.insert(
                    id.clone(),
                    BackendState {
                        backend,
                        servers: BTreeMap::new(),
                    },
                );
            }
        }

        let settings = &self.backends[&id].backend.settings;
        let mut updated = 0;
        for route in self.bound_routes(&id) {
            route.pool().update_settings(settings.clone());
            updated += 1;
        }
        tracing::info!(backend = %id, pools = updated, "Backend upserted");
        Ok(())
    }

    fn delete_backend(&mut self, key: &BackendKey) -> Result<(), Error> {
        let frontends = self.frontends_of(&key.id);
        if !frontends.is_empty() {
            return Err(Error::InUse {
                backend: key.id.clone(),
                frontends,
            });
        }
        if self.backends.remove(&key.id).is_some() {
            tracing::info!(backend = %key, "Backend removed");
        }
        Ok(())
    }

    // --- Servers ---

    fn upsert_server(&mut self, backend: &BackendKey, server: Server) -> Result<(), Error> {
        let Some(state) = self.backends.get_mut(&backend.id) else {
            return Err(Error::NotFound(backend.to_string()));
        };
        state.servers.insert(server.id.clone(), server);
        self.touch(&backend.id);
        Ok(())
    }

    fn delete_server(&mut self, key: &ServerKey) {
        let Some(state) = self.backends.get_mut(&key.backend.id) else {
            tracing::debug!(server = %key, "Delete of server of unknown backend ignored");
            return;
        };
        if state.servers.remove(&key.id).is_some() {
            self.touch(&key.backend.id);
        }
    }

    // --- Endpoint sync ---

    fn desired_endpoints(&self, backend_id: &str) -> Vec<Url> {
        let Some(state) = self.backends.get(backend_id) else {
            return Vec::new();
        };
        state
            .servers
            .values()
            .filter_map(|server| match server.parsed_url() {
                Ok(url) => Some(url),
                Err(e) => {
                    tracing::warn!(backend = %backend_id, server = %server.id, error = %e, "Ignoring server");
                    None
                }
            })
            .collect()
    }

    /// Sync now, or at the end of the running batch.
    fn touch(&mut self, backend_id: &str) {
        if let Some(pending) = self.pending.as_mut() {
            pending.insert(backend_id.to_string());
            return;
        }
        self.sync_backend(backend_id);
    }

    /// Converge the pools of every route bound to `backend_id`.
    fn sync_backend(&self, backend_id: &str) {
        let desired = self.desired_endpoints(backend_id);
        for route in self.bound_routes(backend_id) {
            self.sync_pool(&route, backend_id, &desired);
        }
    }

    fn sync_frontend(&self, frontend_id: &str, backend_id: &str) {
        let Some(state) = self.frontends.get(frontend_id) else {
            return;
        };
        if let Some(route) = self.live_route(frontend_id, &state.rule) {
            let desired = self.desired_endpoints(backend_id);
            self.sync_pool(&route, backend_id, &desired);
        }
    }

    fn sync_pool(&self, route: &Route, backend_id: &str, desired: &[Url]) {
        let report = route.pool().sync(desired);
        if report.changed() {
            metrics::record_endpoint_changes(backend_id, report.added.len(), report.removed.len());
            tracing::info!(
                frontend = %route.frontend_id(),
                backend = %backend_id,
                added = report.added.len(),
                removed = report.removed.len(),
                failed = report.failed.len(),
                "Endpoints synced"
            );
        }
    }

    /// Sorted ids of frontends referencing `backend_id`.
    fn frontends_of(&self, backend_id: &str) -> Vec<String> {
        let mut ids: Vec<String> = self
            .frontends
            .values()
            .filter(|f| f.frontend.backend_id == backend_id)
            .map(|f| f.frontend.id.clone())
            .collect();
        ids.sort();
        ids
    }

    fn bound_routes(&self, backend_id: &str) -> Vec<Arc<Route>> {
        self.frontends
            .values()
            .filter(|f| f.frontend.backend_id == backend_id)
            .filter_map(|f| self.live_route(&f.frontend.id, &f.rule))
            .collect()
    }
}

fn host_router_key(name: &str) -> String {
    name.to_ascii_lowercase()
}
