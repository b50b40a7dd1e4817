//! A live route and its middleware chain.

use std::collections::BTreeMap;
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::load_balancer::EndpointPool;
use crate::model::{BackendSettings, FrontendSettings, Middleware};
use crate::routing::RouteRule;

/// Middlewares of one route, kept in execution order.
#[derive(Debug)]
pub struct MiddlewareChain {
    entries: ArcSwap<Vec<Middleware>>,
}

impl Default for MiddlewareChain {
    fn default() -> Self {
        Self::new()
    }
}

impl MiddlewareChain {
    pub fn new() -> Self {
        Self {
            entries: ArcSwap::from_pointee(Vec::new()),
        }
    }

    /// Insert or replace the middleware with the same id.
    pub fn upsert(&self, middleware: Middleware) {
        let mut next: Vec<Middleware> = self
            .entries
            .load()
            .iter()
            .filter(|m| m.id != middleware.id)
            .cloned()
            .collect();
        next.push(middleware);
        next.sort_by(|a, b| a.order_key().cmp(&b.order_key()));
        self.entries.store(Arc::new(next));
    }

    /// Remove a middleware; returns whether it was present.
    pub fn remove(&self, id: &str) -> bool {
        let current = self.entries.load();
        if !current.iter().any(|m| m.id == id) {
            return false;
        }
        let next = current.iter().filter(|m| m.id != id).cloned().collect();
        self.entries.store(Arc::new(next));
        true
    }

    /// Replace the whole chain; a later entry wins over an earlier one with the same id.
    pub fn replace_all(&self, middlewares: impl IntoIterator<Item = Middleware>) {
        let by_id: BTreeMap<String, Middleware> = middlewares
            .into_iter()
            .map(|m| (m.id.clone(), m))
            .collect();
        let mut next: Vec<Middleware> = by_id.into_values().collect();
        next.sort_by(|a, b| a.order_key().cmp(&b.order_key()));
        self.entries.store(Arc::new(next));
    }

    /// Current chain in execution order.
    pub fn snapshot(&self) -> Arc<Vec<Middleware>> {
        self.entries.load_full()
    }

    pub fn ids(&self) -> Vec<String> {
        self.entries.load().iter().map(|m| m.id.clone()).collect()
    }
}

/// Route handler for one frontend.
#[derive(Debug)]
pub struct Route {
    frontend_id: String,
    rule: RouteRule,
    backend_id: ArcSwap<String>,
    settings: ArcSwap<FrontendSettings>,
    chain: MiddlewareChain,
    pool: EndpointPool,
}

impl Route {
    pub fn new(
        frontend_id: impl Into<String>,
        rule: RouteRule,
        backend_id: impl Into<String>,
        settings: FrontendSettings,
        backend_settings: BackendSettings,
    ) -> Self {
        Self {
            frontend_id: frontend_id.into(),
            rule,
            backend_id: ArcSwap::from_pointee(backend_id.into()),
            settings: ArcSwap::from_pointee(settings),
            chain: MiddlewareChain::new(),
            pool: EndpointPool::new(backend_settings),
        }
    }

    pub fn frontend_id(&self) -> &str {
        &self.frontend_id
    }

    pub fn rule(&self) -> &RouteRule {
        &self.rule
    }

    pub fn backend_id(&self) -> Arc<String> {
        self.backend_id.load_full()
    }

    pub fn set_backend_id(&self, backend_id: &str) {
        if self.backend_id.load().as_str() != backend_id {
            self.backend_id.store(Arc::new(backend_id.to_string()));
        }
    }

    pub fn settings(&self) -> Arc<FrontendSettings> {
        self.settings.load_full()
    }

    pub fn update_settings(&self, settings: FrontendSettings) {
        self.settings.store(Arc::new(settings));
    }

    pub fn chain(&self) -> &MiddlewareChain {
        &self.chain
    }

    pub fn pool(&self) -> &EndpointPool {
        &self.pool
    }
}
