//! Per-host route table.
//!
//! # Responsibilities
//! - Store the routes of one host, most specific first
//! - Add, replace and remove routes by frontend id
//! - Look up the route for a request path
//!
//! # Design Decisions
//! - The table is an immutable vector behind `ArcSwap`; writers publish a
//!   new table, readers never block
//! - Two frontends may not claim the same path condition on one host

use std::sync::Arc;

use arc_swap::{ArcSwap, ArcSwapOption};

use crate::error::Error;
use crate::model::HostSettings;
use crate::routing::Route;

/// Routes of one host.
#[derive(Debug)]
pub struct HostRouter {
    name: String,
    settings: ArcSwapOption<HostSettings>,
    routes: ArcSwap<Vec<Arc<Route>>>,
}

impl HostRouter {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            settings: ArcSwapOption::empty(),
            routes: ArcSwap::from_pointee(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Host settings, if the host has been declared explicitly.
    pub fn settings(&self) -> Option<Arc<HostSettings>> {
        self.settings.load_full()
    }

    pub fn set_settings(&self, settings: Option<HostSettings>) {
        self.settings.store(settings.map(Arc::new));
    }

    /// Attach a route, replacing any route of the same frontend.
    pub fn add_route(&self, route: Arc<Route>) -> Result<(), Error> {
        let current = self.routes.load();
        if let Some(taken) = current
            .iter()
            .find(|r| r.frontend_id() != route.frontend_id() && r.rule().path == route.rule().path)
        {
            return Err(Error::AlreadyExists(format!(
                "route {} on host '{}' (held by frontend '{}')",
                route.rule(),
                self.name,
                taken.frontend_id()
            )));
        }

        let mut next: Vec<Arc<Route>> = current
            .iter()
            .filter(|r| r.frontend_id() != route.frontend_id())
            .cloned()
            .collect();
        next.push(route);
        next.sort_by(|a, b| {
            b.rule()
                .path
                .specificity()
                .cmp(&a.rule().path.specificity())
                .then_with(|| a.frontend_id().cmp(b.frontend_id()))
        });
        self.routes.store(Arc::new(next));
        Ok(())
    }

    /// Detach the route of `frontend_id`.
    pub fn remove_route(&self, frontend_id: &str) -> Option<Arc<Route>> {
        let current = self.routes.load();
        let removed = current.iter().find(|r| r.frontend_id() == frontend_id)?.clone();
        let next = current
            .iter()
            .filter(|r| r.frontend_id() != frontend_id)
            .cloned()
            .collect();
        self.routes.store(Arc::new(next));
        Some(removed)
    }

    pub fn route(&self, frontend_id: &str) -> Option<Arc<Route>> {
        self.routes
            .load()
            .iter()
            .find(|r| r.frontend_id() == frontend_id)
            .cloned()
    }

    /// Most specific route whose path condition accepts `path`.
    pub fn match_path(&self, path: &str) -> Option<Arc<Route>> {
        self.routes
            .load()
            .iter()
            .find(|r| r.rule().path.matches(path))
            .cloned()
    }

    pub fn routes(&self) -> Arc<Vec<Arc<Route>>> {
        self.routes.load_full()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.load().is_empty()
    }
}
