//! Path and topic routing.
//!
//! A [`Router`] keeps three stores: an exact-match table for paths with no
//! `{name}` segment, an arena [`Trie`] for the rest, and an optional `*`
//! fallback. Lookups try them in that order. Every stored handler is already
//! wrapped in the router's base chain around the route's own chain.

pub mod method;
pub mod trie;

use std::{collections::HashMap, sync::Arc};

use tracing::debug;

use crate::{
    context::Params,
    errors::{FrameworkError, Result},
    handler::Handler,
    middleware::{compose, Middleware, MiddlewareRegistry},
};

pub use method::MethodRouter;
pub use trie::{Segment, Trie};

const WILDCARD: &str = "*";

/// A successful lookup.
#[derive(Clone)]
pub struct RouteMatch {
    pub handler: Handler,
    pub params: Params,
}

impl std::fmt::Debug for RouteMatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteMatch").field("params", &self.params).finish()
    }
}

pub struct Router {
    registry: Arc<MiddlewareRegistry>,
    base: Vec<Arc<dyn Middleware>>,
    static_routes: HashMap<String, Handler>,
    trie: Trie,
    wildcard: Option<Handler>,
}

impl Router {
    pub fn new(registry: Arc<MiddlewareRegistry>) -> Self {
        Self::with_resolved_base(registry, Vec::new())
    }

    pub(crate) fn with_resolved_base(registry: Arc<MiddlewareRegistry>, base: Vec<Arc<dyn Middleware>>) -> Self {
        Self {
            registry,
            base,
            static_routes: HashMap::new(),
            trie: Trie::new(),
            wildcard: None,
        }
    }

    /// Sets the chain applied outside every route's own chain. Only routes
    /// pushed afterwards are affected.
    pub fn with_base_chain<S: AsRef<str>>(mut self, names: &[S]) -> Result<Self> {
        self.base = self.registry.resolve(names)?;
        Ok(self)
    }

    pub fn registry(&self) -> &Arc<MiddlewareRegistry> {
        &self.registry
    }

    /// Registers `handler` under `path` wrapped in the named middleware. An
    /// unknown middleware name fails the call and leaves the router as it was.
    pub fn push_route<S: AsRef<str>>(&mut self, path: &str, handler: Handler, middleware: &[S]) -> Result<()> {
        check_path(path)?;
        let chain = self.registry.resolve(middleware)?;
        self.insert(path, handler, &chain);
        Ok(())
    }

    pub(crate) fn insert(&mut self, path: &str, handler: Handler, chain: &[Arc<dyn Middleware>]) {
        let handler = compose(&self.base, compose(chain, handler));

        if path.trim_matches('/') == WILDCARD {
            debug!("Wildcard route registered");
            self.wildcard = Some(handler);
            return;
        }

        let normalized = normalize(path);
        let segments: Vec<Segment<'_>> = split(&normalized).into_iter().map(Segment::parse).collect();

        if segments.iter().any(Segment::is_dynamic) {
            self.trie.insert(&segments, handler);
        } else {
            self.static_routes.insert(normalized.clone(), handler);
        }
        debug!(route = %normalized, "Route registered");
    }

    /// Static table, then trie, then the wildcard. `None` means no route.
    pub fn find(&self, path: &str) -> Option<RouteMatch> {
        let normalized = normalize(path);

        if let Some(handler) = self.static_routes.get(&normalized) {
            return Some(RouteMatch {
                handler: handler.clone(),
                params: Params::new(),
            });
        }

        if let Some((handler, params)) = self.trie.find(&split(&normalized)) {
            return Some(RouteMatch { handler, params });
        }

        self.wildcard.as_ref().map(|handler| RouteMatch {
            handler: handler.clone(),
            params: Params::new(),
        })
    }

    pub fn route_count(&self) -> usize {
        self.static_routes.len() + self.trie.route_count() + usize::from(self.wildcard.is_some())
    }
}

/// Adds the leading and trailing `/` when missing, so `users`, `/users`
/// and `/users/` share one key.
pub fn normalize(path: &str) -> String {
    let mut normalized = String::with_capacity(path.len() + 2);
    if !path.starts_with('/') {
        normalized.push('/');
    }
    normalized.push_str(path);
    if !normalized.ends_with('/') {
        normalized.push('/');
    }
    normalized
}

/// Rejects paths binding the same parameter name twice.
pub(crate) fn check_path(path: &str) -> Result<()> {
    let normalized = normalize(path);
    let mut seen = Vec::new();
    for segment in split(&normalized).into_iter().map(Segment::parse) {
        if let Segment::Dynamic(name) = segment {
            if seen.contains(&name) {
                return Err(FrameworkError::InvalidRoute(format!(
                    "{}: parameter '{}' appears more than once",
                    path, name
                )));
            }
            seen.push(name);
        }
    }
    Ok(())
}

/// Segments of a normalized path, without the outer slashes.
fn split(normalized: &str) -> Vec<&str> {
    let inner = normalized.strip_prefix('/').unwrap_or(normalized);
    let inner = inner.strip_suffix('/').unwrap_or(inner);
    if inner.is_empty() {
        Vec::new()
    } else {
        inner.split('/').collect()
    }
}
