use std::{collections::HashMap, sync::Arc};

use crate::{
    errors::Result,
    handler::Handler,
    middleware::{Middleware, MiddlewareRegistry},
    router::{check_path, RouteMatch, Router},
};

/// One [`Router`] per HTTP method, all sharing a registry and base chain.
/// A method with no routes simply never matches.
pub struct MethodRouter {
    registry: Arc<MiddlewareRegistry>,
    base: Vec<Arc<dyn Middleware>>,
    routers: HashMap<String, Router>,
}

impl MethodRouter {
    pub fn new(registry: Arc<MiddlewareRegistry>) -> Self {
        Self {
            registry,
            base: Vec::new(),
            routers: HashMap::new(),
        }
    }

    pub fn with_base_chain<S: AsRef<str>>(mut self, names: &[S]) -> Result<Self> {
        self.base = self.registry.resolve(names)?;
        Ok(self)
    }

    pub fn push_route<S: AsRef<str>>(
        &mut self,
        method: &str,
        path: &str,
        handler: Handler,
        middleware: &[S],
    ) -> Result<()> {
        // Validate before touching the map so a failure leaves no empty router
        check_path(path)?;
        let chain = self.registry.resolve(middleware)?;
        let router = self
            .routers
            .entry(method.to_ascii_uppercase())
            .or_insert_with(|| Router::with_resolved_base(self.registry.clone(), self.base.clone()));
        router.insert(path, handler, &chain);
        Ok(())
    }

    pub fn find(&self, method: &str, path: &str) -> Option<RouteMatch> {
        self.routers
            .get(method.to_ascii_uppercase().as_str())?
            .find(path)
    }

    pub fn route_count(&self) -> usize {
        self.routers.values().map(Router::route_count).sum()
    }
}
