//! Middleware module providing request processing layers.
//!
//! Available middleware:
//! - `rate_limiter` - Token bucket rate limiting
//! - `restore` - Panic recovery
//! - `timing` - Request duration tracking
//! - `timeout` - Per-call deadline
//! - `cors` - Cross-origin headers and preflight replies
//! - `auth` - JWT bearer authentication
//!
//! A chain `[m0, m1, .., mk]` wraps a handler `h` as
//! `m0.invoke(m1.invoke(.. mk.invoke(h)))`: `m0` runs first on the way in
//! and last on the way out. Chains are composed once, at registration.

pub mod auth;
pub mod cors;
pub mod rate_limiter;
pub mod restore;
pub mod timeout;
pub mod timing;

use std::{collections::HashMap, sync::Arc};

use tracing::info;

use crate::{
    config::MiddlewareConfig,
    errors::{FrameworkError, Result},
    handler::Handler,
};

/// A cross-cutting behavior wrapped around a handler.
pub trait Middleware: Send + Sync {
    fn name(&self) -> &str;

    /// Wraps `next`. Called once per composition, never per request.
    fn invoke(&self, next: Handler) -> Handler;

    /// Releases background resources. Default is a no-op.
    fn stop(&self) {}
}

/// A resolved chain, ready to wrap any terminal handler.
pub type Compose = Arc<dyn Fn(Handler) -> Handler + Send + Sync>;

/// Folds `chain` around `handler`, first element outermost.
pub fn compose(chain: &[Arc<dyn Middleware>], handler: Handler) -> Handler {
    chain
        .iter()
        .rev()
        .fold(handler, |next, middleware| middleware.invoke(next))
}

/// Named middleware instances available to routers and servers.
#[derive(Default)]
pub struct MiddlewareRegistry {
    middlewares: HashMap<String, Arc<dyn Middleware>>,
}

impl MiddlewareRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds every configured middleware. Must run inside a tokio runtime
    /// because the rate limiter starts its sweep task here.
    pub fn from_config(configs: &HashMap<String, MiddlewareConfig>) -> Result<Self> {
        let mut registry = Self::new();

        for (name, config) in configs {
            let middleware: Arc<dyn Middleware> = match config {
                MiddlewareConfig::RateLimit(cfg) => {
                    let limiter = rate_limiter::RateLimitMiddleware::from_config(name, cfg)?;
                    limiter.start_sweeper();
                    Arc::new(limiter)
                }
                MiddlewareConfig::Timing => Arc::new(timing::TimingMiddleware::new(name)),
                MiddlewareConfig::Restore => Arc::new(restore::RestoreMiddleware::new(name)),
                MiddlewareConfig::Timeout(cfg) => {
                    Arc::new(timeout::TimeoutMiddleware::from_config(name, cfg)?)
                }
                MiddlewareConfig::Cors(cfg) => Arc::new(cors::CorsMiddleware::from_config(name, cfg)?),
                MiddlewareConfig::Jwt(cfg) => Arc::new(auth::JwtMiddleware::from_config(name, cfg)?),
            };
            info!(middleware = %name, "Middleware initialised");
            registry.register(name.clone(), middleware);
        }

        Ok(registry)
    }

    /// Adds or replaces the middleware stored under `name`.
    pub fn register(&mut self, name: impl Into<String>, middleware: Arc<dyn Middleware>) {
        self.middlewares.insert(name.into(), middleware);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Middleware>> {
        self.middlewares.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.middlewares.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }

    /// Looks up every name in order; the first unknown name fails the whole
    /// resolution.
    pub fn resolve<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<Arc<dyn Middleware>>> {
        names
            .iter()
            .map(|name| {
                let name = name.as_ref();
                self.get(name)
                    .ok_or_else(|| FrameworkError::MiddlewareNotFound(name.to_string()))
            })
            .collect()
    }

    /// Resolves `names` and returns a function wrapping a handler in that
    /// chain.
    pub fn handler_middleware<S: AsRef<str>>(&self, names: &[S]) -> Result<Compose> {
        let chain = self.resolve(names)?;
        Ok(Arc::new(move |handler| compose(&chain, handler)))
    }

    pub fn stop_all(&self) {
        for (name, middleware) in &self.middlewares {
            middleware.stop();
            info!(middleware = %name, "Middleware stopped");
        }
    }
}
