//! # Service core
//!
//! Routing and middleware engine shared by several transport front ends:
//! - Path/topic router: exact table, `{name}` trie and `*` fallback
//! - Middleware chains composed once at registration
//! - Token bucket rate limiting with idle bucket eviction
//! - Restore, timing, timeout, CORS and JWT middleware
//! - HTTP (axum) and message consumer front ends

pub mod config;
pub mod constants;
pub mod context;
pub mod errors;
pub mod features;
pub mod handler;
pub mod middleware;
pub mod router;
pub mod server;
pub mod utils;

pub use context::{Context, Params, Request, Response};
pub use errors::{FrameworkError, Rejection};
pub use handler::{handler_fn, BoxFuture, Handler};
pub use middleware::{Middleware, MiddlewareRegistry};
pub use router::{MethodRouter, RouteMatch, Router};

use std::{path::PathBuf, sync::Arc};

use anyhow::Result;
use dotenvy::dotenv;
use tracing::info;

use crate::{
    config::ServiceConfig,
    server::{ConsumerServer, HttpServer},
    utils::logging::{init_tracing, log_startup},
};

/// Every front end built from one configuration, sharing one middleware
/// registry.
pub struct Service {
    pub registry: Arc<MiddlewareRegistry>,
    pub http: Option<HttpServer>,
    pub kafka: Option<ConsumerServer>,
    pub amqp: Option<ConsumerServer>,
}

impl Service {
    /// Builds middleware and servers. Must run inside a tokio runtime.
    pub fn from_config(config: &ServiceConfig) -> errors::Result<Self> {
        let registry = Arc::new(MiddlewareRegistry::from_config(&config.middlewares)?);

        let http = config
            .http
            .clone()
            .map(|http| HttpServer::new(http, registry.clone()))
            .transpose()?;
        let kafka = config
            .kafka
            .clone()
            .map(|kafka| ConsumerServer::kafka(kafka, registry.clone()))
            .transpose()?;
        let amqp = config
            .amqp
            .clone()
            .map(|amqp| ConsumerServer::amqp(amqp, registry.clone()))
            .transpose()?;

        Ok(Self {
            registry,
            http,
            kafka,
            amqp,
        })
    }

    /// Stops front ends first, then the middleware they use.
    pub async fn shutdown(&self) {
        if let Some(http) = &self.http {
            http.stop().await;
        }
        for consumer in [&self.kafka, &self.amqp].into_iter().flatten() {
            consumer.stop().await;
        }
        self.registry.stop_all();
    }
}

/// Starts the service described by the configuration file and runs until
/// Ctrl-C.
///
/// # Arguments
/// * `config_path` - Path to the service YAML configuration file
pub async fn run(config_path: PathBuf) -> Result<()> {
    dotenv().ok();

    let config = ServiceConfig::load(&config_path)?;
    init_tracing(&config.logging.level);
    log_startup("configuration", "loaded", config_path.to_str());

    let service = Service::from_config(&config)?;
    log_startup("middleware", "initialised", Some(service.registry.len().to_string().as_str()));

    if let Some(http) = &service.http {
        http.push_route::<&str>("GET", "/health", health_handler(), &[]).await?;
        http.start().await?;
    }
    for consumer in [&service.kafka, &service.amqp].into_iter().flatten() {
        info!(consumer = %consumer.name(), "Consumer configured; waiting for a delivery source");
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");
    service.shutdown().await;

    Ok(())
}

fn health_handler() -> Handler {
    handler_fn(|mut ctx: Context| async move {
        ctx.response_mut().set_body(r#"{"status":"ok"}"#);
        ctx
    })
}
