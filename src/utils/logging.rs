//! Tracing initialisation and structured log helpers.

use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Installs the global fmt subscriber. `RUST_LOG` wins over `level`.
pub fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    // A subscriber may already be installed (tests, embedding binaries)
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

pub fn log_startup(component: &str, status: &str, detail: Option<&str>) {
    match detail {
        Some(detail) => info!(component, status, detail, "Startup"),
        None => info!(component, status, "Startup"),
    }
}

pub fn log_rate_limit_event(key: &str, path: &str, limited: bool, limit: u32) {
    if limited {
        warn!(key = %key, route = %path, limit, "Rate limit exceeded");
    } else {
        debug!(key = %key, route = %path, limit, "Rate limit check passed");
    }
}

pub fn log_route_registered(server: &str, method: &str, path: &str) {
    info!(server, method, route = %path, "Route registered");
}

pub fn log_performance_metric(name: &str, value: f64, unit: &str, context: &str) {
    info!(metric = name, value, unit, context, "Metric");
}
