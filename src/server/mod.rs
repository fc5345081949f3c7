//! Transport front ends.
//!
//! Each front end adapts its native unit of work into a [`Context`], finds
//! the route, runs the composed handler and maps the response back.

pub mod consumer;
pub mod http;

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::debug;

use crate::{context::Context, errors::Rejection, router::RouteMatch};

pub use consumer::{ChannelSource, ConsumerMode, ConsumerServer, Delivery, DeliverySource, Reply};
pub use http::HttpServer;

/// Units handled by a front end, and how many of them ended with a status
/// of 400 or above.
#[derive(Debug, Default)]
pub struct ServerStats {
    handled: AtomicU64,
    failed: AtomicU64,
}

impl ServerStats {
    pub fn record(&self, status: u16) {
        self.handled.fetch_add(1, Ordering::Relaxed);
        if status >= 400 {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn handled(&self) -> u64 {
        self.handled.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

/// Runs the matched route with its params bound, or answers 404.
pub(crate) async fn dispatch(route: Option<RouteMatch>, mut ctx: Context) -> Context {
    match route {
        Some(RouteMatch { handler, params }) => {
            ctx.set_params(params);
            handler(ctx).await
        }
        None => {
            debug!(
                method = %ctx.request().method,
                route = %ctx.request().path,
                "No route matched"
            );
            Rejection::RouteNotFound.write_to(ctx.response_mut());
            ctx
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_count_failures() {
        let stats = ServerStats::default();
        stats.record(200);
        stats.record(204);
        stats.record(404);
        stats.record(500);
        assert_eq!(stats.handled(), 4);
        assert_eq!(stats.failed(), 2);
    }
}
