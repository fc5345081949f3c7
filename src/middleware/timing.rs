use tokio::time::Instant;
use tracing::debug;

use crate::{
    constants::values,
    context::Context,
    handler::{handler_fn, Handler},
    middleware::Middleware,
};

/// Measures the wrapped call and stores the elapsed `Duration` under
/// `request_time`.
pub struct TimingMiddleware {
    name: String,
}

impl TimingMiddleware {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Middleware for TimingMiddleware {
    fn name(&self) -> &str {
        &self.name
    }

    fn invoke(&self, next: Handler) -> Handler {
        handler_fn(move |ctx: Context| {
            let next = next.clone();
            async move {
                let start = Instant::now();
                let mut ctx = next(ctx).await;
                let elapsed = start.elapsed();

                debug!(
                    "{} - {:?}, {}: {}",
                    ctx.response().status(),
                    elapsed,
                    ctx.request().method,
                    ctx.request().path
                );
                ctx.set(values::REQUEST_TIME, elapsed);
                ctx
            }
        })
    }
}
