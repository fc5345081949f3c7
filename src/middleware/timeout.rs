use std::{panic, sync::Arc, time::Duration};

use tracing::warn;

use crate::{
    config::TimeoutConfig,
    constants::timeout as timeout_constants,
    context::Context,
    errors::{FrameworkError, Rejection, Result},
    handler::{handler_fn, Handler},
    middleware::Middleware,
    utils::parse_duration,
};

/// Races the wrapped call against a deadline. On expiry the call is answered
/// with 499 and the handler keeps running detached; its result is dropped.
pub struct TimeoutMiddleware {
    name: String,
    timeout: Duration,
}

impl TimeoutMiddleware {
    pub fn new(name: impl Into<String>, timeout: Duration) -> Self {
        Self {
            name: name.into(),
            timeout,
        }
    }

    pub fn from_config(name: &str, config: &TimeoutConfig) -> Result<Self> {
        let default = Duration::from_millis(timeout_constants::DEFAULT_TIMEOUT_MILLIS);
        let timeout = match &config.timeout {
            Some(raw) => parse_duration(raw).map_err(|e| FrameworkError::InvalidMiddleware {
                name: name.to_string(),
                reason: format!("timeout: '{}': {}", raw, e),
            })?,
            None => default,
        };

        Ok(Self::new(name, if timeout.is_zero() { default } else { timeout }))
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl Middleware for TimeoutMiddleware {
    fn name(&self) -> &str {
        &self.name
    }

    fn invoke(&self, next: Handler) -> Handler {
        let timeout = self.timeout;
        let name: Arc<str> = Arc::from(self.name.as_str());

        handler_fn(move |ctx: Context| {
            let next = next.clone();
            let name = name.clone();
            async move {
                let snapshot = ctx.clone();
                let task = tokio::spawn(next(ctx));

                match tokio::time::timeout(timeout, task).await {
                    Ok(Ok(ctx)) => ctx,
                    // Re-raise so an outer restore middleware sees it
                    Ok(Err(join_error)) if join_error.is_panic() => {
                        panic::resume_unwind(join_error.into_panic())
                    }
                    Ok(Err(_)) | Err(_) => {
                        warn!(
                            middleware = %name,
                            route = %snapshot.request().path,
                            timeout = ?timeout,
                            "Handler deadline exceeded"
                        );
                        let mut ctx = snapshot;
                        Rejection::Timeout.write_to(ctx.response_mut());
                        ctx
                    }
                }
            }
        })
    }
}
