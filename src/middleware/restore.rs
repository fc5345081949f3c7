use std::{any::Any, panic::AssertUnwindSafe};

use futures::FutureExt;
use tracing::error;

use crate::{
    context::Context,
    errors::Rejection,
    handler::{handler_fn, Handler},
    middleware::Middleware,
};

/// Turns a panic anywhere below it into a 500 reply. Place it outermost in
/// the base chain so one failing call cannot take the worker down.
pub struct RestoreMiddleware {
    name: String,
}

impl RestoreMiddleware {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Middleware for RestoreMiddleware {
    fn name(&self) -> &str {
        &self.name
    }

    fn invoke(&self, next: Handler) -> Handler {
        handler_fn(move |ctx: Context| {
            let next = next.clone();
            async move {
                let snapshot = ctx.clone();
                match AssertUnwindSafe(async move { next(ctx).await })
                    .catch_unwind()
                    .await
                {
                    Ok(ctx) => ctx,
                    Err(panic) => {
                        let mut ctx = snapshot;
                        error!(
                            method = %ctx.request().method,
                            route = %ctx.request().path,
                            error = %panic_message(&*panic),
                            "Recovered from panic in handler"
                        );
                        Rejection::Internal.write_to(ctx.response_mut());
                        ctx
                    }
                }
            }
        })
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
