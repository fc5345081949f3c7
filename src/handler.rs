//! Handler type shared by the router, the middleware chain and every
//! transport front end.

use std::{future::Future, pin::Pin, sync::Arc};

use crate::context::Context;

/// A boxed future for async handlers and middleware.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A route handler: takes the call context and hands it back once the
/// response has been written.
pub type Handler = Arc<dyn Fn(Context) -> BoxFuture<'static, Context> + Send + Sync>;

/// Wraps an async function or closure into a [`Handler`].
///
/// ```ignore
/// let hello = handler_fn(|mut ctx: Context| async move {
///     ctx.response_mut().set_body("{}");
///     ctx
/// });
/// ```
pub fn handler_fn<F, Fut>(f: F) -> Handler
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Context> + Send + 'static,
{
    Arc::new(move |ctx| -> BoxFuture<'static, Context> { Box::pin(f(ctx)) })
}
