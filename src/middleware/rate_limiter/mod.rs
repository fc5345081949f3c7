pub mod rate_limit;

pub use rate_limit::{KeyFn, RateLimitMiddleware, RateLimitSettings};
