pub mod state;

pub use state::{Decision, InMemoryRateLimitState, RateLimitState};
