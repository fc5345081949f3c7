use std::fmt;

use crate::{constants::timeout, context::Response};

/// Errors surfaced synchronously while wiring routes, middleware and servers.
///
/// Per-request failures never use this type; they are written into the
/// response through [`Rejection`].
#[derive(Debug, thiserror::Error)]
pub enum FrameworkError {
    #[error("middleware not found: {0}")]
    MiddlewareNotFound(String),

    #[error("invalid middleware config for '{name}': {reason}")]
    InvalidMiddleware { name: String, reason: String },

    #[error("invalid route: {0}")]
    InvalidRoute(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("server error: {0}")]
    Server(String),
}

pub type Result<T> = std::result::Result<T, FrameworkError>;

/// Deliberate short-circuits produced inside the middleware pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum Rejection {
    RateLimited,
    Unauthorized(String),
    Timeout,
    Internal,
    RouteNotFound,
    Unavailable,
}

impl Rejection {
    pub fn status(&self) -> u16 {
        match self {
            Rejection::RateLimited => 429,
            Rejection::Unauthorized(_) => 401,
            Rejection::Timeout => timeout::STATUS,
            Rejection::Internal => 500,
            Rejection::RouteNotFound => 404,
            Rejection::Unavailable => 503,
        }
    }

    fn body(&self) -> Option<String> {
        match self {
            Rejection::RateLimited => Some("Too many requests".to_string()),
            Rejection::Unauthorized(reason) => Some(reason.clone()),
            Rejection::Internal => Some("unknown server error".to_string()),
            Rejection::Unavailable => Some("Service Unavailable".to_string()),
            // Timeout and not-found keep whatever body is already present
            Rejection::Timeout | Rejection::RouteNotFound => None,
        }
    }

    /// Writes the status (and body, where the rejection has one) into `response`.
    pub fn write_to(&self, response: &mut Response) {
        response.set_status(self.status());
        if let Some(body) = self.body() {
            response.set_body(body);
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::RateLimited => write!(f, "Rate limited"),
            Rejection::Unauthorized(reason) => write!(f, "Unauthorized: {}", reason),
            Rejection::Timeout => write!(f, "Timed out"),
            Rejection::Internal => write!(f, "Internal server error"),
            Rejection::RouteNotFound => write!(f, "Route not found"),
            Rejection::Unavailable => write!(f, "Service unavailable"),
        }
    }
}
