pub mod auth;

pub use auth::JwtMiddleware;
