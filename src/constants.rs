// Application-wide constants

/// Rate limiter defaults
pub mod rate_limiter {
    pub const DEFAULT_REQUESTS: u32 = 60;
    pub const DEFAULT_INTERVAL_SECONDS: u64 = 60; // 1 minute
    pub const DEFAULT_CLEANUP_INTERVAL_SECONDS: u64 = 60; // 1 minute
    pub const DEFAULT_EVICT_AFTER_SECONDS: u64 = 900; // 15 minutes
    pub const UNKNOWN_SOURCE: &str = "unknown";
    pub const GLOBAL_KEY: &str = "global";
}

/// Rate limit response metadata
pub mod headers {
    pub const RATE_LIMIT_LIMIT: &str = "x-ratelimit-limit";
    pub const RATE_LIMIT_REMAINING: &str = "x-ratelimit-remaining";
    pub const RATE_LIMIT_RESET: &str = "x-ratelimit-reset";
    pub const REQUEST_ID: &str = "x-request-id";
}

/// Timeout middleware defaults
pub mod timeout {
    pub const DEFAULT_TIMEOUT_MILLIS: u64 = 1000;
    /// Client closed request / deadline exceeded
    pub const STATUS: u16 = 499;
}

/// CORS middleware defaults
pub mod cors {
    pub const DEFAULT_MAX_AGE_SECONDS: u64 = 86_400; // 24 hours
    pub const DEFAULT_METHODS: [&str; 6] = ["GET", "POST", "PUT", "PATCH", "DELETE", "OPTIONS"];
    pub const DEFAULT_HEADERS: [&str; 4] = ["Origin", "Content-Type", "Accept", "Authorization"];
}

/// JWT middleware defaults
pub mod jwt {
    pub const DEFAULT_CTX_KEY: &str = "claims";
    pub const SECRET_ENV: &str = "JWT_SECRET";
}

/// Keys written into the per-call user value bag
pub mod values {
    pub const REQUEST_TIME: &str = "request_time";
}

/// Transport front end defaults
pub mod server {
    pub const DEFAULT_HTTP_ADDR: &str = "0.0.0.0:8080";
    pub const DEFAULT_MAX_IN_FLIGHT: usize = 1024;
    pub const DEFAULT_LIMIT_MESSAGE_COUNT: usize = 64;
    pub const DEFAULT_CONTENT_TYPE: &str = "application/json; charset=utf-8";
    pub const KAFKA_METHOD: &str = "KAFKA";
    pub const AMQP_METHOD: &str = "AMQP";
}

/// Time conversion helpers
pub mod time {
    pub const SECONDS_PER_MINUTE: u64 = 60;
    pub const SECONDS_PER_HOUR: u64 = 3600;
}
