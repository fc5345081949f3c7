use std::{collections::HashMap, fs, path::Path};

use serde::Deserialize;
use tokio::sync::Semaphore;

use crate::{
    constants::server,
    errors::{FrameworkError, Result},
};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ServiceConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub middlewares: HashMap<String, MiddlewareConfig>,
    pub http: Option<HttpConfig>,
    pub kafka: Option<ConsumerConfig>,
    pub amqp: Option<ConsumerConfig>,
}

impl ServiceConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: ServiceConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if let Some(http) = &self.http {
            concurrency_limit(&http.name, "max_in_flight", http.max_in_flight)?;
        }
        for consumer in [&self.kafka, &self.amqp].into_iter().flatten() {
            concurrency_limit(&consumer.name, "limit_message_count", consumer.limit_message_count)?;
        }
        if let Some(amqp) = &self.amqp {
            if amqp.queue.as_deref().is_none_or(str::is_empty) {
                return Err(FrameworkError::Config(format!(
                    "amqp consumer '{}' requires a queue",
                    amqp.name
                )));
            }
        }
        Ok(())
    }
}

/// Checks a front end's in-flight bound and returns it as a permit count.
/// Zero is raised to one; anything a semaphore cannot hold is rejected.
pub fn concurrency_limit(owner: &str, field: &str, value: usize) -> Result<u32> {
    let max = Semaphore::MAX_PERMITS.min(u32::MAX as usize);
    if value > max {
        return Err(FrameworkError::Config(format!(
            "{}: {} must be at most {}, got {}",
            owner, field, max, value
        )));
    }
    Ok(value.max(1) as u32)
}

//------  Logging config ---------

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}

//      ---- Middleware configs

/// One named middleware instance, selected by its `type` field.
#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MiddlewareConfig {
    RateLimit(RateLimitConfig),
    Timing,
    Restore,
    Timeout(TimeoutConfig),
    Cors(CorsConfig),
    Jwt(JwtConfig),
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum KeyStrategy {
    #[default]
    Ip,
    Header,
    Global,
    MethodPath,
    IpMethodPath,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct RateLimitConfig {
    pub requests: Option<u32>,
    pub interval: Option<String>, // 1s, 1m
    pub burst: Option<u32>,
    pub key_strategy: KeyStrategy,
    pub header_name: Option<String>,
    pub cleanup_interval: Option<String>,
    pub evict_after: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct TimeoutConfig {
    pub timeout: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct CorsConfig {
    pub allow_origins: Vec<String>,
    pub allow_methods: Vec<String>,
    pub allow_headers: Vec<String>,
    pub expose_headers: Vec<String>,
    pub allow_credentials: bool,
    pub max_age: Option<u64>,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct JwtConfig {
    /// HS256 shared secret. Falls back to `JWT_SECRET` when unset.
    pub secret: Option<String>,
    /// Path to an RS256 public key (PEM). Takes precedence over `secret`.
    pub public_key_path: Option<String>,
    pub ctx_key: Option<String>,
}

//      ---- Transport configs

#[derive(Debug, Deserialize, Clone)]
pub struct HttpConfig {
    #[serde(default = "default_http_name")]
    pub name: String,
    #[serde(default = "default_http_addr")]
    pub addr: String,
    #[serde(default)]
    pub base_middleware: Vec<String>,
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            name: default_http_name(),
            addr: default_http_addr(),
            base_middleware: Vec::new(),
            max_in_flight: default_max_in_flight(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ConsumerConfig {
    pub name: String,
    /// Queue consumed in AMQP mode; every delivery routes by this name.
    pub queue: Option<String>,
    /// `None` means the default chain (`timing`, when registered).
    pub base_middleware: Option<Vec<String>>,
    #[serde(default = "default_limit_message_count")]
    pub limit_message_count: usize,
}

impl ConsumerConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            queue: None,
            base_middleware: None,
            limit_message_count: default_limit_message_count(),
        }
    }
}

fn default_http_name() -> String {
    "http".to_string()
}

fn default_http_addr() -> String {
    server::DEFAULT_HTTP_ADDR.to_string()
}

fn default_max_in_flight() -> usize {
    server::DEFAULT_MAX_IN_FLIGHT
}

fn default_limit_message_count() -> usize {
    server::DEFAULT_LIMIT_MESSAGE_COUNT
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    const SAMPLE: &str = r#"
logging:
  level: debug
middlewares:
  limiter:
    type: rate_limit
    requests: 2
    interval: 1s
    key_strategy: header
    header_name: X-Api-Key
  timing:
    type: timing
  deadline:
    type: timeout
    timeout: 250ms
http:
  addr: 127.0.0.1:9000
  base_middleware: [timing]
amqp:
  name: orders
  queue: orders.created
"#;

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let config = ServiceConfig::load(file.path()).unwrap();
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.middlewares.len(), 3);

        match &config.middlewares["limiter"] {
            MiddlewareConfig::RateLimit(rl) => {
                assert_eq!(rl.requests, Some(2));
                assert_eq!(rl.key_strategy, KeyStrategy::Header);
                assert_eq!(rl.header_name.as_deref(), Some("X-Api-Key"));
                assert_eq!(rl.burst, None);
            }
            other => panic!("unexpected middleware config: {:?}", other),
        }
        assert!(matches!(config.middlewares["timing"], MiddlewareConfig::Timing));

        let http = config.http.unwrap();
        assert_eq!(http.name, "http");
        assert_eq!(http.base_middleware, vec!["timing".to_string()]);
        assert_eq!(http.max_in_flight, server::DEFAULT_MAX_IN_FLIGHT);

        let amqp = config.amqp.unwrap();
        assert_eq!(amqp.queue.as_deref(), Some("orders.created"));
        assert!(amqp.base_middleware.is_none());
        assert_eq!(amqp.limit_message_count, server::DEFAULT_LIMIT_MESSAGE_COUNT);
        assert!(config.kafka.is_none());
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = ServiceConfig::from_yaml("{}").unwrap();
        assert_eq!(config.logging.level, "info");
        assert!(config.middlewares.is_empty());
        assert!(config.http.is_none());
    }

    #[test]
    fn test_amqp_without_queue_is_rejected() {
        let err = ServiceConfig::from_yaml("amqp:\n  name: orders\n").unwrap_err();
        assert!(matches!(err, FrameworkError::Config(_)));
    }

    #[test]
    fn test_unknown_middleware_type_is_rejected() {
        let err = ServiceConfig::from_yaml("middlewares:\n  x:\n    type: bogus\n").unwrap_err();
        assert!(matches!(err, FrameworkError::Yaml(_)));
    }

    #[test]
    fn test_concurrency_limits_are_bounded() {
        assert_eq!(concurrency_limit("http", "max_in_flight", 0).unwrap(), 1);
        assert_eq!(concurrency_limit("http", "max_in_flight", 64).unwrap(), 64);
        assert!(concurrency_limit("http", "max_in_flight", usize::MAX).is_err());

        let yaml = format!("http:\n  max_in_flight: {}\n", usize::MAX);
        assert!(matches!(ServiceConfig::from_yaml(&yaml), Err(FrameworkError::Config(_))));

        let yaml = format!("kafka:\n  name: events\n  limit_message_count: {}\n", u64::from(u32::MAX) + 1);
        assert!(matches!(ServiceConfig::from_yaml(&yaml), Err(FrameworkError::Config(_))));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = ServiceConfig::load("/definitely/not/here.yaml").unwrap_err();
        assert!(matches!(err, FrameworkError::Io(_)));
    }
}
