use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use chrono::Utc;
use http::header::RETRY_AFTER;
use tokio::task::AbortHandle;
use tracing::warn;

use crate::{
    config::{KeyStrategy, RateLimitConfig},
    constants::{headers, rate_limiter as rl_constants},
    context::Context,
    errors::{FrameworkError, Rejection, Result},
    features::rate_limiter::{Decision, InMemoryRateLimitState, RateLimitState},
    handler::{handler_fn, Handler},
    middleware::Middleware,
    utils::{
        logging::{log_performance_metric, log_rate_limit_event},
        parse_duration,
    },
};

/// Builds the bucket key for a call and the bucket capacity to use for it.
/// A capacity of 0 lets the call through without touching any bucket.
pub type KeyFn = Arc<dyn Fn(&Context) -> (String, u32) + Send + Sync>;

#[derive(Debug, Clone)]
pub struct RateLimitSettings {
    pub requests: u32,
    pub interval: Duration,
    pub burst: u32,
    pub key_strategy: KeyStrategy,
    pub header_name: Option<String>,
    pub cleanup_interval: Duration,
    pub evict_after: Duration,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            requests: rl_constants::DEFAULT_REQUESTS,
            interval: Duration::from_secs(rl_constants::DEFAULT_INTERVAL_SECONDS),
            burst: rl_constants::DEFAULT_REQUESTS,
            key_strategy: KeyStrategy::default(),
            header_name: None,
            cleanup_interval: Duration::from_secs(rl_constants::DEFAULT_CLEANUP_INTERVAL_SECONDS),
            evict_after: Duration::from_secs(rl_constants::DEFAULT_EVICT_AFTER_SECONDS),
        }
    }
}

impl RateLimitSettings {
    /// `requests` per `interval`, burst equal to `requests`.
    pub fn new(requests: u32, interval: Duration) -> Self {
        Self {
            requests,
            interval,
            burst: requests.max(1),
            ..Self::default()
        }
    }

    /// A burst of 0 falls back to `requests`, as in configuration. Only a
    /// custom [`KeyFn`] can bypass the limiter for a call.
    pub fn with_burst(mut self, burst: u32) -> Self {
        self.burst = if burst == 0 { self.requests.max(1) } else { burst };
        self
    }

    pub fn with_key_strategy(mut self, key_strategy: KeyStrategy) -> Self {
        self.key_strategy = key_strategy;
        self
    }

    pub fn with_header_name(mut self, header_name: impl Into<String>) -> Self {
        self.header_name = Some(header_name.into());
        self
    }

    pub fn with_cleanup_interval(mut self, cleanup_interval: Duration) -> Self {
        self.cleanup_interval = cleanup_interval;
        self
    }

    pub fn with_evict_after(mut self, evict_after: Duration) -> Self {
        self.evict_after = evict_after;
        self
    }

    pub fn from_config(name: &str, config: &RateLimitConfig) -> Result<Self> {
        let invalid = |reason: String| FrameworkError::InvalidMiddleware {
            name: name.to_string(),
            reason,
        };
        let duration_or = |value: &Option<String>, field: &str, default: Duration| {
            match value {
                Some(raw) => parse_duration(raw)
                    .map_err(|e| invalid(format!("{}: '{}': {}", field, raw, e))),
                None => Ok(default),
            }
        };

        let defaults = Self::default();
        let requests = config.requests.unwrap_or(defaults.requests);
        let interval = duration_or(&config.interval, "interval", defaults.interval)?;
        let cleanup_interval =
            duration_or(&config.cleanup_interval, "cleanup_interval", defaults.cleanup_interval)?;
        let evict_after = duration_or(&config.evict_after, "evict_after", defaults.evict_after)?;

        if config.key_strategy == KeyStrategy::Header
            && config.header_name.as_deref().is_none_or(str::is_empty)
        {
            return Err(invalid("key_strategy 'header' requires header_name".to_string()));
        }

        Ok(Self {
            requests,
            interval,
            burst: config
                .burst
                .filter(|burst| *burst > 0)
                .unwrap_or(requests.max(1)),
            key_strategy: config.key_strategy,
            header_name: config.header_name.clone(),
            cleanup_interval: if cleanup_interval.is_zero() {
                defaults.cleanup_interval
            } else {
                cleanup_interval
            },
            evict_after: if evict_after.is_zero() {
                defaults.evict_after
            } else {
                evict_after
            },
        })
    }

    /// Tokens per second. Zero when the configuration cannot produce tokens.
    pub fn refill_rate(&self) -> f64 {
        if self.interval.is_zero() {
            return 0.0;
        }
        f64::from(self.requests) / self.interval.as_secs_f64()
    }

    pub fn is_degenerate(&self) -> bool {
        self.refill_rate() <= 0.0
    }

    /// Key and capacity produced by the configured strategy.
    pub fn key_for(&self, ctx: &Context) -> (String, u32) {
        let req = ctx.request();
        let source = req
            .remote_addr
            .as_deref()
            .unwrap_or(rl_constants::UNKNOWN_SOURCE);

        let key = match self.key_strategy {
            KeyStrategy::Global => rl_constants::GLOBAL_KEY.to_string(),
            KeyStrategy::Header => {
                let value = self
                    .header_name
                    .as_deref()
                    .and_then(|name| req.header(name))
                    .filter(|value| !value.is_empty())
                    .unwrap_or(rl_constants::UNKNOWN_SOURCE);
                format!("header:{}", value)
            }
            KeyStrategy::MethodPath => format!("{} {}", req.method, req.path),
            KeyStrategy::IpMethodPath => format!("{} {} {}", source, req.method, req.path),
            KeyStrategy::Ip => source.to_string(),
        };
        (key, self.burst)
    }
}

/// Token-bucket rate limiting keyed per caller, header, route or globally.
pub struct RateLimitMiddleware {
    name: String,
    settings: Arc<RateLimitSettings>,
    state: Arc<dyn RateLimitState>,
    key_fn: KeyFn,
    sweeper: Mutex<Option<AbortHandle>>,
}

impl RateLimitMiddleware {
    pub fn new(name: impl Into<String>, settings: RateLimitSettings) -> Self {
        let settings = Arc::new(settings);
        let key_settings = settings.clone();
        Self {
            name: name.into(),
            settings,
            state: Arc::new(InMemoryRateLimitState::new()),
            key_fn: Arc::new(move |ctx: &Context| key_settings.key_for(ctx)),
            sweeper: Mutex::new(None),
        }
    }

    pub fn from_config(name: &str, config: &RateLimitConfig) -> Result<Self> {
        Ok(Self::new(name, RateLimitSettings::from_config(name, config)?))
    }

    /// Replaces the bucket store.
    pub fn with_state(mut self, state: Arc<dyn RateLimitState>) -> Self {
        self.state = state;
        self
    }

    /// Replaces the key strategy with a custom function.
    pub fn with_key_fn<F>(mut self, key_fn: F) -> Self
    where
        F: Fn(&Context) -> (String, u32) + Send + Sync + 'static,
    {
        self.key_fn = Arc::new(key_fn);
        self
    }

    pub fn settings(&self) -> &RateLimitSettings {
        &self.settings
    }

    pub fn active_buckets(&self) -> usize {
        self.state.active_buckets()
    }

    /// Runs one eviction pass now.
    pub async fn sweep(&self) -> usize {
        self.state.evict_idle(self.settings.evict_after).await
    }

    /// Spawns the periodic idle-bucket sweep. Calling it again restarts it.
    pub fn start_sweeper(&self) {
        let state = self.state.clone();
        let period = self.settings.cleanup_interval;
        let evict_after = self.settings.evict_after;
        let name = self.name.clone();

        if period.is_zero() {
            warn!(middleware = %name, "Cleanup interval is zero, idle buckets will not be swept");
            return;
        }

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await; // first tick completes immediately
            loop {
                interval.tick().await;
                state.evict_idle(evict_after).await;
                log_performance_metric("rate_limit_buckets", state.active_buckets() as f64, "count", &name);
            }
        });

        let previous = self
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(task.abort_handle());
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    fn stop_sweeper(&self) {
        if let Some(handle) = self
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }
}

impl Middleware for RateLimitMiddleware {
    fn name(&self) -> &str {
        &self.name
    }

    fn invoke(&self, next: Handler) -> Handler {
        let settings = self.settings.clone();
        let state = self.state.clone();
        let key_fn = self.key_fn.clone();

        handler_fn(move |mut ctx: Context| {
            let next = next.clone();
            let settings = settings.clone();
            let state = state.clone();
            let key_fn = key_fn.clone();

            async move {
                let (key, burst) = key_fn(&ctx);
                if burst == 0 {
                    return next(ctx).await;
                }

                let limit = settings.requests.to_string();

                if settings.is_degenerate() {
                    let response = ctx.response_mut();
                    response.set_header_str(headers::RATE_LIMIT_LIMIT, &limit);
                    response.set_header_str(headers::RATE_LIMIT_REMAINING, "0");
                    response.set_header_str(RETRY_AFTER.as_str(), "1");
                    Rejection::RateLimited.write_to(response);
                    log_rate_limit_event(&key, &ctx.request().path, true, settings.requests);
                    return ctx;
                }

                match state.acquire(&key, burst, settings.refill_rate()).await {
                    Decision::Admitted { remaining } => {
                        let response = ctx.response_mut();
                        response.set_header_str(headers::RATE_LIMIT_LIMIT, &limit);
                        response.set_header_str(headers::RATE_LIMIT_REMAINING, &remaining.to_string());
                        next(ctx).await
                    }
                    Decision::Rejected { retry_after } => {
                        let retry_secs = retry_after.as_secs_f64().ceil().max(1.0) as i64;
                        let reset_at = Utc::now().timestamp() + retry_secs;

                        let response = ctx.response_mut();
                        response.set_header_str(headers::RATE_LIMIT_LIMIT, &limit);
                        response.set_header_str(headers::RATE_LIMIT_REMAINING, "0");
                        response.set_header_str(RETRY_AFTER.as_str(), &retry_secs.to_string());
                        response.set_header_str(headers::RATE_LIMIT_RESET, &reset_at.to_string());
                        Rejection::RateLimited.write_to(response);

                        log_rate_limit_event(&key, &ctx.request().path, true, settings.requests);
                        ctx
                    }
                }
            }
        })
    }

    fn stop(&self) {
        self.stop_sweeper();
    }
}

impl Drop for RateLimitMiddleware {
    fn drop(&mut self) {
        self.stop_sweeper();
    }
}
