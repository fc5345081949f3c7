use std::sync::Arc;

use http::{
    header::{
        ACCESS_CONTROL_ALLOW_CREDENTIALS, ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
        ACCESS_CONTROL_ALLOW_ORIGIN, ACCESS_CONTROL_EXPOSE_HEADERS, ACCESS_CONTROL_MAX_AGE,
        ACCESS_CONTROL_REQUEST_METHOD, ORIGIN, VARY,
    },
    HeaderValue, Method,
};

use crate::{
    config::CorsConfig,
    constants::cors,
    context::Context,
    errors::{FrameworkError, Result},
    handler::{handler_fn, Handler},
    middleware::Middleware,
};

#[derive(Debug)]
struct CorsPolicy {
    allow_origins: Vec<String>,
    allow_methods: HeaderValue,
    allow_headers: HeaderValue,
    expose_headers: Option<HeaderValue>,
    allow_credentials: bool,
    max_age: HeaderValue,
}

impl CorsPolicy {
    fn allows(&self, origin: &str) -> bool {
        self.allow_origins
            .iter()
            .any(|allowed| allowed == "*" || allowed == origin)
    }
}

/// Adds CORS headers for allowed origins and answers preflight requests
/// with 204 without calling the rest of the chain.
pub struct CorsMiddleware {
    name: String,
    policy: Arc<CorsPolicy>,
}

impl CorsMiddleware {
    pub fn from_config(name: &str, config: &CorsConfig) -> Result<Self> {
        let list_or_default = |values: &[String], default: &[&str]| -> Vec<String> {
            if values.is_empty() {
                default.iter().map(|v| v.to_string()).collect()
            } else {
                values.to_vec()
            }
        };
        let header_value = |field: &str, value: String| {
            HeaderValue::try_from(value).map_err(|e| FrameworkError::InvalidMiddleware {
                name: name.to_string(),
                reason: format!("{}: {}", field, e),
            })
        };

        let allow_origins = list_or_default(&config.allow_origins, &["*"]);
        let allow_methods = list_or_default(&config.allow_methods, &cors::DEFAULT_METHODS).join(", ");
        let allow_headers = list_or_default(&config.allow_headers, &cors::DEFAULT_HEADERS).join(", ");
        let max_age = config
            .max_age
            .filter(|age| *age > 0)
            .unwrap_or(cors::DEFAULT_MAX_AGE_SECONDS);

        let expose_headers = if config.expose_headers.is_empty() {
            None
        } else {
            Some(header_value("expose_headers", config.expose_headers.join(", "))?)
        };

        Ok(Self {
            name: name.to_string(),
            policy: Arc::new(CorsPolicy {
                allow_origins,
                allow_methods: header_value("allow_methods", allow_methods)?,
                allow_headers: header_value("allow_headers", allow_headers)?,
                expose_headers,
                allow_credentials: config.allow_credentials,
                max_age: HeaderValue::from(max_age),
            }),
        })
    }
}

impl Middleware for CorsMiddleware {
    fn name(&self) -> &str {
        &self.name
    }

    fn invoke(&self, next: Handler) -> Handler {
        let policy = self.policy.clone();

        handler_fn(move |mut ctx: Context| {
            let next = next.clone();
            let policy = policy.clone();
            async move {
                // Not a CORS request, or an origin we do not serve
                let origin = ctx
                    .request()
                    .headers
                    .get(ORIGIN)
                    .filter(|origin| origin.to_str().is_ok_and(|o| policy.allows(o)))
                    .cloned();
                let Some(origin) = origin else {
                    return next(ctx).await;
                };
                let preflight = ctx.request().method == Method::OPTIONS.as_str()
                    && ctx.request().headers.contains_key(ACCESS_CONTROL_REQUEST_METHOD);

                let response = ctx.response_mut();
                response.set_header(ACCESS_CONTROL_ALLOW_ORIGIN, origin);
                response.set_header(VARY, HeaderValue::from_static("Origin"));
                if policy.allow_credentials {
                    response.set_header(ACCESS_CONTROL_ALLOW_CREDENTIALS, HeaderValue::from_static("true"));
                }
                if let Some(expose) = &policy.expose_headers {
                    response.set_header(ACCESS_CONTROL_EXPOSE_HEADERS, expose.clone());
                }

                if preflight {
                    response.set_header(ACCESS_CONTROL_ALLOW_METHODS, policy.allow_methods.clone());
                    response.set_header(ACCESS_CONTROL_ALLOW_HEADERS, policy.allow_headers.clone());
                    response.set_header(ACCESS_CONTROL_MAX_AGE, policy.max_age.clone());
                    response.set_status(204);
                    return ctx;
                }

                next(ctx).await
            }
        })
    }
}
