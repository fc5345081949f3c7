use std::{fs, sync::Arc};

use tracing::{debug, warn};

use crate::{
    config::JwtConfig,
    constants::jwt,
    context::Context,
    errors::{FrameworkError, Rejection, Result},
    features::auth::{extract_bearer_token, JwtVerifier},
    handler::{handler_fn, Handler},
    middleware::Middleware,
};

/// Bearer token authentication. Verified claims are stored as a
/// `serde_json::Value` under `ctx_key`; any failure answers 401.
pub struct JwtMiddleware {
    name: String,
    verifier: Arc<JwtVerifier>,
    ctx_key: Arc<str>,
}

impl JwtMiddleware {
    pub fn new(name: impl Into<String>, verifier: JwtVerifier, ctx_key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            verifier: Arc::new(verifier),
            ctx_key: Arc::from(ctx_key.into()),
        }
    }

    /// RS256 when `public_key_path` is set, otherwise HS256 with the
    /// configured secret or `JWT_SECRET`.
    pub fn from_config(name: &str, config: &JwtConfig) -> Result<Self> {
        let invalid = |reason: String| FrameworkError::InvalidMiddleware {
            name: name.to_string(),
            reason,
        };

        let verifier = match &config.public_key_path {
            Some(path) => {
                let pem = fs::read(path)
                    .map_err(|e| invalid(format!("could not read public key '{}': {}", path, e)))?;
                JwtVerifier::rs256_pem(&pem)
                    .map_err(|e| invalid(format!("could not parse public key: {}", e)))?
            }
            None => {
                let secret = config
                    .secret
                    .clone()
                    .or_else(|| dotenvy::var(jwt::SECRET_ENV).ok())
                    .filter(|secret| !secret.is_empty())
                    .ok_or_else(|| {
                        invalid(format!("either secret, public_key_path or {} must be set", jwt::SECRET_ENV))
                    })?;
                JwtVerifier::hs256(secret.as_bytes())
            }
        };
        debug!(middleware = %name, algorithm = ?verifier.algorithm(), "JWT verifier ready");

        let ctx_key = config
            .ctx_key
            .clone()
            .unwrap_or_else(|| jwt::DEFAULT_CTX_KEY.to_string());
        Ok(Self::new(name, verifier, ctx_key))
    }
}

impl Middleware for JwtMiddleware {
    fn name(&self) -> &str {
        &self.name
    }

    fn invoke(&self, next: Handler) -> Handler {
        let verifier = self.verifier.clone();
        let ctx_key = self.ctx_key.clone();

        handler_fn(move |mut ctx: Context| {
            let next = next.clone();
            let verifier = verifier.clone();
            let ctx_key = ctx_key.clone();
            async move {
                let claims = extract_bearer_token(&ctx.request().headers)
                    .and_then(|token| verifier.verify(token));

                match claims {
                    Ok(claims) => {
                        ctx.set(ctx_key.as_ref(), claims);
                        next(ctx).await
                    }
                    Err(reason) => {
                        warn!(route = %ctx.request().path, reason = %reason, "Authentication failed");
                        Rejection::Unauthorized(reason.to_string()).write_to(ctx.response_mut());
                        ctx
                    }
                }
            }
        })
    }
}
