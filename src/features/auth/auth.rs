use http::HeaderMap;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde_json::Value;
use tracing::debug;

/// Why a bearer token was refused. The display text is the 401 body.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AuthError {
    #[error("Authorization header is missing")]
    MissingHeader,
    #[error("Invalid Authorization header format")]
    InvalidHeader,
    #[error("Invalid or expired token")]
    InvalidToken,
}

/// Returns the token of an `Authorization: Bearer <token>` header. The scheme
/// is matched case-insensitively.
pub fn extract_bearer_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    let auth_header = headers
        .get(http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .ok_or(AuthError::MissingHeader)?;

    let mut parts = auth_header.split(' ');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(scheme), Some(token), None)
            if scheme.eq_ignore_ascii_case("bearer") && !token.is_empty() =>
        {
            Ok(token)
        }
        _ => Err(AuthError::InvalidHeader),
    }
}

/// Verifies signed tokens against one key and algorithm.
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn hs256(secret: &[u8]) -> Self {
        Self::with_key(DecodingKey::from_secret(secret), Algorithm::HS256)
    }

    pub fn rs256_pem(pem: &[u8]) -> Result<Self, jsonwebtoken::errors::Error> {
        Ok(Self::with_key(DecodingKey::from_rsa_pem(pem)?, Algorithm::RS256))
    }

    fn with_key(key: DecodingKey, algorithm: Algorithm) -> Self {
        let mut validation = Validation::new(algorithm);
        // `exp` is still checked whenever the token carries it
        validation.required_spec_claims.clear();
        Self { key, validation }
    }

    pub fn algorithm(&self) -> Algorithm {
        self.validation.algorithms[0]
    }

    /// Checks signature and time claims, returning the claim set.
    pub fn verify(&self, token: &str) -> Result<Value, AuthError> {
        decode::<Value>(token, &self.key, &self.validation)
            .map(|data| data.claims)
            .map_err(|error| {
                debug!(token = "***", error = %error, "JWT rejected");
                AuthError::InvalidToken
            })
    }
}
