use std::time::Duration;

use axum::http::{HeaderMap, header};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};

use boutique_types::api::Claims;
use boutique_types::models::UserId;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("no token presented")]
    MissingToken,

    #[error("invalid token: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),

    #[error("client did not identify within {0:?}")]
    IdentifyTimeout(Duration),

    #[error("connection closed before identifying")]
    Disconnected,
}

/// Validates HS256 session tokens issued by the storefront.
#[derive(Clone)]
pub struct TokenVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::default(),
        }
    }

    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        let data = decode::<Claims>(token, &self.key, &self.validation)?;
        Ok(data.claims)
    }
}

/// Token from `Authorization: Bearer ...`, if any.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

/// Sign a session token. The storefront owns login; this exists for
/// operator tooling and tests.
pub fn issue_token(
    secret: &str,
    user_id: UserId,
    username: &str,
    ttl: chrono::Duration,
) -> Result<String, AuthError> {
    sign(secret, user_id, username, ttl, false)
}

/// Like [`issue_token`], but the bearer may publish to any recipient.
pub fn issue_producer_token(
    secret: &str,
    user_id: UserId,
    username: &str,
    ttl: chrono::Duration,
) -> Result<String, AuthError> {
    sign(secret, user_id, username, ttl, true)
}

fn sign(
    secret: &str,
    user_id: UserId,
    username: &str,
    ttl: chrono::Duration,
    producer: bool,
) -> Result<String, AuthError> {
    let claims = Claims {
        sub: user_id,
        username: username.to_string(),
        exp: (chrono::Utc::now() + ttl).timestamp() as usize,
        producer,
    };

    Ok(encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn issued_token_verifies() {
        let token = issue_token("s3cret", 4, "testuser", chrono::Duration::hours(1)).unwrap();
        let claims = TokenVerifier::new("s3cret").verify(&token).unwrap();
        assert_eq!(claims.sub, 4);
        assert_eq!(claims.username, "testuser");
        assert!(!claims.producer);

        let token = issue_producer_token("s3cret", 1, "orders", chrono::Duration::hours(1)).unwrap();
        assert!(TokenVerifier::new("s3cret").verify(&token).unwrap().producer);
    }

    #[test]
    fn wrong_secret_and_expired_tokens_fail() {
        let token = issue_token("s3cret", 4, "testuser", chrono::Duration::hours(1)).unwrap();
        assert!(matches!(
            TokenVerifier::new("other").verify(&token),
            Err(AuthError::InvalidToken(_))
        ));

        let stale = issue_token("s3cret", 4, "testuser", chrono::Duration::hours(-2)).unwrap();
        assert!(TokenVerifier::new("s3cret").verify(&stale).is_err());
    }

    #[test]
    fn bearer_header_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc.def"));
        assert_eq!(bearer_token(&headers), Some("abc.def"));
    }
}
