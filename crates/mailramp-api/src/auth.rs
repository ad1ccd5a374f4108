//! Trigger authentication

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use mailramp_core::DispatchCycle;
use mailramp_storage::repository::HealthCheck;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::warn;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub cycle: Arc<DispatchCycle>,
    pub health: Arc<dyn HealthCheck>,
    /// Shared secret for the trigger; `None` leaves it open
    pub trigger_token: Option<String>,
}

/// Body returned when a request is rejected before reaching a handler
#[derive(Debug, Serialize)]
pub struct AuthError {
    pub success: bool,
    pub error: String,
}

/// Extract the trigger token from `Authorization: Bearer` or `X-API-Key`
pub fn extract_token(req: &Request) -> Option<&str> {
    if let Some(auth) = req.headers().get("authorization") {
        if let Ok(auth_str) = auth.to_str() {
            if let Some(token) = auth_str.strip_prefix("Bearer ") {
                return Some(token.trim());
            }
        }
    }

    if let Some(key) = req.headers().get("x-api-key") {
        if let Ok(key_str) = key.to_str() {
            return Some(key_str.trim());
        }
    }

    None
}

fn hash_token(token: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.finalize().to_vec()
}

/// Compare SHA-256 digests rather than the raw secrets
fn tokens_match(given: &str, expected: &str) -> bool {
    hash_token(given) == hash_token(expected)
}

fn unauthorized(message: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(AuthError {
            success: false,
            error: message.to_string(),
        }),
    )
        .into_response()
}

/// Require the configured trigger token, if any
pub async fn trigger_auth_middleware(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected) = state.trigger_token.as_deref() else {
        return next.run(request).await;
    };

    match extract_token(&request) {
        Some(token) if tokens_match(token, expected) => next.run(request).await,
        Some(_) => {
            warn!("Invalid trigger token for {}", request.uri().path());
            unauthorized("invalid trigger token")
        }
        None => {
            warn!("Missing trigger token in request to {}", request.uri().path());
            unauthorized("missing trigger token")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    fn request_with(header: &str, value: &str) -> Request {
        Request::builder()
            .uri("/api/v1/dispatch")
            .header(header, value)
            .body(Body::empty())
            .unwrap()
    }

    #[test]
    fn reads_bearer_and_api_key_headers() {
        let bearer = request_with("authorization", "Bearer s3cret");
        assert_eq!(extract_token(&bearer), Some("s3cret"));

        let api_key = request_with("x-api-key", "s3cret");
        assert_eq!(extract_token(&api_key), Some("s3cret"));

        let basic = request_with("authorization", "Basic dXNlcjpwYXNz");
        assert_eq!(extract_token(&basic), None);
    }

    #[test]
    fn token_comparison_requires_exact_match() {
        assert!(tokens_match("abc123", "abc123"));
        assert!(!tokens_match("abc124", "abc123"));
        assert!(!tokens_match("abc", "abc123"));
        assert!(!tokens_match("", "abc123"));
        assert!(!tokens_match("ABC123", "abc123"));
    }

    #[test]
    fn token_digest_is_sha256() {
        assert_eq!(
            hash_token("s3cret"),
            Sha256::digest(b"s3cret").to_vec()
        );
        assert_eq!(hash_token("s3cret").len(), 32);
        assert_ne!(hash_token("s3cret"), hash_token("s3cret "));
    }
}
