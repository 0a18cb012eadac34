//! Admin authentication middleware.

use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Extract bearer token from Authorization header.
/// Per RFC 6750, the "Bearer" scheme is case-insensitive.
fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| {
            if v.len() >= 7 && v[..7].eq_ignore_ascii_case("bearer ") {
                Some(&v[7..])
            } else {
                None
            }
        })
}

/// Hash a token for comparison with the configured digest.
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    let result = hasher.finalize();
    hex::encode(result)
}

/// Compare a presented token against the configured SHA-256 hex digest.
fn token_matches(token: &str, expected_hash: &str) -> bool {
    let presented = hash_token(token);
    let expected = expected_hash.to_ascii_lowercase();
    presented.as_bytes().ct_eq(expected.as_bytes()).into()
}

/// Require the admin bearer token on every request passing through.
pub async fn admin_auth_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(admin) = state.config.admin.as_ref() else {
        return Err(ApiError::Unauthorized("admin API is disabled".to_string()));
    };

    match extract_bearer_token(req.headers()) {
        Some(token) if token_matches(token, &admin.token_hash) => Ok(next.run(req).await),
        Some(_) => {
            tracing::warn!("admin request with invalid token");
            Err(ApiError::Unauthorized("invalid token".to_string()))
        }
        None => Err(ApiError::Unauthorized(
            "authentication required".to_string(),
        )),
    }
}
