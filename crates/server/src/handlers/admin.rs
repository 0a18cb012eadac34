//! Administrative endpoints.

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use serde::Serialize;
use std::net::IpAddr;
use std::time::Instant;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// GET /health - Health check.
///
/// This endpoint is unauthenticated and not admission-controlled so that
/// load balancers and liveness checks never consume a client's budget.
/// Returns only non-sensitive information (status and version).
pub async fn health_check(State(state): State<AppState>) -> ApiResult<Json<HealthResponse>> {
    // Check the repository root is reachable
    state.repository.health_check().await?;

    Ok(Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    }))
}

/// A blocked client as reported by the admin API.
#[derive(Debug, Serialize)]
pub struct BlockedClientResponse {
    pub client: String,
    pub retry_after_ms: u64,
}

/// Blocked clients listing.
#[derive(Debug, Serialize)]
pub struct BlockedClientsResponse {
    pub clients: Vec<BlockedClientResponse>,
}

fn millis(d: std::time::Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Client keys are IP addresses in canonical form, or `unknown` for
/// requests without a peer address.
fn parse_client(client: &str) -> ApiResult<String> {
    if client == "unknown" {
        return Ok(client.to_string());
    }
    client
        .parse::<IpAddr>()
        .map(|ip| ip.to_string())
        .map_err(|_| ApiError::BadRequest(format!("invalid client address: {client}")))
}

/// GET /admin/clients/blocked - List currently blocked clients.
pub async fn list_blocked_clients(
    State(state): State<AppState>,
) -> ApiResult<Json<BlockedClientsResponse>> {
    let clients = state
        .clients
        .blocked_at(Instant::now())
        .into_iter()
        .map(|b| BlockedClientResponse {
            client: b.client,
            retry_after_ms: millis(b.remaining),
        })
        .collect();

    Ok(Json(BlockedClientsResponse { clients }))
}

/// PUT /admin/clients/{client}/block - Block a client for the configured
/// block duration.
pub async fn block_client(
    State(state): State<AppState>,
    Path(client): Path<String>,
) -> ApiResult<Json<BlockedClientResponse>> {
    let client = parse_client(&client)?;
    let now = Instant::now();
    let until = state
        .admission
        .block_at(&client, now)
        .map_err(|_| ApiError::AtCapacity {
            retry_after: state.cleanup_interval(),
        })?;

    Ok(Json(BlockedClientResponse {
        client,
        retry_after_ms: millis(until.saturating_duration_since(now)),
    }))
}

/// DELETE /admin/clients/{client}/block - Lift a block.
pub async fn unblock_client(
    State(state): State<AppState>,
    Path(client): Path<String>,
) -> ApiResult<StatusCode> {
    let client = parse_client(&client)?;
    if state.admission.unblock_at(&client, Instant::now()) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("client is not blocked: {client}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_client_canonicalizes() {
        assert_eq!(parse_client("10.0.0.1").unwrap(), "10.0.0.1");
        assert_eq!(parse_client("0:0:0:0:0:0:0:1").unwrap(), "::1");
        assert_eq!(parse_client("unknown").unwrap(), "unknown");
        assert!(matches!(
            parse_client("example.com"),
            Err(ApiError::BadRequest(_))
        ));
    }
}
