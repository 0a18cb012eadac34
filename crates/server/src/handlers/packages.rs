//! Package metadata, download and catalog endpoints.
//!
//! Every handler here is admission-controlled. Identifiers are validated
//! before admission so malformed requests never consume a client's budget,
//! and admission runs before any repository work.

use crate::admission::{Admission, RejectReason};
use crate::clients::ClientKey;
use crate::downloads::{DownloadPermit, GuardRejection};
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use crate::throttle::{BodyChunk, Pacer, TransferError, TransferOutcome, stream_artifact};
use axum::Json;
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::Instrument;
use tulpar_core::{Arch, PackageIdentity, PackageList, PackageListing, PackageName, Version};
use tulpar_storage::ArtifactReader;

/// Commands accepted under `/packages/{name}/{command}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageCommand {
    Info,
    Download,
}

impl FromStr for PackageCommand {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("info") {
            Ok(Self::Info)
        } else if s.eq_ignore_ascii_case("download") {
            Ok(Self::Download)
        } else {
            Err(ApiError::UnknownCommand(s.chars().take(64).collect()))
        }
    }
}

impl fmt::Display for PackageCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Info => "info",
            Self::Download => "download",
        })
    }
}

/// Query parameters of the download command.
#[derive(Debug, Default, Deserialize)]
pub struct DownloadQuery {
    pub arch: Option<String>,
    pub version: Option<String>,
}

/// Run admission control for `client`.
fn admit(state: &AppState, client: &ClientKey) -> ApiResult<()> {
    match state.admission.check_and_record(client.as_str()) {
        Admission::Admit => Ok(()),
        Admission::Reject {
            retry_after,
            reason: RejectReason::RateLimited,
        } => Err(ApiError::RateLimited { retry_after }),
        Admission::Reject {
            retry_after,
            reason: RejectReason::AtCapacity,
        } => Err(ApiError::AtCapacity { retry_after }),
    }
}

fn required_param(value: Option<String>, name: &str) -> ApiResult<String> {
    match value {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(ApiError::BadRequest(format!(
            "missing required query parameter: {name}"
        ))),
    }
}

/// GET /packages - List all packages.
pub async fn list_packages(
    State(state): State<AppState>,
    client: ClientKey,
) -> ApiResult<Json<PackageList>> {
    admit(&state, &client)?;
    let packages = state.repository.list_packages().await?;
    Ok(Json(PackageList {
        packages: packages.into_iter().map(|p| p.to_string()).collect(),
    }))
}

/// GET /packages/{name} - List versions of a package per architecture.
pub async fn get_package(
    State(state): State<AppState>,
    client: ClientKey,
    Path(name): Path<String>,
) -> ApiResult<Json<PackageListing>> {
    let name = PackageName::new(name)?;
    admit(&state, &client)?;
    Ok(Json(state.repository.list_versions(&name).await?))
}

/// GET /packages/{name}/{command} - Dispatch a package command.
pub async fn package_command(
    State(state): State<AppState>,
    client: ClientKey,
    Path((name, command)): Path<(String, String)>,
    Query(query): Query<DownloadQuery>,
) -> ApiResult<Response> {
    let name = PackageName::new(name)?;
    match command.parse::<PackageCommand>()? {
        PackageCommand::Info => get_info(&state, &client, name).await,
        PackageCommand::Download => download(&state, &client, name, query).await,
    }
}

async fn get_info(state: &AppState, client: &ClientKey, name: PackageName) -> ApiResult<Response> {
    admit(state, client)?;
    let document = state.repository.resolve_metadata(&name).await?;
    Ok((
        StatusCode::OK,
        [(CONTENT_TYPE, "application/json")],
        Body::from(document.content),
    )
        .into_response())
}

async fn download(
    state: &AppState,
    client: &ClientKey,
    name: PackageName,
    query: DownloadQuery,
) -> ApiResult<Response> {
    let arch = Arch::new(required_param(query.arch, "arch")?)?;
    let version = Version::new(required_param(query.version, "version")?)?;
    let identity = PackageIdentity::new(name, arch, version);

    admit(state, client)?;

    let permit = state
        .downloads
        .try_acquire(client.as_str())
        .map_err(|rejection| {
            crate::metrics::REQUESTS_REJECTED
                .with_label_values(&[match rejection {
                    GuardRejection::ConcurrencyLimited => "download_limit",
                    GuardRejection::AtCapacity => "at_capacity",
                }])
                .inc();
            match rejection {
                GuardRejection::ConcurrencyLimited => ApiError::DownloadLimit,
                GuardRejection::AtCapacity => ApiError::AtCapacity {
                    retry_after: state.cleanup_interval(),
                },
            }
        })?;

    // The permit is dropped, and the slot released, if resolution fails.
    let artifact = state.repository.resolve_artifact(&identity).await?;
    let reader = state.repository.open_artifact(&artifact).await?;

    let file_name = identity.download_file_name(&state.config.repository.artifact_extension);
    let pacer = Pacer::new(state.limits.max_download_speed, state.limits.buffer_size);
    let (tx, rx) = mpsc::channel::<BodyChunk>(1);

    let span = tracing::info_span!("download", artifact = %identity, client = %client);
    tokio::spawn(run_transfer(reader, tx, pacer, permit).instrument(span));

    let body = futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|chunk| (chunk, rx))
    });

    Ok((
        StatusCode::OK,
        [
            (CONTENT_TYPE, "application/octet-stream".to_string()),
            (CONTENT_LENGTH, artifact.size_bytes.to_string()),
            (
                CONTENT_DISPOSITION,
                format!("attachment; filename=\"{file_name}\""),
            ),
        ],
        Body::from_stream(body),
    )
        .into_response())
}

/// Stream an artifact into the response channel, then release the permit.
async fn run_transfer(
    reader: ArtifactReader,
    mut tx: mpsc::Sender<BodyChunk>,
    pacer: Pacer,
    permit: DownloadPermit,
) {
    let started = Instant::now();
    match stream_artifact(reader, &mut tx, &pacer).await {
        Ok(TransferOutcome::Completed { bytes_sent }) => {
            tracing::info!(bytes_sent = bytes_sent, "download completed");
            crate::metrics::record_download("completed", bytes_sent, started.elapsed());
        }
        Ok(TransferOutcome::Aborted { bytes_sent }) => {
            tracing::debug!(bytes_sent = bytes_sent, "download aborted by client");
            crate::metrics::record_download("aborted", bytes_sent, started.elapsed());
        }
        Err(e) => {
            tracing::error!(error = %e, "download failed");
            let bytes_sent = match &e {
                TransferError::Read { bytes_sent, .. } | TransferError::Write { bytes_sent, .. } => {
                    *bytes_sent
                }
            };
            crate::metrics::record_download("failed", bytes_sent, started.elapsed());
            if matches!(e, TransferError::Read { .. }) {
                // Terminate the body with an error so the client sees a truncated transfer
                let _ = tx
                    .send(Err(std::io::Error::other("artifact read failed")))
                    .await;
            }
        }
    }
    permit.release();
}
