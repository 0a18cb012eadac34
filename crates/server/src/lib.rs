//! HTTP server for the Tulpar package distribution service.
//!
//! This crate provides the request path in front of the repository:
//! - Package info and artifact download dispatch
//! - Per-client admission control with a block period
//! - Per-client download concurrency limits
//! - Bandwidth-throttled artifact streaming
//! - Catalog browsing, health, metrics and admin endpoints

pub mod admission;
pub mod auth;
pub mod clients;
pub mod downloads;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod routes;
pub mod state;
pub mod throttle;

pub use admission::{Admission, AdmissionController, RejectReason};
pub use clients::{ClientKey, ClientRegistry};
pub use downloads::{DownloadGuard, DownloadPermit, GuardRejection};
pub use error::ApiError;
pub use routes::create_router;
pub use state::AppState;
