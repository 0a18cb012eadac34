//! Package repository abstraction and backends for Tulpar.
//!
//! This crate provides:
//! - Resolution of package metadata and artifacts from validated identifiers
//! - Confinement of every lookup to the repository root
//! - Catalog listing of packages and their versions

pub mod backends;
pub mod error;
pub mod traits;

pub use backends::filesystem::FilesystemRepository;
pub use error::{RepositoryError, RepositoryResult};
pub use traits::{Artifact, ArtifactReader, MetadataDocument, PackageRepository};

use std::sync::Arc;
use tulpar_core::config::RepositoryConfig;

/// Create a repository from configuration.
pub fn from_config(config: &RepositoryConfig) -> RepositoryResult<Arc<dyn PackageRepository>> {
    config.validate().map_err(RepositoryError::Config)?;
    Ok(Arc::new(FilesystemRepository::new(
        &config.root,
        config.artifact_extension.clone(),
    )))
}
