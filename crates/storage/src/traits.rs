//! Repository trait definitions.

use crate::error::RepositoryResult;
use async_trait::async_trait;
use bytes::Bytes;
use std::path::PathBuf;
use std::pin::Pin;
use tokio::io::AsyncRead;
use tulpar_core::{PackageIdentity, PackageListing, PackageName};

/// A boxed reader over artifact content.
pub type ArtifactReader = Pin<Box<dyn AsyncRead + Send>>;

/// The metadata document of a package, served verbatim.
#[derive(Clone, Debug)]
pub struct MetadataDocument {
    pub name: PackageName,
    pub content: Bytes,
}

/// A resolved artifact. Existence and size are checked at resolution time.
#[derive(Clone, Debug)]
pub struct Artifact {
    pub identity: PackageIdentity,
    pub path: PathBuf,
    pub size_bytes: u64,
}

/// Read-only package repository.
///
/// Implementations take validated identifiers only; raw request strings never
/// reach this layer.
#[async_trait]
pub trait PackageRepository: Send + Sync + 'static {
    /// Locate and load the metadata document of a package.
    async fn resolve_metadata(&self, name: &PackageName) -> RepositoryResult<MetadataDocument>;

    /// Locate an artifact and check that it is a regular file.
    async fn resolve_artifact(&self, identity: &PackageIdentity) -> RepositoryResult<Artifact>;

    /// Open a previously resolved artifact for reading.
    async fn open_artifact(&self, artifact: &Artifact) -> RepositoryResult<ArtifactReader>;

    /// List all packages, sorted by name.
    async fn list_packages(&self) -> RepositoryResult<Vec<PackageName>>;

    /// List published versions of a package per architecture.
    async fn list_versions(&self, name: &PackageName) -> RepositoryResult<PackageListing>;

    /// Check that the repository is reachable.
    async fn health_check(&self) -> RepositoryResult<()>;
}
