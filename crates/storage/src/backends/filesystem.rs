//! Local filesystem repository backend.
//!
//! Layout under the root:
//!
//! ```text
//! packages/{name}/metadata.json
//! packages/{name}/{arch}/{version}.{ext}
//! ```

use crate::error::{RepositoryError, RepositoryResult};
use crate::traits::{Artifact, ArtifactReader, MetadataDocument, PackageRepository};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tracing::instrument;
use tulpar_core::{
    Arch, ArchVersions, METADATA_FILE, PACKAGES_DIR, PackageIdentity, PackageListing,
    PackageName, Version,
};

/// Read-only repository rooted at a local directory.
pub struct FilesystemRepository {
    root: PathBuf,
    extension: String,
}

impl FilesystemRepository {
    /// Create a repository over `root`. Artifacts carry the file extension `extension`.
    pub fn new(root: impl AsRef<Path>, extension: impl Into<String>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            extension: extension.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn artifact_rel_path(&self, identity: &PackageIdentity) -> PathBuf {
        Path::new(PACKAGES_DIR)
            .join(identity.name().as_str())
            .join(identity.arch().as_str())
            .join(format!("{}.{}", identity.version(), self.extension))
    }

    /// Resolve a relative path under the root, off the async runtime.
    async fn resolve_path(&self, rel: PathBuf) -> RepositoryResult<PathBuf> {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || Self::resolve_path_sync(&root, &rel))
            .await
            .map_err(|e| {
                RepositoryError::Io(std::io::Error::other(format!("spawn_blocking failed: {e}")))
            })?
    }

    /// Resolve an existing path under the root with confinement checks.
    ///
    /// Returns the canonical path. Paths that resolve outside the root,
    /// including through symlinked files or directories, are rejected.
    fn resolve_path_sync(root: &Path, rel: &Path) -> RepositoryResult<PathBuf> {
        let display = rel.display().to_string();

        for component in rel.components() {
            if !matches!(component, Component::Normal(_)) {
                return Err(RepositoryError::InvalidPath(format!(
                    "contains unsafe path component: {display}"
                )));
            }
        }

        let path = root.join(rel);

        let root_canonical = root.canonicalize().map_err(|e| {
            RepositoryError::Io(std::io::Error::new(
                e.kind(),
                format!("failed to canonicalize repository root: {e}"),
            ))
        })?;

        let meta = std::fs::symlink_metadata(&path)
            .map_err(|e| RepositoryError::from_io(e, display.clone()))?;

        let canonical = path.canonicalize().map_err(|e| {
            if meta.file_type().is_symlink() {
                RepositoryError::InvalidPath(format!("symlink target missing or invalid: {display}"))
            } else {
                RepositoryError::Io(std::io::Error::new(
                    e.kind(),
                    format!("failed to canonicalize path: {e}"),
                ))
            }
        })?;

        if !canonical.starts_with(&root_canonical) {
            return Err(RepositoryError::InvalidPath(format!(
                "resolved path escapes repository root: {display}"
            )));
        }

        Ok(canonical)
    }

    /// Collect the versions published under one architecture directory.
    async fn read_arch_versions(&self, dir: &Path) -> RepositoryResult<Vec<String>> {
        let suffix = format!(".{}", self.extension);
        let mut versions = Vec::new();
        let mut entries = fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let file_name = entry.file_name();
            let Some(stem) = file_name.to_str().and_then(|n| n.strip_suffix(&suffix)) else {
                continue;
            };
            if let Ok(version) = Version::new(stem) {
                versions.push(version.to_string());
            }
        }
        Ok(versions)
    }
}

#[async_trait]
impl PackageRepository for FilesystemRepository {
    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn resolve_metadata(&self, name: &PackageName) -> RepositoryResult<MetadataDocument> {
        let rel = Path::new(PACKAGES_DIR)
            .join(name.as_str())
            .join(METADATA_FILE);
        let path = self.resolve_path(rel).await?;
        let content = fs::read(&path)
            .await
            .map_err(|e| RepositoryError::from_io(e, format!("metadata for {name}")))?;
        Ok(MetadataDocument {
            name: name.clone(),
            content: Bytes::from(content),
        })
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn resolve_artifact(&self, identity: &PackageIdentity) -> RepositoryResult<Artifact> {
        let path = self.resolve_path(self.artifact_rel_path(identity)).await?;
        let metadata = fs::metadata(&path)
            .await
            .map_err(|e| RepositoryError::from_io(e, identity.to_string()))?;
        if !metadata.is_file() {
            return Err(RepositoryError::NotFound(identity.to_string()));
        }
        Ok(Artifact {
            identity: identity.clone(),
            path,
            size_bytes: metadata.len(),
        })
    }

    #[instrument(skip(self), fields(backend = "filesystem", artifact = %artifact.identity))]
    async fn open_artifact(&self, artifact: &Artifact) -> RepositoryResult<ArtifactReader> {
        let file = fs::File::open(&artifact.path)
            .await
            .map_err(|e| RepositoryError::from_io(e, artifact.identity.to_string()))?;
        Ok(Box::pin(file))
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn list_packages(&self) -> RepositoryResult<Vec<PackageName>> {
        let dir = match self.resolve_path(PathBuf::from(PACKAGES_DIR)).await {
            Ok(dir) => dir,
            Err(RepositoryError::NotFound(_)) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut packages = Vec::new();
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str()
                && let Ok(name) = PackageName::new(name)
            {
                packages.push(name);
            }
        }
        packages.sort();
        Ok(packages)
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn list_versions(&self, name: &PackageName) -> RepositoryResult<PackageListing> {
        let dir = self
            .resolve_path(Path::new(PACKAGES_DIR).join(name.as_str()))
            .await?;
        if !fs::metadata(&dir).await?.is_dir() {
            return Err(RepositoryError::NotFound(name.to_string()));
        }

        let mut architectures = BTreeMap::new();
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let Some(arch) = entry.file_name().to_str().and_then(|a| Arch::new(a).ok()) else {
                continue;
            };
            let versions = self.read_arch_versions(&entry.path()).await?;
            architectures.insert(arch.to_string(), ArchVersions::from_unsorted(versions));
        }

        Ok(PackageListing {
            package: name.to_string(),
            architectures,
        })
    }

    async fn health_check(&self) -> RepositoryResult<()> {
        // Verify the root directory exists and is accessible
        let metadata = fs::metadata(&self.root).await.map_err(|e| {
            RepositoryError::Io(std::io::Error::new(
                e.kind(),
                format!("repository root not accessible: {e}"),
            ))
        })?;

        if !metadata.is_dir() {
            return Err(RepositoryError::Io(std::io::Error::new(
                std::io::ErrorKind::NotADirectory,
                format!("repository root is not a directory: {:?}", self.root),
            )));
        }

        Ok(())
    }
}
