//! Test fixtures for generating test data.

use async_trait::async_trait;
use bytes::Bytes;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, ReadBuf};
use tulpar_core::{PackageIdentity, PackageListing, PackageName};
use tulpar_storage::{
    Artifact, ArtifactReader, MetadataDocument, PackageRepository, RepositoryResult,
};

/// Generate deterministic test data based on a seed.
#[allow(dead_code)]
pub fn seeded_bytes(seed: u64, len: usize) -> Bytes {
    let mut data = vec![0u8; len];
    let mut state = seed;

    for chunk in data.chunks_mut(8) {
        // Simple LCG for deterministic data
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
        let bytes = state.to_le_bytes();
        for (i, byte) in chunk.iter_mut().enumerate() {
            *byte = bytes[i % 8];
        }
    }

    Bytes::from(data)
}

/// A small package metadata document.
#[allow(dead_code)]
pub fn sample_metadata(name: &str) -> String {
    format!(r#"{{"name":"{name}","description":"test package","license":"MIT"}}"#)
}

/// Wraps a repository and counts every resolver call.
#[allow(dead_code)]
pub struct CountingRepository {
    inner: Arc<dyn PackageRepository>,
    calls: AtomicUsize,
}

#[allow(dead_code)]
impl CountingRepository {
    pub fn new(inner: Arc<dyn PackageRepository>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn hit(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl PackageRepository for CountingRepository {
    async fn resolve_metadata(&self, name: &PackageName) -> RepositoryResult<MetadataDocument> {
        self.hit();
        self.inner.resolve_metadata(name).await
    }

    async fn resolve_artifact(&self, identity: &PackageIdentity) -> RepositoryResult<Artifact> {
        self.hit();
        self.inner.resolve_artifact(identity).await
    }

    async fn open_artifact(&self, artifact: &Artifact) -> RepositoryResult<ArtifactReader> {
        self.hit();
        self.inner.open_artifact(artifact).await
    }

    async fn list_packages(&self) -> RepositoryResult<Vec<PackageName>> {
        self.hit();
        self.inner.list_packages().await
    }

    async fn list_versions(&self, name: &PackageName) -> RepositoryResult<PackageListing> {
        self.hit();
        self.inner.list_versions(name).await
    }

    async fn health_check(&self) -> RepositoryResult<()> {
        self.inner.health_check().await
    }
}

/// Reader that yields `remaining` bytes and then fails.
#[allow(dead_code)]
pub struct FailingReader {
    remaining: usize,
}

impl AsyncRead for FailingReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        if self.remaining == 0 {
            return Poll::Ready(Err(std::io::Error::other("device error")));
        }
        let n = self.remaining.min(buf.remaining());
        buf.put_slice(&vec![0xAB; n]);
        self.remaining -= n;
        Poll::Ready(Ok(()))
    }
}

/// Wraps a repository so that every opened artifact fails after `fail_after` bytes.
#[allow(dead_code)]
pub struct FailingReadRepository {
    inner: Arc<dyn PackageRepository>,
    fail_after: usize,
}

#[allow(dead_code)]
impl FailingReadRepository {
    pub fn new(inner: Arc<dyn PackageRepository>, fail_after: usize) -> Arc<Self> {
        Arc::new(Self { inner, fail_after })
    }
}

#[async_trait]
impl PackageRepository for FailingReadRepository {
    async fn resolve_metadata(&self, name: &PackageName) -> RepositoryResult<MetadataDocument> {
        self.inner.resolve_metadata(name).await
    }

    async fn resolve_artifact(&self, identity: &PackageIdentity) -> RepositoryResult<Artifact> {
        self.inner.resolve_artifact(identity).await
    }

    async fn open_artifact(&self, _artifact: &Artifact) -> RepositoryResult<ArtifactReader> {
        Ok(Box::pin(FailingReader {
            remaining: self.fail_after,
        }))
    }

    async fn list_packages(&self) -> RepositoryResult<Vec<PackageName>> {
        self.inner.list_packages().await
    }

    async fn list_versions(&self, name: &PackageName) -> RepositoryResult<PackageListing> {
        self.inner.list_versions(name).await
    }

    async fn health_check(&self) -> RepositoryResult<()> {
        self.inner.health_check().await
    }
}
