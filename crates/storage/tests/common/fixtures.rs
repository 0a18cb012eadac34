use bytes::Bytes;
use std::path::Path;
use tempfile::TempDir;
use tulpar_storage::FilesystemRepository;

/// Generate deterministic test data using a seeded pseudo-random generator
/// Same seed produces same output (reproducible tests)
pub fn seeded_bytes(seed: u64, len: usize) -> Bytes {
    let mut data = vec![0u8; len];
    let mut state = seed;

    // Simple LCG (Linear Congruential Generator)
    for chunk in data.chunks_mut(8) {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
        let bytes = state.to_le_bytes();
        for (i, byte) in chunk.iter_mut().enumerate() {
            *byte = bytes[i % 8];
        }
    }

    Bytes::from(data)
}

/// A throwaway repository tree on disk.
pub struct RepoFixture {
    pub dir: TempDir,
}

#[allow(dead_code)]
impl RepoFixture {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn repository(&self) -> FilesystemRepository {
        FilesystemRepository::new(self.root(), "apg")
    }

    pub fn add_metadata(&self, name: &str, json: &str) -> &Self {
        let dir = self.root().join("packages").join(name);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("metadata.json"), json).unwrap();
        self
    }

    pub fn add_artifact(&self, name: &str, arch: &str, version: &str, data: &[u8]) -> &Self {
        let dir = self.root().join("packages").join(name).join(arch);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(format!("{version}.apg")), data).unwrap();
        self
    }
}
