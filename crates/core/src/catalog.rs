//! Catalog views returned by the browsing endpoints.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::version::sort_versions;

/// All packages present in the repository.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PackageList {
    pub packages: Vec<String>,
}

/// Versions published for one architecture of a package.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArchVersions {
    /// Highest version, or `None` when the architecture directory is empty.
    pub latest: Option<String>,
    /// All versions, ascending.
    pub versions: Vec<String>,
}

impl ArchVersions {
    /// Build from an unordered set of versions.
    pub fn from_unsorted(mut versions: Vec<String>) -> Self {
        sort_versions(&mut versions);
        Self {
            latest: versions.last().cloned(),
            versions,
        }
    }
}

/// Per-architecture version listing for one package.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PackageListing {
    pub package: String,
    pub architectures: BTreeMap<String, ArchVersions>,
}
