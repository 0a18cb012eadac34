//! Core domain types and shared logic for the Tulpar package server.
//!
//! This crate defines the canonical data model used across all other crates:
//! - Package identifiers and their validation grammar
//! - Version ordering and catalog views
//! - Server configuration and limits

pub mod catalog;
pub mod config;
pub mod error;
pub mod identity;
pub mod version;

pub use catalog::{ArchVersions, PackageList, PackageListing};
pub use config::{AppConfig, ServerLimits};
pub use error::{Error, Result};
pub use identity::{Arch, PackageIdentity, PackageName, Version};
pub use version::compare_versions;

/// Directory under the repository root that holds all packages.
pub const PACKAGES_DIR: &str = "packages";

/// Name of the per-package metadata document.
pub const METADATA_FILE: &str = "metadata.json";
