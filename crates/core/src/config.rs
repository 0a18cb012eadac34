//! Configuration types shared across crates.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Upper bound on a single streamed chunk.
pub const MAX_BUFFER_SIZE: u32 = 16 * 1024 * 1024;

/// HTTP server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Enable the /metrics endpoint for Prometheus scraping (default: true).
    /// SECURITY: When enabled, ensure this endpoint is network-restricted
    /// to authorized Prometheus scraper IPs only at the infrastructure level.
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_metrics_enabled() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            metrics_enabled: default_metrics_enabled(),
        }
    }
}

/// Package repository location and layout.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RepositoryConfig {
    /// Directory containing the `packages/` tree.
    #[serde(default = "default_root")]
    pub root: PathBuf,
    /// File extension of binary artifacts, without the leading dot.
    #[serde(default = "default_artifact_extension")]
    pub artifact_extension: String,
}

fn default_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_artifact_extension() -> String {
    "apg".to_string()
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            artifact_extension: default_artifact_extension(),
        }
    }
}

impl RepositoryConfig {
    pub fn validate(&self) -> Result<(), String> {
        let ext = &self.artifact_extension;
        if ext.is_empty() || ext.len() > 16 || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(format!(
                "repository.artifact_extension {ext:?} must be 1-16 ASCII alphanumeric characters"
            ));
        }
        Ok(())
    }
}

/// Admission and bandwidth limits. Read-only once the server has started.
///
/// A value of `0` for `max_requests`, `max_downloads_per_ip` or
/// `max_download_speed` disables that particular limit.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerLimits {
    /// Requests admitted per client within one window.
    #[serde(default = "default_max_requests")]
    pub max_requests: u32,
    /// Length of the tumbling request window in milliseconds.
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
    /// How long a client stays blocked after exceeding `max_requests`.
    ///
    /// A block always runs until the later of the current window's end and
    /// `now + block_duration_ms`, so a duration shorter than the rest of the
    /// window only blocks until the window ends, and the shipped default
    /// blocks for about a minute regardless of the window position.
    #[serde(default = "default_block_duration_ms")]
    pub block_duration_ms: u64,
    /// Concurrent download streams per client.
    #[serde(default = "default_max_downloads_per_ip")]
    pub max_downloads_per_ip: u32,
    /// Per-stream bandwidth ceiling in bytes per second.
    #[serde(default = "default_max_download_speed")]
    pub max_download_speed: u32,
    /// Chunk size in bytes used when streaming artifacts.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: u32,
}

fn default_max_requests() -> u32 {
    50
}

fn default_window_ms() -> u64 {
    60_000
}

fn default_block_duration_ms() -> u64 {
    60_000
}

fn default_max_downloads_per_ip() -> u32 {
    2
}

fn default_max_download_speed() -> u32 {
    1024 * 1024 // 1 MiB/s
}

fn default_buffer_size() -> u32 {
    1024
}

impl Default for ServerLimits {
    fn default() -> Self {
        Self {
            max_requests: default_max_requests(),
            window_ms: default_window_ms(),
            block_duration_ms: default_block_duration_ms(),
            max_downloads_per_ip: default_max_downloads_per_ip(),
            max_download_speed: default_max_download_speed(),
            buffer_size: default_buffer_size(),
        }
    }
}

impl ServerLimits {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    pub fn block_duration(&self) -> Duration {
        Duration::from_millis(self.block_duration_ms)
    }

    /// Validate limits.
    /// Returns warnings for disabled limits and errors for values the
    /// admission controller or stream writer cannot operate with.
    pub fn validate(&self) -> Result<Vec<String>, String> {
        let mut warnings = Vec::new();

        if self.buffer_size == 0 {
            return Err("limits.buffer_size cannot be 0".to_string());
        }
        if self.buffer_size > MAX_BUFFER_SIZE {
            return Err(format!(
                "limits.buffer_size {} exceeds maximum value {}",
                self.buffer_size, MAX_BUFFER_SIZE
            ));
        }

        if self.max_requests == 0 {
            warnings.push(
                "limits.max_requests=0 disables request admission control entirely".to_string(),
            );
        } else if self.window_ms == 0 {
            return Err("limits.window_ms cannot be 0 while limits.max_requests is set. \
                 Use a window of at least 1 millisecond."
                .to_string());
        }

        if self.max_downloads_per_ip == 0 {
            warnings.push(
                "limits.max_downloads_per_ip=0 allows unlimited concurrent downloads per client"
                    .to_string(),
            );
        }

        if self.max_download_speed == 0 {
            warnings.push(
                "limits.max_download_speed=0 disables per-download bandwidth shaping".to_string(),
            );
        } else if self.buffer_size > self.max_download_speed {
            warnings.push(format!(
                "limits.buffer_size={} is larger than limits.max_download_speed={}. \
                 Each chunk will be sent as a single burst followed by a long pause.",
                self.buffer_size, self.max_download_speed
            ));
        }

        Ok(warnings)
    }
}

/// Client tracking configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClientTrackingConfig {
    /// Trusted proxy IP addresses/CIDR ranges.
    /// Only requests from these IPs will have X-Forwarded-For/X-Real-IP headers trusted.
    /// If empty, forwarded headers are never trusted (only direct connection IP is used).
    /// Use ["*"] to trust all proxies (NOT recommended for production).
    #[serde(default)]
    pub trusted_proxies: Vec<String>,
    /// Maximum number of clients to track before rejecting new ones (default: 100000).
    /// When the limit is reached, unknown clients are rejected with 429 until cleanup runs.
    #[serde(default = "default_max_entries")]
    pub max_entries: u32,
    /// Interval in seconds between cleanup sweeps of idle clients (default: 60).
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
    /// Seconds of inactivity after which an unblocked, idle client is forgotten (default: 300).
    #[serde(default = "default_entry_ttl_secs")]
    pub entry_ttl_secs: u64,
    /// Interval in seconds between activity reports in the log (default: 300, 0 disables).
    #[serde(default = "default_report_interval_secs")]
    pub report_interval_secs: u64,
}

fn default_max_entries() -> u32 {
    100_000
}

fn default_cleanup_interval_secs() -> u64 {
    60
}

fn default_entry_ttl_secs() -> u64 {
    300
}

fn default_report_interval_secs() -> u64 {
    300
}

impl Default for ClientTrackingConfig {
    fn default() -> Self {
        Self {
            trusted_proxies: Vec::new(),
            max_entries: default_max_entries(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
            entry_ttl_secs: default_entry_ttl_secs(),
            report_interval_secs: default_report_interval_secs(),
        }
    }
}

impl ClientTrackingConfig {
    pub fn entry_ttl(&self) -> Duration {
        Duration::from_secs(self.entry_ttl_secs)
    }

    /// Validate client tracking configuration against the active limits.
    pub fn validate(&self, limits: &ServerLimits) -> Result<Vec<String>, String> {
        let mut warnings = Vec::new();

        if self.max_entries == 0 {
            return Err("clients.max_entries cannot be 0".to_string());
        }

        // tokio::time::interval panics on a zero period
        if self.cleanup_interval_secs == 0 {
            return Err("clients.cleanup_interval_secs cannot be 0. \
                 Use a value >= 1 second."
                .to_string());
        }

        if self.trusted_proxies.len() == 1 && self.trusted_proxies[0] == "*" {
            warnings.push(
                "clients.trusted_proxies=['*'] trusts ALL forwarded headers. \
                 This allows clients to spoof their IP address and bypass rate limits. \
                 Only use this setting in development or behind a trusted reverse proxy."
                    .to_string(),
            );
        }

        if self.entry_ttl_secs.saturating_mul(1000) < limits.window_ms {
            warnings.push(format!(
                "clients.entry_ttl_secs={} is shorter than limits.window_ms={}. \
                 Idle clients may be forgotten before their window ends, \
                 resetting their request count.",
                self.entry_ttl_secs, limits.window_ms
            ));
        }

        Ok(warnings)
    }
}

/// Admin API configuration. The admin routes are mounted only when present.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AdminConfig {
    /// Pre-computed hash of the admin token (SHA256 hex, 64 characters).
    /// Generate with: `echo -n "your-secret-token" | sha256sum`
    pub token_hash: String,
}

impl AdminConfig {
    /// Create a test configuration with a dummy token hash.
    ///
    /// **For testing only.** The hash is deterministic but not a real token.
    pub fn for_testing() -> Self {
        Self {
            // SHA256 of "test-admin-token"
            token_hash: "9f735e0df9a1ddc702bf0a1a7b83033f9f7153a00c29de82cedadc9957289b05"
                .to_string(),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.token_hash.len() != 64 || !self.token_hash.chars().all(|c| c.is_ascii_hexdigit())
        {
            return Err(
                "admin.token_hash must be a 64-character SHA256 hex digest".to_string(),
            );
        }
        Ok(())
    }
}

/// Complete application configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub repository: RepositoryConfig,
    #[serde(default)]
    pub limits: ServerLimits,
    #[serde(default)]
    pub clients: ClientTrackingConfig,
    /// Admin API configuration (optional).
    #[serde(default)]
    pub admin: Option<AdminConfig>,
}

impl AppConfig {
    /// Create a test configuration serving the repository at `root`.
    ///
    /// **For testing only.** Enables the admin API with a dummy token.
    pub fn for_testing(root: impl Into<PathBuf>) -> Self {
        Self {
            server: ServerConfig::default(),
            repository: RepositoryConfig {
                root: root.into(),
                ..RepositoryConfig::default()
            },
            limits: ServerLimits::default(),
            clients: ClientTrackingConfig::default(),
            admin: Some(AdminConfig::for_testing()),
        }
    }

    /// Validate every section, collecting warnings.
    pub fn validate(&self) -> crate::Result<Vec<String>> {
        let mut warnings = self.limits.validate().map_err(crate::Error::Config)?;
        warnings.extend(
            self.clients
                .validate(&self.limits)
                .map_err(crate::Error::Config)?,
        );
        self.repository.validate().map_err(crate::Error::Config)?;
        if let Some(admin) = &self.admin {
            admin.validate().map_err(crate::Error::Config)?;
        }
        Ok(warnings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limits_defaults() {
        let limits = ServerLimits::default();
        assert_eq!(limits.max_requests, 50);
        assert_eq!(limits.window(), Duration::from_secs(60));
        assert_eq!(limits.block_duration(), Duration::from_secs(60));
        assert_eq!(limits.max_downloads_per_ip, 2);
        assert_eq!(limits.max_download_speed, 1_048_576);
        assert_eq!(limits.buffer_size, 1024);
        assert!(limits.validate().unwrap().is_empty());
    }

    #[test]
    fn test_limits_deserialize_partial() {
        let json = r#"{"max_requests": 2, "window_ms": 1000}"#;
        let limits: ServerLimits = serde_json::from_str(json).unwrap();
        assert_eq!(limits.max_requests, 2);
        assert_eq!(limits.window_ms, 1000);
        assert_eq!(limits.block_duration_ms, 60_000);
        assert_eq!(limits.buffer_size, 1024);
    }

    #[test]
    fn test_limits_zero_buffer_rejected() {
        let limits = ServerLimits {
            buffer_size: 0,
            ..ServerLimits::default()
        };
        assert!(limits.validate().is_err());
    }

    #[test]
    fn test_limits_zero_window_rejected_only_when_limited() {
        let limits = ServerLimits {
            window_ms: 0,
            ..ServerLimits::default()
        };
        assert!(limits.validate().is_err());

        let unlimited = ServerLimits {
            window_ms: 0,
            max_requests: 0,
            ..ServerLimits::default()
        };
        let warnings = unlimited.validate().unwrap();
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn test_limits_zero_values_warn() {
        let limits = ServerLimits {
            max_requests: 0,
            max_downloads_per_ip: 0,
            max_download_speed: 0,
            ..ServerLimits::default()
        };
        assert_eq!(limits.validate().unwrap().len(), 3);
    }

    #[test]
    fn test_clients_zero_cleanup_interval_rejected() {
        let clients = ClientTrackingConfig {
            cleanup_interval_secs: 0,
            ..ClientTrackingConfig::default()
        };
        assert!(clients.validate(&ServerLimits::default()).is_err());
    }

    #[test]
    fn test_clients_wildcard_proxy_warns() {
        let clients = ClientTrackingConfig {
            trusted_proxies: vec!["*".to_string()],
            ..ClientTrackingConfig::default()
        };
        let warnings = clients.validate(&ServerLimits::default()).unwrap();
        assert!(warnings.iter().any(|w| w.contains("trusted_proxies")));
    }

    #[test]
    fn test_repository_extension_validation() {
        let mut repo = RepositoryConfig::default();
        assert!(repo.validate().is_ok());
        repo.artifact_extension = "../x".to_string();
        assert!(repo.validate().is_err());
        repo.artifact_extension = String::new();
        assert!(repo.validate().is_err());
    }

    #[test]
    fn test_admin_token_hash_validation() {
        assert!(AdminConfig::for_testing().validate().is_ok());
        let bad = AdminConfig {
            token_hash: "not-a-hash".to_string(),
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_app_config_validate_maps_errors() {
        let mut config = AppConfig::for_testing("/tmp");
        assert!(config.validate().is_ok());
        config.limits.buffer_size = 0;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, crate::Error::Config(_)));
    }

    #[test]
    fn test_app_config_admin_optional() {
        let config: AppConfig = serde_json::from_str("{}").unwrap();
        assert!(config.admin.is_none());
        assert_eq!(config.server.bind, "0.0.0.0:8080");
        assert_eq!(config.repository.artifact_extension, "apg");
    }
}
