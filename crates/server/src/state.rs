//! Application state shared across handlers.

use crate::admission::AdmissionController;
use crate::clients::ClientRegistry;
use crate::downloads::DownloadGuard;
use std::sync::Arc;
use std::time::Duration;
use tulpar_core::ServerLimits;
use tulpar_core::config::AppConfig;
use tulpar_storage::PackageRepository;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Limits, shared with the admission controller.
    pub limits: Arc<ServerLimits>,
    /// Package repository.
    pub repository: Arc<dyn PackageRepository>,
    /// Per-client state.
    pub clients: ClientRegistry,
    pub admission: AdmissionController,
    pub downloads: DownloadGuard,
}

impl AppState {
    /// Create a new application state.
    ///
    /// Validates the configuration and logs warnings for settings that
    /// disable a limit or weaken client identification.
    pub fn new(
        config: AppConfig,
        repository: Arc<dyn PackageRepository>,
    ) -> tulpar_core::Result<Self> {
        for warning in config.validate()? {
            tracing::warn!("Configuration warning: {}", warning);
        }

        let limits = Arc::new(config.limits.clone());
        let clients = ClientRegistry::new(&config.clients);
        let admission = AdmissionController::new(
            clients.clone(),
            limits.clone(),
            Duration::from_secs(config.clients.cleanup_interval_secs),
        );
        let downloads = DownloadGuard::new(clients.clone(), limits.max_downloads_per_ip);

        Ok(Self {
            config: Arc::new(config),
            limits,
            repository,
            clients,
            admission,
            downloads,
        })
    }

    /// Interval between sweeps of idle clients.
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.config.clients.cleanup_interval_secs)
    }

    /// Interval between activity reports, if enabled.
    pub fn report_interval(&self) -> Option<Duration> {
        match self.config.clients.report_interval_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use tulpar_storage::FilesystemRepository;

    fn build_state(config: AppConfig) -> tulpar_core::Result<AppState> {
        let repository: Arc<dyn PackageRepository> =
            Arc::new(FilesystemRepository::new(&config.repository.root, "apg"));
        AppState::new(config, repository)
    }

    #[test]
    fn state_shares_one_registry() {
        let temp = tempdir().unwrap();
        let state = build_state(AppConfig::for_testing(temp.path())).unwrap();

        let _permit = state.downloads.try_acquire("1.2.3.4").unwrap();
        state.admission.check_and_record("1.2.3.4");
        assert_eq!(state.clients.len(), 1);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let temp = tempdir().unwrap();
        let mut config = AppConfig::for_testing(temp.path());
        config.limits.buffer_size = 0;

        assert!(matches!(
            build_state(config),
            Err(tulpar_core::Error::Config(_))
        ));
    }

    #[test]
    fn report_interval_zero_disables_report() {
        let temp = tempdir().unwrap();
        let mut config = AppConfig::for_testing(temp.path());
        config.clients.report_interval_secs = 0;
        config.clients.cleanup_interval_secs = 12;

        let state = build_state(config).unwrap();
        assert!(state.report_interval().is_none());
        assert_eq!(state.cleanup_interval(), Duration::from_secs(12));
    }
}
