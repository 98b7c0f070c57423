//! Shared application state passed to every handler.

use std::sync::Arc;

use invhub_backup::BackupManager;
use invhub_core::config::AppConfig;
use invhub_service::BackupService;

/// Application state, cheaply cloneable.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Loaded configuration.
    pub config: Arc<AppConfig>,
    /// Backup administration service.
    pub backup_service: Arc<BackupService>,
}

impl AppState {
    /// Wire the state from configuration and an opened backup engine.
    pub fn new(config: AppConfig, manager: BackupManager) -> Self {
        Self {
            config: Arc::new(config),
            backup_service: Arc::new(BackupService::new(Arc::new(manager))),
        }
    }
}
