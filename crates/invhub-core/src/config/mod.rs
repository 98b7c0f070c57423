//! Application configuration schemas.
//!
//! All configuration structs are deserialized via the `config` crate from
//! TOML files and `INVHUB__`-prefixed environment variables. Each sub-module
//! represents a logical configuration section.

pub mod app;
pub mod backup;
pub mod logging;

use serde::{Deserialize, Serialize};

pub use self::app::{AdminConfig, CorsConfig, ServerConfig};
pub use self::backup::BackupConfig;
pub use self::logging::LoggingConfig;

use crate::error::AppError;

/// Root application configuration.
///
/// Every section has defaults, so an empty source set yields a usable
/// development configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,
    /// Backup engine settings (Archive Store and live datastore paths).
    #[serde(default)]
    pub backup: BackupConfig,
    /// Admin interface settings.
    #[serde(default)]
    pub admin: AdminConfig,
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration.
    ///
    /// Merges `path` (optional, any format the `config` crate recognises by
    /// extension), an environment-specific overlay `config/{env}` and
    /// environment variables prefixed with `INVHUB__`.
    pub fn load(path: &str, env: &str) -> Result<Self, AppError> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(config::File::with_name(&format!("config/{env}")).required(false))
            .add_source(
                config::Environment::with_prefix("INVHUB")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| AppError::configuration(format!("Failed to build config: {e}")))?;

        let config: Self = config
            .try_deserialize()
            .map_err(|e| AppError::configuration(format!("Failed to deserialize config: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints the deserializer cannot express.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.backup.archive_dir.trim().is_empty() {
            return Err(AppError::configuration("backup.archive_dir must not be empty"));
        }
        if self.backup.datastore_path.trim().is_empty() {
            return Err(AppError::configuration(
                "backup.datastore_path must not be empty",
            ));
        }
        if self.backup.compression_level > 9 {
            return Err(AppError::configuration(
                "backup.compression_level must be between 0 and 9",
            ));
        }
        if self.backup.name_prefix.is_empty()
            || !self
                .backup
                .name_prefix
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'))
        {
            return Err(AppError::configuration(
                "backup.name_prefix must be non-empty and contain only [A-Za-z0-9_-]",
            ));
        }
        if self.backup.archive_extension.is_empty()
            || !self
                .backup
                .archive_extension
                .chars()
                .all(|c| c.is_ascii_alphanumeric())
        {
            return Err(AppError::configuration(
                "backup.archive_extension must be non-empty and alphanumeric",
            ));
        }
        Ok(())
    }
}
