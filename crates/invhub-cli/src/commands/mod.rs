//! CLI command definitions and dispatch.

pub mod backup;
pub mod config;

use clap::{Parser, Subcommand};

use crate::output::OutputFormat;
use invhub_core::config::AppConfig;
use invhub_core::error::AppError;

/// InvHub: inventory datastore backup administration
#[derive(Debug, Parser)]
#[command(name = "invhub", version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/default.toml")]
    pub config: String,

    /// Environment overlay (`config/<env>.toml`)
    #[arg(short, long, default_value = "development")]
    pub env: String,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    pub format: OutputFormat,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level commands
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Snapshot management
    Backup(backup::BackupArgs),
    /// Configuration management
    Config(config::ConfigArgs),
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(&self) -> Result<(), AppError> {
        match &self.command {
            Commands::Backup(args) => {
                backup::execute(args, &self.config, &self.env, self.format).await
            }
            Commands::Config(args) => {
                config::execute(args, &self.config, &self.env, self.format).await
            }
        }
    }
}

/// Helper: load configuration from file, overlay, and environment
pub fn load_config(config_path: &str, env: &str) -> Result<AppConfig, AppError> {
    AppConfig::load(config_path, env)
}
