//! Snapshot management CLI commands.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Subcommand};
use serde::Serialize;
use tabled::Tabled;

use invhub_backup::{BackupManager, Snapshot, Verification};
use invhub_core::error::AppError;
use invhub_service::{AdminContext, BackupService};

use crate::output::{self, OutputFormat};

/// Arguments for backup commands
#[derive(Debug, Args)]
pub struct BackupArgs {
    /// Actor recorded in snapshot metadata (defaults to $USER)
    #[arg(short, long, global = true)]
    pub actor: Option<String>,

    /// Backup subcommand
    #[command(subcommand)]
    pub command: BackupCommand,
}

/// Backup subcommands
#[derive(Debug, Subcommand)]
pub enum BackupCommand {
    /// Snapshot the live datastore
    Create,
    /// List snapshots, newest first
    List,
    /// Show one snapshot
    Show {
        /// Snapshot name
        name: String,
    },
    /// Check a snapshot's archive against its checksum
    Verify {
        /// Snapshot name
        name: String,
    },
    /// Replace the live datastore with a snapshot
    Restore {
        /// Snapshot name
        name: String,
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
    /// Delete a snapshot and its sidecars
    Delete {
        /// Snapshot name
        name: String,
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
    /// Copy a snapshot archive out of the Archive Store
    Export {
        /// Snapshot name
        name: String,
        /// Destination file
        dest: PathBuf,
        /// Overwrite the destination if it exists
        #[arg(long)]
        force: bool,
    },
}

/// Snapshot display row
#[derive(Debug, Serialize, Tabled)]
struct SnapshotRow {
    /// Snapshot name
    name: String,
    /// Archive size
    size: String,
    /// Creation time
    created_at: String,
    /// Creator
    created_by: String,
    /// Checksum sidecar present
    checksum: String,
}

impl From<&Snapshot> for SnapshotRow {
    fn from(s: &Snapshot) -> Self {
        Self {
            name: s.name.to_string(),
            size: s.size_human.clone(),
            created_at: s.created_at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
            created_by: s.created_by.clone().unwrap_or_else(|| "-".to_string()),
            checksum: if s.has_checksum { "yes" } else { "missing" }.to_string(),
        }
    }
}

/// Execute backup commands
pub async fn execute(
    args: &BackupArgs,
    config_path: &str,
    env: &str,
    format: OutputFormat,
) -> Result<(), AppError> {
    let config = super::load_config(config_path, env)?;
    let manager = BackupManager::open(&config.backup).await?;
    let service = BackupService::new(Arc::new(manager));
    let ctx = AdminContext::new(resolve_actor(args.actor.as_deref()))?;

    match &args.command {
        BackupCommand::Create => {
            let snapshot = service.create_snapshot(&ctx).await?;
            match format {
                OutputFormat::Json => output::print_json(&snapshot),
                OutputFormat::Table => output::print_success(&format!(
                    "Snapshot '{}' created ({})",
                    snapshot.name, snapshot.size_human
                )),
            }
        }
        BackupCommand::List => {
            let snapshots = service.list_snapshots(&ctx).await?;
            match format {
                OutputFormat::Json => output::print_json(&snapshots),
                OutputFormat::Table => {
                    let rows: Vec<SnapshotRow> = snapshots.iter().map(SnapshotRow::from).collect();
                    output::print_table(&rows, "No snapshots in the archive store.");
                }
            }
        }
        BackupCommand::Show { name } => {
            let snapshot = service.get_snapshot(&ctx, name).await?;
            match format {
                OutputFormat::Json => output::print_json(&snapshot),
                OutputFormat::Table => {
                    let row = SnapshotRow::from(&snapshot);
                    output::print_kv("Name", &row.name);
                    output::print_kv(
                        "Size",
                        &format!("{} ({} bytes)", row.size, snapshot.size_bytes),
                    );
                    output::print_kv("Created", &row.created_at);
                    output::print_kv("Created by", &row.created_by);
                    let metadata = if snapshot.has_metadata { "yes" } else { "missing" };
                    output::print_kv("Metadata", metadata);
                    output::print_kv("Checksum", &row.checksum);
                }
            }
        }
        BackupCommand::Verify { name } => {
            let report = service.verify_snapshot(&ctx, name).await?;
            match &report.verification {
                _ if format == OutputFormat::Json => output::print_json(&report),
                Verification::Verified { digest } => {
                    output::print_success(&format!(
                        "Snapshot '{}' verified (sha256 {})",
                        name, digest
                    ));
                }
                Verification::NoChecksumOnFile => {
                    output::print_warning(&format!("Snapshot '{}' has no checksum on file", name));
                }
                Verification::Mismatch { .. } => {}
            }
            if let Verification::Mismatch { expected, actual } = &report.verification {
                return Err(AppError::integrity(format!(
                    "Snapshot '{}' is corrupt: expected {}, computed {}",
                    name, expected, actual
                )));
            }
        }
        BackupCommand::Restore { name, yes } => {
            let prompt = format!(
                "Replace the live datastore '{}' with snapshot '{}'?",
                config.backup.datastore_path, name
            );
            if !confirm(*yes, &prompt)? {
                output::print_warning("Restore cancelled");
                return Ok(());
            }

            let report = service.restore_snapshot(&ctx, name).await?;
            match format {
                OutputFormat::Json => output::print_json(&report),
                OutputFormat::Table => {
                    output::print_success(&format!(
                        "Restored snapshot '{}' ({} bytes)",
                        name, report.outcome.restored_bytes
                    ));
                    if let Some(pre) = &report.outcome.pre_restore_snapshot {
                        output::print_kv("Previous state saved as", pre.as_str());
                    }
                    if report.outcome.verification == Verification::NoChecksumOnFile {
                        output::print_warning("Snapshot had no checksum on file");
                    }
                    output::print_warning(&report.notice);
                }
            }
        }
        BackupCommand::Delete { name, yes } => {
            if !confirm(*yes, &format!("Delete snapshot '{}'?", name))? {
                output::print_warning("Delete cancelled");
                return Ok(());
            }

            let report = service.delete_snapshot(&ctx, name).await?;
            match format {
                OutputFormat::Json => output::print_json(&report),
                OutputFormat::Table => {
                    if report.archive_removed {
                        output::print_success(&format!("Snapshot '{}' deleted", name));
                    } else {
                        output::print_warning(&format!(
                            "Snapshot '{}' had no archive; removed leftover sidecars",
                            name
                        ));
                    }
                    for file in &report.leftover {
                        output::print_warning(&format!("Could not remove '{}'", file));
                    }
                }
            }
        }
        BackupCommand::Export { name, dest, force } => {
            let bytes = service.export(&ctx, name, dest, *force).await?;
            output::print_success(&format!(
                "Exported '{}' to '{}' ({} bytes)",
                name,
                dest.display(),
                bytes
            ));
        }
    }

    Ok(())
}

fn resolve_actor(explicit: Option<&str>) -> String {
    explicit
        .map(str::to_string)
        .or_else(|| std::env::var("USER").ok())
        .unwrap_or_else(|| "cli".to_string())
}

fn confirm(skip: bool, prompt: &str) -> Result<bool, AppError> {
    if skip {
        return Ok(true);
    }
    dialoguer::Confirm::new()
        .with_prompt(prompt)
        .default(false)
        .interact()
        .map_err(|e| AppError::internal(format!("Input error: {}", e)))
}
