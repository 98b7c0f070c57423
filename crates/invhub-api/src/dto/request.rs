//! Request DTOs.

use serde::Deserialize;

/// Query parameters for `GET /api/admin/backups/{name}/download`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DownloadQuery {
    /// Check the archive against its checksum before streaming it.
    #[serde(default)]
    pub verify: bool,
}
