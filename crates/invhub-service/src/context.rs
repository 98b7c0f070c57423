//! Context for the administrator performing an operation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use invhub_core::error::AppError;

/// Who is acting, and when.
///
/// The actor string is supplied by the authentication layer in front of
/// InvHub and is recorded verbatim in snapshot metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminContext {
    /// Actor identity.
    pub actor: String,
    /// IP address of the request origin, when known.
    pub ip_address: Option<String>,
    /// When the request was received.
    pub request_time: DateTime<Utc>,
}

impl AdminContext {
    /// Creates a context for `actor`. Blank actors are rejected.
    pub fn new(actor: impl Into<String>) -> Result<Self, AppError> {
        let actor = actor.into().trim().to_string();
        if actor.is_empty() {
            return Err(AppError::validation("Actor identity must not be empty"));
        }
        Ok(Self {
            actor,
            ip_address: None,
            request_time: Utc::now(),
        })
    }

    /// Attach the request origin.
    pub fn with_ip(mut self, ip_address: impl Into<String>) -> Self {
        self.ip_address = Some(ip_address.into());
        self
    }
}
