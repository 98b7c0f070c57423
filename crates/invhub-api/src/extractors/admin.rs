//! `AdminActor` extractor: checks the optional admin token and reads the
//! actor identity supplied by the upstream authentication layer.

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;

use invhub_core::error::AppError;
use invhub_service::AdminContext;

use crate::state::AppState;

/// The administrator performing the request.
#[derive(Debug, Clone)]
pub struct AdminActor(pub AdminContext);

impl AdminActor {
    /// Returns the inner `AdminContext`.
    pub fn context(&self) -> &AdminContext {
        &self.0
    }
}

impl std::ops::Deref for AdminActor {
    type Target = AdminContext;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl FromRequestParts<AppState> for AdminActor {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let admin = &state.config.admin;

        if !admin.token.is_empty() {
            let token = parts
                .headers
                .get(AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
                .ok_or_else(|| AppError::authentication("Missing admin token"))?;

            if !tokens_equal(token.as_bytes(), admin.token.as_bytes()) {
                return Err(AppError::authentication("Invalid admin token"));
            }
        }

        let actor = parts
            .headers
            .get(admin.actor_header.as_str())
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                AppError::authentication(format!("Missing '{}' header", admin.actor_header))
            })?;

        let mut ctx = AdminContext::new(actor)?;

        if let Some(ip) = parts
            .headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
        {
            ctx = ctx.with_ip(ip);
        }

        Ok(AdminActor(ctx))
    }
}

/// Length-independent comparison of two tokens.
fn tokens_equal(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
