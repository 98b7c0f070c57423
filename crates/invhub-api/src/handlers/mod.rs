//! Request handlers.

pub mod backup;
pub mod health;
