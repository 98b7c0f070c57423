//! Workspace integration tests.

mod backup_api_test;
mod backup_engine_test;
mod helpers;
