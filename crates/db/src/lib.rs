//! Durable storage for council sessions.
//!
//! Every session owns an append-only JSON Lines log (the source of truth)
//! plus a SQLite snapshot written at stage boundaries. Published progress
//! events and the persona catalogue live in the same database.

mod error;
mod log;
pub mod models;
mod pool;
pub mod repositories;
mod store;

pub use error::*;
pub use log::SessionLog;
pub use models::{CreateSessionEvent, SessionEventRecord, SnapshotSummary};
pub use pool::*;
pub use repositories::*;
pub use store::SessionStore;

#[cfg(test)]
pub(crate) async fn test_pool() -> (tempfile::TempDir, sqlx::SqlitePool) {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite:{}", dir.path().join("test.db").display());
    let pool = connect(&url).await.unwrap();
    (dir, pool)
}
