//! Request scheduling for a single SQLite connection shared by many async
//! callers.
//!
//! A [`Database`] owns one `rusqlite` connection. Every operation becomes a
//! [`Request`] that is queued in submission order and run on tokio's blocking
//! pool. Exclusive requests (open, close, `exec`, configuration, extension
//! loading, `wait`) run alone and act as barriers; statement-level requests
//! may overlap with each other. Engine hooks (trace, profile, row changes)
//! fire on worker threads and are delivered as [`DatabaseEvent`]s.
//!
//! ```no_run
//! use sqlite_scheduler::{Database, DatabaseOptions};
//!
//! # async fn demo() -> Result<(), sqlite_scheduler::SchedulerDbError> {
//! let db = Database::connect(DatabaseOptions::new(":memory:")).await?;
//! db.exec("CREATE TABLE t(x INTEGER)").await?;
//! db.run("INSERT INTO t VALUES (?1)", vec![7_i64.into()]).await?;
//! let rows = db.query("SELECT x FROM t", Vec::new()).await?;
//! assert_eq!(rows.len(), 1);
//! db.close().await?;
//! # Ok(())
//! # }
//! ```

mod bridge;
mod config;
mod coordinator;
mod database;
mod engine;
mod error;
mod events;
mod lifecycle;
mod request;
mod results;
mod scheduler;

pub use config::{
    ConfigOption, DEFAULT_BUSY_TIMEOUT_MS, DatabaseOptions, DatabaseOptionsBuilder, OpenMode,
};
pub use database::Database;
pub use error::SchedulerDbError;
pub use events::{ChangeKind, DatabaseEvent, EVENT_BACKLOG, ProfileInfo, RowChange};
pub use lifecycle::ConnectionState;
pub use request::{Reply, Request, RequestKind};
pub use results::ResultSet;

pub use rusqlite;
pub use rusqlite::types::Value;
