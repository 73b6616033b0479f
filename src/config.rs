use std::str::FromStr;

use rusqlite::OpenFlags;
use serde::Deserialize;
use serde_json::Value;

use crate::error::SchedulerDbError;

/// Busy timeout applied right after a successful open.
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 1000;

/// Access mode used when opening the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpenMode {
    ReadOnly,
    ReadWrite,
    #[default]
    ReadWriteCreate,
}

impl OpenMode {
    #[must_use]
    pub fn flags(self) -> OpenFlags {
        let access = match self {
            OpenMode::ReadOnly => OpenFlags::SQLITE_OPEN_READ_ONLY,
            OpenMode::ReadWrite => OpenFlags::SQLITE_OPEN_READ_WRITE,
            OpenMode::ReadWriteCreate => {
                OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE
            }
        };
        access | OpenFlags::SQLITE_OPEN_URI | OpenFlags::SQLITE_OPEN_FULL_MUTEX
    }
}

/// Options for opening a [`Database`](crate::Database).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DatabaseOptions {
    pub path: String,
    #[serde(default)]
    pub mode: OpenMode,
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u64,
}

fn default_busy_timeout() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

impl DatabaseOptions {
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            mode: OpenMode::default(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
        }
    }

    #[must_use]
    pub fn builder(path: impl Into<String>) -> DatabaseOptionsBuilder {
        DatabaseOptionsBuilder::new(path)
    }

    /// Parse options from a JSON document such as
    /// `{"path": "app.db", "mode": "read_only"}`.
    ///
    /// # Errors
    /// Returns [`SchedulerDbError::InvalidArgument`] when the document does not
    /// describe valid options.
    pub fn from_json(json: &str) -> Result<Self, SchedulerDbError> {
        serde_json::from_str(json)
            .map_err(|err| SchedulerDbError::InvalidArgument(format!("database options: {err}")))
    }
}

/// Fluent builder for [`DatabaseOptions`].
#[derive(Debug, Clone)]
pub struct DatabaseOptionsBuilder {
    opts: DatabaseOptions,
}

impl DatabaseOptionsBuilder {
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            opts: DatabaseOptions::new(path),
        }
    }

    #[must_use]
    pub fn mode(mut self, mode: OpenMode) -> Self {
        self.opts.mode = mode;
        self
    }

    #[must_use]
    pub fn busy_timeout_ms(mut self, millis: u64) -> Self {
        self.opts.busy_timeout_ms = millis;
        self
    }

    #[must_use]
    pub fn finish(self) -> DatabaseOptions {
        self.opts
    }
}

/// Runtime options accepted by [`Database::configure`](crate::Database::configure).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigOption {
    Trace,
    Profile,
    BusyTimeout,
}

impl FromStr for ConfigOption {
    type Err = SchedulerDbError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name {
            "trace" => Ok(ConfigOption::Trace),
            "profile" => Ok(ConfigOption::Profile),
            "busyTimeout" => Ok(ConfigOption::BusyTimeout),
            other => Err(SchedulerDbError::InvalidArgument(format!(
                "{other} is not a valid configuration option"
            ))),
        }
    }
}

/// Validate a `busyTimeout` value: a 32-bit integer of milliseconds.
/// Negative values disable the timeout.
pub(crate) fn busy_timeout_millis(value: &Value) -> Result<u64, SchedulerDbError> {
    let millis = value
        .as_i64()
        .and_then(|millis| i32::try_from(millis).ok())
        .ok_or_else(|| SchedulerDbError::InvalidArgument("Value must be an integer".into()))?;
    Ok(u64::try_from(millis).unwrap_or(0))
}
