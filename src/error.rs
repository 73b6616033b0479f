use thiserror::Error;

const SQLITE_ERROR: i32 = 1;
const SQLITE_MISUSE: i32 = 21;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerDbError {
    /// The engine reported a non-OK status for a blocking operation.
    #[error("SQLite error {code}: {message}")]
    Engine { code: i32, message: String },

    /// Submitted against, or stranded by, a closed connection.
    #[error("{0}")]
    ResourceClosed(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Execution error: {0}")]
    ExecutionError(String),
}

impl SchedulerDbError {
    /// Engine-style status code for this error, when one applies.
    #[must_use]
    pub fn code(&self) -> Option<i32> {
        match self {
            SchedulerDbError::Engine { code, .. } => Some(*code),
            SchedulerDbError::ResourceClosed(_) | SchedulerDbError::InvalidArgument(_) => {
                Some(SQLITE_MISUSE)
            }
            SchedulerDbError::ConnectionError(_) | SchedulerDbError::ExecutionError(_) => None,
        }
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(self, SchedulerDbError::ResourceClosed(_))
    }

    pub(crate) fn closed(message: &str) -> Self {
        SchedulerDbError::ResourceClosed(message.into())
    }
}

// Engine errors are flattened to code + message so the error stays `Clone` and
// can be handed to every stranded callback during a closed-drain.
impl From<rusqlite::Error> for SchedulerDbError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::SqliteFailure(inner, message) => SchedulerDbError::Engine {
                code: inner.extended_code,
                message: message.unwrap_or_else(|| inner.to_string()),
            },
            other => SchedulerDbError::Engine {
                code: SQLITE_ERROR,
                message: other.to_string(),
            },
        }
    }
}
