use std::mem;
use std::time::Duration;

use rusqlite::hooks::Action;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::SchedulerDbError;

/// Events kept for a listener that has not taken the stream yet. Anything
/// past this many is discarded.
pub const EVENT_BACKLOG: usize = 64;

/// Kind of row change reported by the update hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

impl ChangeKind {
    /// Map the engine's action code; anything else is not a row change.
    #[must_use]
    pub fn from_action(action: Action) -> Option<Self> {
        match action {
            Action::SQLITE_INSERT => Some(ChangeKind::Insert),
            Action::SQLITE_UPDATE => Some(ChangeKind::Update),
            Action::SQLITE_DELETE => Some(ChangeKind::Delete),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ChangeKind::Insert => "insert",
            ChangeKind::Update => "update",
            ChangeKind::Delete => "delete",
        }
    }
}

/// Payload of the profile hook: the statement text and its run time.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileInfo {
    pub sql: String,
    pub elapsed: Duration,
}

/// Payload of the update hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowChange {
    pub kind: ChangeKind,
    pub database: String,
    pub table: String,
    pub row_id: i64,
}

/// Notifications emitted on a [`Database`](crate::Database).
#[derive(Debug, Clone, PartialEq)]
pub enum DatabaseEvent {
    /// The connection opened successfully.
    Open,
    /// The connection reached the end of its life. Carries the close
    /// failure when the handle could not be released.
    Close(Option<SchedulerDbError>),
    /// A failure with nobody waiting on it.
    Error(SchedulerDbError),
    Trace(String),
    Profile { sql: String, millis: f64 },
    Change(RowChange),
}

impl DatabaseEvent {
    /// Stable name of the notification.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            DatabaseEvent::Open => "open",
            DatabaseEvent::Close(_) => "close",
            DatabaseEvent::Error(_) => "error",
            DatabaseEvent::Trace(_) => "trace",
            DatabaseEvent::Profile { .. } => "profile",
            DatabaseEvent::Change(change) => change.kind.as_str(),
        }
    }
}

impl From<String> for DatabaseEvent {
    fn from(sql: String) -> Self {
        DatabaseEvent::Trace(sql)
    }
}

impl From<ProfileInfo> for DatabaseEvent {
    fn from(info: ProfileInfo) -> Self {
        DatabaseEvent::Profile {
            millis: info.elapsed.as_secs_f64() * 1000.0,
            sql: info.sql,
        }
    }
}

impl From<RowChange> for DatabaseEvent {
    fn from(change: RowChange) -> Self {
        DatabaseEvent::Change(change)
    }
}

/// Destination of the notifications a coordinator emits.
///
/// Before the stream is taken only the first [`EVENT_BACKLOG`] events are
/// held; once the listener drops its receiver nothing is held at all.
#[derive(Debug)]
pub(crate) enum EventSink {
    Waiting {
        backlog: Vec<DatabaseEvent>,
        discarded: usize,
    },
    Attached(mpsc::UnboundedSender<DatabaseEvent>),
    Detached,
}

impl Default for EventSink {
    fn default() -> Self {
        EventSink::Waiting {
            backlog: Vec::new(),
            discarded: 0,
        }
    }
}

impl EventSink {
    pub(crate) fn send(&mut self, event: DatabaseEvent) {
        match self {
            EventSink::Waiting { backlog, discarded } => {
                if backlog.len() < EVENT_BACKLOG {
                    backlog.push(event);
                } else {
                    *discarded += 1;
                }
            }
            EventSink::Attached(listener) => {
                if listener.send(event).is_err() {
                    debug!("event listener went away; discarding further events");
                    *self = EventSink::Detached;
                }
            }
            EventSink::Detached => {}
        }
    }

    /// Hand out the stream, starting with the backlog. Only the first call
    /// gets it.
    pub(crate) fn subscribe(&mut self) -> Option<mpsc::UnboundedReceiver<DatabaseEvent>> {
        if !matches!(self, EventSink::Waiting { .. }) {
            return None;
        }
        let EventSink::Waiting { backlog, discarded } = mem::replace(self, EventSink::Detached)
        else {
            return None;
        };
        if discarded > 0 {
            debug!(discarded, "events discarded before a listener attached");
        }
        let (listener, events) = mpsc::unbounded_channel();
        for event in backlog {
            let _ = listener.send(event);
        }
        *self = EventSink::Attached(listener);
        Some(events)
    }
}
