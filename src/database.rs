use std::path::{Path, PathBuf};
use std::mem;
use std::sync::{Arc, Mutex, PoisonError};

use rusqlite::Connection;
use rusqlite::types::Value;
use serde_json::Value as JsonValue;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use crate::bridge::HookKind;
use crate::config::{ConfigOption, DatabaseOptions, OpenMode, busy_timeout_millis};
use crate::coordinator::{Coordinator, Message};
use crate::error::SchedulerDbError;
use crate::events::{DatabaseEvent, EventSink};
use crate::lifecycle::ConnectionState;
use crate::request::{Completion, Reply, Request, RequestKind};
use crate::results::{ResultSet, execute_dml, execute_select};

/// Handle to one SQLite connection shared by many callers.
///
/// Every operation is queued in submission order and dispatched by a
/// coordinator task. Exclusive operations (open, close, `exec`, extension
/// loading, configuration, `wait`) run alone; statement-level operations may
/// overlap with each other but never with an exclusive one.
///
/// Cloning is cheap and every clone talks to the same connection. When the
/// last clone is dropped the coordinator finishes outstanding work and
/// releases the connection.
#[derive(Clone)]
pub struct Database {
    inner: Arc<Inner>,
}

struct Inner {
    mailbox: mpsc::UnboundedSender<Message>,
    state: watch::Receiver<ConnectionState>,
    events: Arc<Mutex<EventSink>>,
    /// Mirror of the coordinator's flag. Held while the change is sent so
    /// the mirror and the coordinator see changes in the same order.
    serialize: Mutex<bool>,
    options: DatabaseOptions,
}

impl Drop for Inner {
    fn drop(&mut self) {
        let _ = self.mailbox.send(Message::Shutdown);
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.inner.options.path)
            .field("mode", &self.inner.options.mode)
            .field("state", &self.state())
            .field("serialized", &self.is_serialized())
            .finish()
    }
}

impl Database {
    /// Start opening the database described by `options`.
    ///
    /// Returns immediately; the open runs in the background and requests
    /// submitted meanwhile wait for it. An open failure is reported as a
    /// [`DatabaseEvent::Error`] and every request fails with
    /// [`SchedulerDbError::ResourceClosed`].
    ///
    /// # Errors
    /// Returns [`SchedulerDbError::ConnectionError`] when called outside a
    /// tokio runtime.
    pub fn new(options: DatabaseOptions) -> Result<Self, SchedulerDbError> {
        Self::start(options, Completion::Fallback)
    }

    /// Open the database and wait for the outcome.
    ///
    /// # Errors
    /// Returns the engine error when the open fails, or
    /// [`SchedulerDbError::ConnectionError`] outside a tokio runtime.
    pub async fn connect(options: DatabaseOptions) -> Result<Self, SchedulerDbError> {
        let (respond_to, opened) = Reply::<()>::channel();
        let completion = Completion::typed(move |outcome: Result<(), SchedulerDbError>| {
            let _ = respond_to.send(outcome);
        });
        let db = Self::start(options, completion)?;
        opened.await?;
        Ok(db)
    }

    fn start(options: DatabaseOptions, completion: Completion) -> Result<Self, SchedulerDbError> {
        let runtime = Handle::try_current().map_err(|err| {
            SchedulerDbError::ConnectionError(format!("database requires a tokio runtime: {err}"))
        })?;
        let handle = Coordinator::start(&runtime, options.clone(), completion);
        Ok(Self {
            inner: Arc::new(Inner {
                mailbox: handle.mailbox,
                state: handle.state,
                events: handle.events,
                serialize: Mutex::new(false),
                options,
            }),
        })
    }

    #[must_use]
    pub fn filename(&self) -> &str {
        &self.inner.options.path
    }

    #[must_use]
    pub fn mode(&self) -> OpenMode {
        self.inner.options.mode
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state().is_open()
    }

    /// Whether new requests are currently admitted as exclusive.
    #[must_use]
    pub fn is_serialized(&self) -> bool {
        *self
            .inner
            .serialize
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Take the notification stream. Only the first call gets it.
    ///
    /// Until then at most [`EVENT_BACKLOG`](crate::EVENT_BACKLOG) events are
    /// held for it; later ones are discarded. Once the receiver is dropped
    /// nothing is held.
    pub fn events(&self) -> Option<mpsc::UnboundedReceiver<DatabaseEvent>> {
        self.inner
            .events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .subscribe()
    }

    /// Queue `request`. Never fails at the call site: errors reach the
    /// request's callback, or the event stream when it has none.
    pub fn submit(&self, request: Request) {
        if let Err(mpsc::error::SendError(message)) =
            self.inner.mailbox.send(Message::Submit(request))
        {
            let Message::Submit(request) = message else {
                return;
            };
            warn!(kind = ?request.kind, "database coordinator is gone; failing request");
            let err = SchedulerDbError::ConnectionError("database coordinator stopped".into());
            if let Some(DatabaseEvent::Error(err)) = request.completion.resolve(Err(err)) {
                warn!(%err, "dropping error with nobody listening");
            }
        }
    }

    fn request<R>(&self, request: Request) -> Reply<R>
    where
        R: Send + 'static,
    {
        let (request, reply) = request.replying();
        self.submit(request);
        reply
    }

    /// Run `func` against the connection on a worker thread.
    pub fn schedule<F, R>(&self, exclusive: bool, func: F) -> Reply<R>
    where
        F: FnOnce(&mut Connection) -> Result<R, SchedulerDbError> + Send + 'static,
        R: Send + 'static,
    {
        self.request(Request::new(exclusive, func))
    }

    /// Execute one or more statements as a single exclusive operation.
    pub fn exec(&self, sql: impl Into<String>) -> Reply<()> {
        let sql = sql.into();
        self.request(Request::engine(RequestKind::Exec, true, move |slot| {
            slot.exec(&sql)
        }))
    }

    /// Run a query and collect its rows. Overlaps with other statements.
    pub fn query(&self, sql: impl Into<String>, params: Vec<Value>) -> Reply<ResultSet> {
        let sql = sql.into();
        self.request(Request::engine(RequestKind::Statement, false, move |slot| {
            execute_select(slot.connection()?, &sql, &params)
        }))
    }

    /// Run a single statement and return the number of changed rows.
    pub fn run(&self, sql: impl Into<String>, params: Vec<Value>) -> Reply<usize> {
        let sql = sql.into();
        self.request(Request::engine(RequestKind::Statement, false, move |slot| {
            execute_dml(slot.connection()?, &sql, &params)
        }))
    }

    /// Resolves once everything submitted before it has finished.
    pub fn wait(&self) -> Reply<()> {
        self.request(Request::barrier())
    }

    pub fn load_extension(&self, path: impl AsRef<Path>) -> Reply<()> {
        let path: PathBuf = path.as_ref().to_path_buf();
        self.request(Request::engine(
            RequestKind::LoadExtension,
            true,
            move |slot| slot.load_extension(&path),
        ))
    }

    /// Close the connection once everything queued before it has run.
    ///
    /// Requests submitted afterwards fail with
    /// [`SchedulerDbError::ResourceClosed`].
    pub fn close(&self) -> Reply<()> {
        debug!(path = %self.inner.options.path, "closing database");
        self.request(Request::engine(RequestKind::Close, true, |slot| slot.close()))
    }

    /// Change a connection setting.
    ///
    /// `trace` and `profile` toggle their notification streams on and off
    /// (the value is ignored); `busyTimeout` takes an integer number of
    /// milliseconds. The change is applied as an exclusive request; failures
    /// surface as [`DatabaseEvent::Error`].
    ///
    /// # Errors
    /// Returns [`SchedulerDbError::InvalidArgument`] for an unknown option or a
    /// non-integer busy timeout.
    pub fn configure(&self, option: &str, value: JsonValue) -> Result<(), SchedulerDbError> {
        let request = match option.parse::<ConfigOption>()? {
            ConfigOption::Trace => Self::toggle_request(HookKind::Trace),
            ConfigOption::Profile => Self::toggle_request(HookKind::Profile),
            ConfigOption::BusyTimeout => {
                let millis = busy_timeout_millis(&value)?;
                Request::engine(RequestKind::Configure, true, move |slot| {
                    slot.set_busy_timeout(millis)
                })
            }
        };
        self.submit(request);
        Ok(())
    }

    /// Toggle row-change notifications. Resolves to whether they are now on.
    pub fn watch_changes(&self) -> Reply<bool> {
        self.request(Self::toggle_request(HookKind::Update))
    }

    fn toggle_request(kind: HookKind) -> Request {
        Request::engine(RequestKind::Configure, true, move |slot| {
            slot.toggle_hook(kind)
        })
    }

    /// Admit every later request as exclusive until [`Database::parallelize`].
    pub fn serialize(&self) {
        self.set_serialize(true);
    }

    /// Let statement-level requests overlap again.
    pub fn parallelize(&self) {
        self.set_serialize(false);
    }

    /// Run `scope` with serialized admission, then restore the previous mode.
    ///
    /// Nesting restores the mode of the immediately enclosing call; there is
    /// a single flag, not a stack.
    pub fn serialized<T>(&self, scope: impl FnOnce() -> T) -> T {
        self.scoped(true, scope)
    }

    /// Run `scope` with parallel admission, then restore the previous mode.
    pub fn parallelized<T>(&self, scope: impl FnOnce() -> T) -> T {
        self.scoped(false, scope)
    }

    fn scoped<T>(&self, serialize: bool, scope: impl FnOnce() -> T) -> T {
        let previous = self.set_serialize(serialize);
        let _restore = RestoreMode { db: self, previous };
        scope()
    }

    fn set_serialize(&self, serialize: bool) -> bool {
        let mut current = self
            .inner
            .serialize
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let _ = self.inner.mailbox.send(Message::SetSerialize(serialize));
        mem::replace(&mut *current, serialize)
    }
}

struct RestoreMode<'a> {
    db: &'a Database,
    previous: bool,
}

impl Drop for RestoreMode<'_> {
    fn drop(&mut self) {
        self.db.set_serialize(self.previous);
    }
}
