use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use rusqlite::Connection;
use tracing::{debug, error};

use crate::bridge::{Doorbell, HookKind, HookScope, HookSet};
use crate::config::DatabaseOptions;
use crate::error::SchedulerDbError;
use crate::request::{BoxedResponse, Job};

/// The connection handle plus the hook bridges installed on it.
///
/// Owned by the coordinator and lent to exactly one dispatched body at a time.
pub(crate) struct EngineSlot {
    conn: Option<Connection>,
    hooks: HookSet,
    doorbell: Doorbell,
}

impl EngineSlot {
    pub(crate) fn new(doorbell: Doorbell) -> Self {
        Self {
            conn: None,
            hooks: HookSet::default(),
            doorbell,
        }
    }

    pub(crate) fn connection(&mut self) -> Result<&mut Connection, SchedulerDbError> {
        self.conn
            .as_mut()
            .ok_or_else(|| SchedulerDbError::closed("Database handle is closed"))
    }

    pub(crate) fn open(&mut self, options: &DatabaseOptions) -> Result<(), SchedulerDbError> {
        let conn = Connection::open_with_flags(&options.path, options.mode.flags())?;
        conn.busy_timeout(Duration::from_millis(options.busy_timeout_ms))?;
        self.conn = Some(conn);
        Ok(())
    }

    /// Uninstall every hook, then release the handle. On failure the handle
    /// is kept.
    pub(crate) fn close(&mut self) -> Result<(), SchedulerDbError> {
        let Some(mut conn) = self.conn.take() else {
            return Err(SchedulerDbError::closed("Database handle is closed"));
        };
        self.hooks.remove_all(&mut conn);
        match conn.close() {
            Ok(()) => Ok(()),
            Err((conn, err)) => {
                self.conn = Some(conn);
                Err(err.into())
            }
        }
    }

    pub(crate) fn exec(&mut self, sql: &str) -> Result<(), SchedulerDbError> {
        self.connection()?.execute_batch(sql)?;
        Ok(())
    }

    pub(crate) fn set_busy_timeout(&mut self, millis: u64) -> Result<(), SchedulerDbError> {
        self.connection()?
            .busy_timeout(Duration::from_millis(millis))?;
        Ok(())
    }

    /// Install or remove the bridge for `kind`; returns whether it is active.
    pub(crate) fn toggle_hook(&mut self, kind: HookKind) -> Result<bool, SchedulerDbError> {
        let conn = self.conn.as_mut().ok_or_else(|| {
            SchedulerDbError::closed("Database handle is closed")
        })?;
        let active = self.hooks.toggle(kind, conn, &self.doorbell);
        debug!(?kind, active, "toggled engine hook");
        Ok(active)
    }

    /// Load an extension with loading enabled only for the duration of the call.
    #[allow(unsafe_code)]
    pub(crate) fn load_extension(&mut self, path: &Path) -> Result<(), SchedulerDbError> {
        let conn = self.connection()?;
        // SAFETY: extension loading is switched on only around this single
        // load and switched off again before returning, whatever the outcome.
        let loaded = unsafe {
            conn.load_extension_enable()?;
            conn.load_extension(path, None::<&str>)
        };
        let disabled = conn.load_extension_disable();
        loaded?;
        disabled?;
        Ok(())
    }
}

impl Drop for EngineSlot {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.as_mut() {
            self.hooks.remove_all(conn);
        }
    }
}

/// Run a dispatched body on the current (worker) thread.
///
/// Trace and profile producers fired by the body are routed to this
/// connection's bridges. A panic in the body is reported as an execution
/// error so the scheduler is always told about completion.
pub(crate) fn run_job(slot: &Mutex<EngineSlot>, job: Job) -> BoxedResponse {
    let mut guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
    let _scope = HookScope::enter(&guard.hooks);
    match panic::catch_unwind(AssertUnwindSafe(|| job(&mut *guard))) {
        Ok(outcome) => outcome,
        Err(_) => {
            error!("request body panicked on worker thread");
            Err(SchedulerDbError::ExecutionError(
                "request body panicked".into(),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::any::Any;
    use std::sync::Arc;

    use crate::bridge::Deliver;
    use crate::config::{DatabaseOptions, OpenMode};

    fn silent_slot() -> EngineSlot {
        let doorbell: Doorbell = Arc::new(|_: Arc<dyn Deliver>| {});
        EngineSlot::new(doorbell)
    }

    #[test]
    fn open_exec_close() {
        let mut slot = silent_slot();
        slot.open(&DatabaseOptions::new(":memory:")).unwrap();
        slot.exec("CREATE TABLE t(x); INSERT INTO t VALUES (1);").unwrap();
        assert!(slot.toggle_hook(HookKind::Trace).unwrap());
        slot.close().unwrap();
        assert!(slot.connection().unwrap_err().is_closed());
        assert!(slot.close().unwrap_err().is_closed());
    }

    #[test]
    fn open_failure_reports_engine_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.db");
        let options = DatabaseOptions::builder(missing.to_string_lossy())
            .mode(OpenMode::ReadOnly)
            .finish();
        let mut slot = silent_slot();
        let err = slot.open(&options).unwrap_err();
        assert!(matches!(err, SchedulerDbError::Engine { .. }), "{err:?}");
        assert!(slot.connection().is_err());
    }

    #[test]
    fn failed_extension_load_reports_the_load_error() {
        let mut slot = silent_slot();
        slot.open(&DatabaseOptions::new(":memory:")).unwrap();
        let dir = tempfile::tempdir().unwrap();

        let err = slot
            .load_extension(&dir.path().join("no_such_extension"))
            .unwrap_err();
        match &err {
            SchedulerDbError::Engine { message, .. } => {
                assert!(message.contains("no_such_extension"), "{err:?}");
            }
            other => panic!("expected engine error, got {other:?}"),
        }

        // Loading is switched off again.
        let err = slot
            .exec("SELECT load_extension('no_such_extension')")
            .unwrap_err();
        assert!(err.to_string().contains("not authorized"), "{err:?}");
    }

    #[test]
    fn panicking_body_becomes_an_error() {
        let slot = Mutex::new(silent_slot());
        let job: Job = Box::new(|_slot| -> Result<Box<dyn Any + Send>, SchedulerDbError> {
            panic!("boom")
        });
        let outcome = run_job(&slot, job);
        assert!(matches!(outcome, Err(SchedulerDbError::ExecutionError(_))));
        // The slot stays usable after the panic.
        slot.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .open(&DatabaseOptions::new(":memory:"))
            .unwrap();
    }
}
