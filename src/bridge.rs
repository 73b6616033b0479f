//! Worker-thread to coordinator hand-off for engine hooks.
//!
//! The trace, profile and update hooks fire synchronously inside whatever
//! engine call is running, on whichever thread runs it. A producer pushes the
//! payload into the bridge inbox and rings the coordinator's doorbell; the
//! coordinator later drains the inbox in arrival order and turns each payload
//! into a [`DatabaseEvent`].

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use rusqlite::Connection;
use rusqlite::hooks::Action;

use crate::events::{ChangeKind, DatabaseEvent, ProfileInfo, RowChange};

/// Type-erased view of a bridge, used by the coordinator to drain it.
pub(crate) trait Deliver: Send + Sync {
    fn deliver(&self) -> Vec<DatabaseEvent>;
}

/// Wakes the coordinator after a payload was queued.
pub(crate) type Doorbell = Arc<dyn Fn(Arc<dyn Deliver>) + Send + Sync>;

pub(crate) struct EventBridge<T> {
    inbox: Mutex<VecDeque<T>>,
    finished: AtomicBool,
    doorbell: Doorbell,
}

impl<T> fmt::Debug for EventBridge<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBridge")
            .field("finished", &self.is_finished())
            .finish()
    }
}

impl<T> EventBridge<T>
where
    T: Into<DatabaseEvent> + Send + 'static,
{
    pub(crate) fn new(doorbell: Doorbell) -> Arc<Self> {
        Arc::new(Self {
            inbox: Mutex::new(VecDeque::new()),
            finished: AtomicBool::new(false),
            doorbell,
        })
    }

    /// Queue `payload` for delivery. Never blocks on the coordinator.
    ///
    /// Returns `false` once the bridge has been finished; the payload is
    /// dropped in that case.
    pub(crate) fn send(self: &Arc<Self>, payload: T) -> bool {
        if self.is_finished() {
            return false;
        }
        self.inbox
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(payload);
        (self.doorbell)(Arc::clone(self) as Arc<dyn Deliver>);
        true
    }

    /// Take every queued payload, oldest first.
    pub(crate) fn drain(&self) -> Vec<T> {
        self.inbox
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect()
    }

    /// Stop accepting payloads. Anything already queued is still delivered.
    pub(crate) fn finish(&self) {
        self.finished.store(true, Ordering::Release);
    }
}

impl<T> EventBridge<T> {
    pub(crate) fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }
}

impl<T> Deliver for EventBridge<T>
where
    T: Into<DatabaseEvent> + Send + 'static,
{
    fn deliver(&self) -> Vec<DatabaseEvent> {
        self.drain().into_iter().map(Into::into).collect()
    }
}

/// Which engine hook a bridge serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HookKind {
    Trace,
    Profile,
    Update,
}

/// The bridges currently installed on a connection; at most one per kind.
#[derive(Debug, Default)]
pub(crate) struct HookSet {
    trace: Option<Arc<EventBridge<String>>>,
    profile: Option<Arc<EventBridge<ProfileInfo>>>,
    update: Option<Arc<EventBridge<RowChange>>>,
}

impl HookSet {
    pub(crate) fn is_active(&self, kind: HookKind) -> bool {
        match kind {
            HookKind::Trace => self.trace.is_some(),
            HookKind::Profile => self.profile.is_some(),
            HookKind::Update => self.update.is_some(),
        }
    }

    /// Install the hook of `kind` if absent, otherwise remove it.
    ///
    /// Returns whether the hook is active afterwards.
    pub(crate) fn toggle(
        &mut self,
        kind: HookKind,
        conn: &mut Connection,
        doorbell: &Doorbell,
    ) -> bool {
        if self.is_active(kind) {
            self.remove(kind, conn);
            return false;
        }

        match kind {
            HookKind::Trace => {
                self.trace = Some(EventBridge::new(Arc::clone(doorbell)));
                conn.trace(Some(trace_producer));
            }
            HookKind::Profile => {
                self.profile = Some(EventBridge::new(Arc::clone(doorbell)));
                conn.profile(Some(profile_producer));
            }
            HookKind::Update => {
                let bridge = EventBridge::new(Arc::clone(doorbell));
                let producer = Arc::clone(&bridge);
                conn.update_hook(Some(
                    move |action: Action, database: &str, table: &str, row_id: i64| {
                        if let Some(kind) = ChangeKind::from_action(action) {
                            producer.send(RowChange {
                                kind,
                                database: database.to_owned(),
                                table: table.to_owned(),
                                row_id,
                            });
                        }
                    },
                ));
                self.update = Some(bridge);
            }
        }
        true
    }

    /// Uninstall and finish every bridge.
    pub(crate) fn remove_all(&mut self, conn: &mut Connection) {
        for kind in [HookKind::Trace, HookKind::Profile, HookKind::Update] {
            if self.is_active(kind) {
                self.remove(kind, conn);
            }
        }
    }

    fn remove(&mut self, kind: HookKind, conn: &mut Connection) {
        match kind {
            HookKind::Trace => {
                conn.trace(None);
                if let Some(bridge) = self.trace.take() {
                    bridge.finish();
                }
            }
            HookKind::Profile => {
                conn.profile(None);
                if let Some(bridge) = self.profile.take() {
                    bridge.finish();
                }
            }
            HookKind::Update => {
                conn.update_hook(None::<fn(Action, &str, &str, i64)>);
                if let Some(bridge) = self.update.take() {
                    bridge.finish();
                }
            }
        }
    }
}

// rusqlite takes plain fn pointers for trace and profile, so the producers
// find their bridge through the thread that is running the engine call.
thread_local! {
    static ACTIVE_HOOKS: RefCell<ActiveHooks> = RefCell::new(ActiveHooks::default());
}

#[derive(Default)]
struct ActiveHooks {
    trace: Option<Arc<EventBridge<String>>>,
    profile: Option<Arc<EventBridge<ProfileInfo>>>,
}

/// Routes trace/profile producers on the current thread to the connection's
/// bridges for as long as the guard lives.
pub(crate) struct HookScope {
    previous: Option<ActiveHooks>,
}

impl HookScope {
    pub(crate) fn enter(hooks: &HookSet) -> Self {
        let active = ActiveHooks {
            trace: hooks.trace.clone(),
            profile: hooks.profile.clone(),
        };
        let previous = ACTIVE_HOOKS.with(|slot| slot.replace(active));
        Self {
            previous: Some(previous),
        }
    }
}

impl Drop for HookScope {
    fn drop(&mut self) {
        let previous = self.previous.take().unwrap_or_default();
        ACTIVE_HOOKS.with(|slot| {
            slot.replace(previous);
        });
    }
}

fn trace_producer(sql: &str) {
    ACTIVE_HOOKS.with(|slot| {
        if let Some(bridge) = &slot.borrow().trace {
            bridge.send(sql.to_owned());
        }
    });
}

fn profile_producer(sql: &str, elapsed: Duration) {
    ACTIVE_HOOKS.with(|slot| {
        if let Some(bridge) = &slot.borrow().profile {
            bridge.send(ProfileInfo {
                sql: sql.to_owned(),
                elapsed,
            });
        }
    });
}
