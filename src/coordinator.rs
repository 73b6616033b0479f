//! The single task that owns scheduling state.
//!
//! Every change to the queue, the `locked`/`pending` counters, the lifecycle
//! state and the event stream happens here, one message at a time. Blocking
//! bodies run on tokio's blocking pool and report back through the same
//! mailbox.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use crate::bridge::{Deliver, Doorbell};
use crate::config::DatabaseOptions;
use crate::engine::{EngineSlot, run_job};
use crate::error::SchedulerDbError;
use crate::events::{DatabaseEvent, EventSink};
use crate::lifecycle::{ConnectionState, LifecycleEvent};
use crate::request::{BoxedResponse, Completion, Request, RequestKind, Work, invoke};
use crate::scheduler::{Admission, Drain, Queued, Scheduler};

const DATABASE_CLOSED: &str = "Database is closed";
const HANDLE_CLOSED: &str = "Database handle is closed";

pub(crate) enum Message {
    Submit(Request),
    SetSerialize(bool),
    Completed(Completed),
    Deliver(Arc<dyn Deliver>),
    /// The last handle went away; stop once outstanding work is done.
    Shutdown,
}

pub(crate) struct Completed {
    kind: RequestKind,
    exclusive: bool,
    outcome: BoxedResponse,
    completion: Completion,
}

/// Channels a `Database` handle keeps to talk to its coordinator.
pub(crate) struct CoordinatorHandle {
    pub(crate) mailbox: mpsc::UnboundedSender<Message>,
    pub(crate) state: watch::Receiver<ConnectionState>,
    pub(crate) events: Arc<Mutex<EventSink>>,
}

pub(crate) struct Coordinator {
    scheduler: Scheduler<Request>,
    slot: Arc<Mutex<EngineSlot>>,
    runtime: Handle,
    mailbox: mpsc::UnboundedSender<Message>,
    inbox: mpsc::UnboundedReceiver<Message>,
    events: Arc<Mutex<EventSink>>,
    state: watch::Sender<ConnectionState>,
    in_flight: usize,
    shutting_down: bool,
}

impl Coordinator {
    /// Spawn the coordinator on `runtime` and start opening the connection.
    ///
    /// The open runs as the sole exclusive request; anything submitted before
    /// it finishes waits in the queue.
    pub(crate) fn start(
        runtime: &Handle,
        options: DatabaseOptions,
        completion: Completion,
    ) -> CoordinatorHandle {
        let (mailbox, inbox) = mpsc::unbounded_channel();
        let events = Arc::new(Mutex::new(EventSink::default()));
        let (state_tx, state_rx) = watch::channel(ConnectionState::Opening);

        let doorbell_mailbox = mailbox.clone();
        let doorbell: Doorbell = Arc::new(move |bridge: Arc<dyn Deliver>| {
            let _ = doorbell_mailbox.send(Message::Deliver(bridge));
        });

        let coordinator = Coordinator {
            scheduler: Scheduler::new(),
            slot: Arc::new(Mutex::new(EngineSlot::new(doorbell))),
            runtime: runtime.clone(),
            mailbox: mailbox.clone(),
            inbox,
            events: Arc::clone(&events),
            state: state_tx,
            in_flight: 0,
            shutting_down: false,
        };

        debug!(path = %options.path, mode = ?options.mode, "opening database");
        let open = Request::engine(RequestKind::Open, true, move |slot| slot.open(&options))
            .completing(completion);
        runtime.spawn(coordinator.run(open));

        CoordinatorHandle {
            mailbox,
            state: state_rx,
            events,
        }
    }

    async fn run(mut self, open: Request) {
        self.dispatch(Queued {
            item: open,
            exclusive: true,
        });

        while let Some(message) = self.inbox.recv().await {
            match message {
                Message::Submit(request) => self.submit(request),
                Message::SetSerialize(serialize) => {
                    let previous = self.scheduler.set_serialize(serialize);
                    if previous != self.scheduler.is_serialized() {
                        debug!(serialize, "admission mode changed");
                    }
                    self.process();
                }
                Message::Completed(done) => self.complete(done),
                Message::Deliver(bridge) => {
                    for event in bridge.deliver() {
                        self.emit(event);
                    }
                }
                Message::Shutdown => self.shutting_down = true,
            }

            if self.shutting_down && self.is_idle() {
                break;
            }
        }
        let state = *self.state.borrow();
        debug!(?state, "database coordinator stopped");
    }

    fn is_idle(&self) -> bool {
        self.in_flight == 0 && self.scheduler.queued() == 0
    }

    fn submit(&mut self, request: Request) {
        let exclusive = request.exclusive;
        match self.scheduler.submit(request, exclusive) {
            Admission::Dispatch(queued) => self.dispatch(queued),
            Admission::Queued => {
                debug!(
                    queued = self.scheduler.queued(),
                    open = self.scheduler.is_open(),
                    locked = self.scheduler.is_locked(),
                    pending = self.scheduler.pending(),
                    "request queued"
                );
            }
            Admission::Rejected(request) => self.reject(vec![request], DATABASE_CLOSED),
        }
        self.process();
    }

    fn process(&mut self) {
        match self.scheduler.drain() {
            Drain::Dispatch(ready) => {
                for queued in ready {
                    self.dispatch(queued);
                }
            }
            Drain::Reject(stranded) => self.reject(stranded, HANDLE_CLOSED),
        }
    }

    fn dispatch(&mut self, queued: Queued<Request>) {
        let Queued {
            item: request,
            exclusive,
        } = queued;
        let Request {
            kind,
            work,
            completion,
            ..
        } = request;

        if kind == RequestKind::Close {
            self.transition(LifecycleEvent::CloseDispatched);
        }
        self.in_flight += 1;
        debug!(?kind, exclusive, pending = self.scheduler.pending(), "dispatching request");

        match work {
            Work::Inline => {
                let _ = self.mailbox.send(Message::Completed(Completed {
                    kind,
                    exclusive,
                    outcome: Ok(Box::new(())),
                    completion,
                }));
            }
            Work::Blocking(job) => {
                let slot = Arc::clone(&self.slot);
                let mailbox = self.mailbox.clone();
                self.runtime.spawn_blocking(move || {
                    let outcome = run_job(&slot, job);
                    let _ = mailbox.send(Message::Completed(Completed {
                        kind,
                        exclusive,
                        outcome,
                        completion,
                    }));
                });
            }
        }
    }

    fn complete(&mut self, done: Completed) {
        let Completed {
            kind,
            exclusive,
            outcome,
            completion,
        } = done;
        self.in_flight = self.in_flight.saturating_sub(1);
        debug!(?kind, exclusive, ok = outcome.is_ok(), "request completed");

        match kind {
            RequestKind::Open => self.finish_open(outcome, completion),
            RequestKind::Close => self.finish_close(outcome, completion),
            _ => {
                self.scheduler.complete(exclusive);
                self.resolve(completion, outcome);
            }
        }
        self.process();
    }

    fn finish_open(&mut self, outcome: BoxedResponse, completion: Completion) {
        if outcome.is_ok() {
            self.scheduler.mark_open();
            self.transition(LifecycleEvent::OpenSucceeded);
            self.emit(DatabaseEvent::Open);
            self.resolve(completion, outcome);
        } else {
            self.scheduler.mark_terminal();
            self.transition(LifecycleEvent::OpenFailed);
            self.resolve(completion, outcome);
        }
    }

    // A failed close keeps the lock and the handle: the connection is
    // terminal in `CloseFailed` and everything queued behind it is failed.
    // Either way the close notification carries the status.
    fn finish_close(&mut self, outcome: BoxedResponse, completion: Completion) {
        match &outcome {
            Ok(_) => {
                self.scheduler.mark_closed();
                self.transition(LifecycleEvent::CloseSucceeded);
                self.emit(DatabaseEvent::Close(None));
            }
            Err(err) => {
                self.scheduler.mark_terminal();
                self.transition(LifecycleEvent::CloseFailed);
                self.emit(DatabaseEvent::Close(Some(err.clone())));
            }
        }
        self.resolve(completion, outcome);
    }

    fn resolve(&self, completion: Completion, outcome: BoxedResponse) {
        if let Some(event) = completion.resolve(outcome) {
            self.emit(event);
        }
    }

    /// Fail `requests` with `ResourceClosed`. When none of them had a
    /// callback a single `Error` event stands in for all of them.
    fn reject(&self, requests: Vec<Request>, message: &str) {
        if requests.is_empty() {
            return;
        }
        warn!(count = requests.len(), reason = message, "rejecting requests on closed database");

        let mut called = false;
        for request in requests {
            if let Completion::Callback(callback) = request.completion {
                invoke(callback, Err(SchedulerDbError::closed(message)));
                called = true;
            }
        }
        if !called {
            self.emit(DatabaseEvent::Error(SchedulerDbError::closed(message)));
        }
    }

    fn transition(&self, event: LifecycleEvent) {
        let current = *self.state.borrow();
        match current.next(event) {
            Some(next) => {
                debug!(?current, ?next, "connection state changed");
                self.state.send_replace(next);
            }
            None => warn!(?current, ?event, "ignoring invalid lifecycle transition"),
        }
    }

    fn emit(&self, event: DatabaseEvent) {
        debug!(event = event.name(), "emitting database event");
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .send(event);
    }
}
