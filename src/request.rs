use std::any::Any;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::task::{Context, Poll};

use rusqlite::Connection;
use tokio::sync::oneshot;
use tracing::error;

use crate::engine::EngineSlot;
use crate::error::SchedulerDbError;
use crate::events::DatabaseEvent;

pub(crate) type BoxedResponse = Result<Box<dyn Any + Send>, SchedulerDbError>;
pub(crate) type Job = Box<dyn FnOnce(&mut EngineSlot) -> BoxedResponse + Send>;
pub(crate) type Callback = Box<dyn FnOnce(BoxedResponse) + Send>;

/// What a request does once dispatched.
pub(crate) enum Work {
    /// Blocking body run on the worker pool against the engine slot.
    Blocking(Job),
    /// Pure barrier: completes as soon as it is dispatched.
    Inline,
}

/// Where the outcome of a request goes; fixed when the request is built.
pub(crate) enum Completion {
    Callback(Callback),
    /// Nobody is waiting: failures become a generic `Error` event.
    Fallback,
}

impl Completion {
    pub(crate) fn typed<R, C>(callback: C) -> Self
    where
        R: Send + 'static,
        C: FnOnce(Result<R, SchedulerDbError>) + Send + 'static,
    {
        Completion::Callback(Box::new(move |outcome: BoxedResponse| {
            let typed = outcome.and_then(|payload| {
                payload.downcast::<R>().map(|boxed| *boxed).map_err(|_| {
                    SchedulerDbError::ExecutionError("request response downcast failure".into())
                })
            });
            callback(typed);
        }))
    }

    /// Hand `outcome` to its target. Returns the event to emit, if any.
    pub(crate) fn resolve(self, outcome: BoxedResponse) -> Option<DatabaseEvent> {
        match self {
            Completion::Callback(callback) => {
                invoke(callback, outcome);
                None
            }
            Completion::Fallback => outcome.err().map(DatabaseEvent::Error),
        }
    }

    pub(crate) fn has_callback(&self) -> bool {
        matches!(self, Completion::Callback(_))
    }
}

/// Run a caller callback, keeping a panic inside it away from the coordinator.
pub(crate) fn invoke(callback: Callback, outcome: BoxedResponse) {
    if panic::catch_unwind(AssertUnwindSafe(move || callback(outcome))).is_err() {
        error!("request callback panicked");
    }
}

/// Tag used for lifecycle bookkeeping and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Open,
    Close,
    Exec,
    Wait,
    LoadExtension,
    Configure,
    Statement,
    Custom,
}

/// A unit of work for the connection.
///
/// Exclusive requests run alone and act as barriers; non-exclusive requests
/// may overlap with each other.
pub struct Request {
    pub(crate) kind: RequestKind,
    pub(crate) exclusive: bool,
    pub(crate) work: Work,
    pub(crate) completion: Completion,
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("kind", &self.kind)
            .field("exclusive", &self.exclusive)
            .field("callback", &self.completion.has_callback())
            .finish()
    }
}

impl Request {
    /// Request running `func` against the connection. Failures are reported as
    /// [`DatabaseEvent::Error`].
    pub fn new<F, R>(exclusive: bool, func: F) -> Self
    where
        F: FnOnce(&mut Connection) -> Result<R, SchedulerDbError> + Send + 'static,
        R: Send + 'static,
    {
        Self::engine(RequestKind::Custom, exclusive, move |slot| {
            func(slot.connection()?)
        })
    }

    /// Like [`Request::new`], handing the outcome to `callback` on the
    /// coordinating task instead.
    pub fn with_callback<F, R, C>(exclusive: bool, func: F, callback: C) -> Self
    where
        F: FnOnce(&mut Connection) -> Result<R, SchedulerDbError> + Send + 'static,
        R: Send + 'static,
        C: FnOnce(Result<R, SchedulerDbError>) + Send + 'static,
    {
        Self::new(exclusive, func).completing(Completion::typed(callback))
    }

    #[must_use]
    pub fn is_exclusive(&self) -> bool {
        self.exclusive
    }

    #[must_use]
    pub fn kind(&self) -> RequestKind {
        self.kind
    }

    pub(crate) fn engine<F, R>(kind: RequestKind, exclusive: bool, func: F) -> Self
    where
        F: FnOnce(&mut EngineSlot) -> Result<R, SchedulerDbError> + Send + 'static,
        R: Send + 'static,
    {
        let job: Job =
            Box::new(move |slot| func(slot).map(|value| Box::new(value) as Box<dyn Any + Send>));
        Self {
            kind,
            exclusive,
            work: Work::Blocking(job),
            completion: Completion::Fallback,
        }
    }

    pub(crate) fn barrier() -> Self {
        Self {
            kind: RequestKind::Wait,
            exclusive: true,
            work: Work::Inline,
            completion: Completion::Fallback,
        }
    }

    pub(crate) fn completing(mut self, completion: Completion) -> Self {
        self.completion = completion;
        self
    }

    /// Route the outcome into a [`Reply`] future.
    pub(crate) fn replying<R>(self) -> (Self, Reply<R>)
    where
        R: Send + 'static,
    {
        let (respond_to, reply) = Reply::channel();
        let request = self.completing(Completion::typed(move |outcome: Result<R, SchedulerDbError>| {
            let _ = respond_to.send(outcome);
        }));
        (request, reply)
    }
}

/// Eventual outcome of a submitted request.
///
/// The request is already queued when a `Reply` exists; awaiting it is
/// optional and dropping it does not cancel anything.
#[must_use = "the request runs regardless; await the reply to observe its outcome"]
pub struct Reply<T> {
    receiver: oneshot::Receiver<Result<T, SchedulerDbError>>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> fmt::Debug for Reply<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reply").finish_non_exhaustive()
    }
}

impl<T> Reply<T> {
    pub(crate) fn channel() -> (oneshot::Sender<Result<T, SchedulerDbError>>, Self) {
        let (respond_to, receiver) = oneshot::channel();
        (
            respond_to,
            Self {
                receiver,
                _marker: PhantomData,
            },
        )
    }
}

impl<T> Future for Reply<T> {
    type Output = Result<T, SchedulerDbError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.receiver).poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(_)) => Poll::Ready(Err(SchedulerDbError::ConnectionError(
                "database coordinator dropped the request".into(),
            ))),
        }
    }
}
