use std::collections::VecDeque;

/// A request waiting in (or leaving) the scheduler queue, tagged with the
/// exclusivity it was admitted with.
#[derive(Debug)]
pub(crate) struct Queued<T> {
    pub(crate) item: T,
    pub(crate) exclusive: bool,
}

/// Outcome of admitting a request.
#[derive(Debug)]
pub(crate) enum Admission<T> {
    /// Run it now; the scheduler already accounted for it.
    Dispatch(Queued<T>),
    Queued,
    /// The connection reached its terminal state.
    Rejected(T),
}

/// Outcome of re-evaluating the queue.
#[derive(Debug)]
pub(crate) enum Drain<T> {
    /// Requests to hand to the worker pool, in order. May be empty.
    Dispatch(Vec<Queued<T>>),
    /// Every request that was still queued on a terminal connection.
    Reject(Vec<T>),
}

/// FIFO admission and dispatch policy for a single connection.
///
/// The scheduler never runs anything itself: it only decides which requests
/// may leave the queue and keeps the `locked`/`pending` accounting that
/// enforces mutual exclusion between exclusive and concurrent work.
#[derive(Debug)]
pub(crate) struct Scheduler<T> {
    queue: VecDeque<Queued<T>>,
    open: bool,
    locked: bool,
    pending: usize,
    serialize: bool,
}

impl<T> Default for Scheduler<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Scheduler<T> {
    pub(crate) fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            open: false,
            locked: false,
            pending: 0,
            serialize: false,
        }
    }

    pub(crate) fn is_open(&self) -> bool {
        self.open
    }

    pub(crate) fn is_locked(&self) -> bool {
        self.locked
    }

    pub(crate) fn pending(&self) -> usize {
        self.pending
    }

    pub(crate) fn queued(&self) -> usize {
        self.queue.len()
    }

    pub(crate) fn is_serialized(&self) -> bool {
        self.serialize
    }

    /// Closed with the lock still held: nothing may ever run again.
    pub(crate) fn is_terminal(&self) -> bool {
        !self.open && self.locked
    }

    /// Set the admission policy, returning the previous value.
    pub(crate) fn set_serialize(&mut self, serialize: bool) -> bool {
        std::mem::replace(&mut self.serialize, serialize)
    }

    pub(crate) fn mark_open(&mut self) {
        self.open = true;
    }

    /// Close succeeded. The close request's lock is intentionally kept so the
    /// connection reads as terminal.
    pub(crate) fn mark_closed(&mut self) {
        self.open = false;
    }

    /// Open or close failed; force the terminal state.
    pub(crate) fn mark_terminal(&mut self) {
        self.open = false;
        self.locked = true;
    }

    pub(crate) fn submit(&mut self, item: T, exclusive: bool) -> Admission<T> {
        if self.is_terminal() {
            return Admission::Rejected(item);
        }

        let exclusive = exclusive || self.serialize;
        let must_wait = !self.open
            || self.locked
            || !self.queue.is_empty()
            || (exclusive && self.pending > 0);

        if must_wait {
            self.queue.push_back(Queued { item, exclusive });
            return Admission::Queued;
        }

        self.account_dispatch(exclusive);
        Admission::Dispatch(Queued { item, exclusive })
    }

    /// Record that a dispatched request finished.
    pub(crate) fn complete(&mut self, exclusive: bool) {
        if exclusive {
            self.locked = false;
        } else {
            self.pending = self.pending.saturating_sub(1);
        }
    }

    pub(crate) fn drain(&mut self) -> Drain<T> {
        if self.is_terminal() {
            let stranded = self.queue.drain(..).map(|queued| queued.item).collect();
            return Drain::Reject(stranded);
        }

        let mut ready = Vec::new();
        while self.open && !self.locked {
            let Some(head) = self.queue.front() else {
                break;
            };
            if head.exclusive && self.pending > 0 {
                break;
            }
            let Some(head) = self.queue.pop_front() else {
                break;
            };
            self.account_dispatch(head.exclusive);
            let exclusive = head.exclusive;
            ready.push(head);
            if exclusive {
                break;
            }
        }
        Drain::Dispatch(ready)
    }

    fn account_dispatch(&mut self, exclusive: bool) {
        if exclusive {
            self.locked = true;
        } else {
            self.pending += 1;
        }
    }
}
