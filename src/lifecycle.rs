use serde::Serialize;

/// Where the connection handle is in its life.
///
/// A connection starts `Opening` as soon as it is constructed. `Closed` and
/// `CloseFailed` are terminal: every request submitted afterwards fails with
/// [`SchedulerDbError::ResourceClosed`](crate::SchedulerDbError::ResourceClosed).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Opening,
    Open,
    Closing,
    Closed,
    /// The close call failed; the handle was kept but is never used again.
    CloseFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LifecycleEvent {
    OpenSucceeded,
    OpenFailed,
    CloseDispatched,
    CloseSucceeded,
    CloseFailed,
}

impl ConnectionState {
    #[must_use]
    pub fn is_open(self) -> bool {
        matches!(self, ConnectionState::Open)
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionState::Closed | ConnectionState::CloseFailed)
    }

    /// Next state for `event`, or `None` when the event is not valid here.
    pub(crate) fn next(self, event: LifecycleEvent) -> Option<ConnectionState> {
        use ConnectionState as S;
        use LifecycleEvent as E;

        match (self, event) {
            (S::Opening, E::OpenSucceeded) => Some(S::Open),
            (S::Opening, E::OpenFailed) => Some(S::Closed),
            (S::Open, E::CloseDispatched) => Some(S::Closing),
            (S::Closing, E::CloseSucceeded) => Some(S::Closed),
            (S::Closing, E::CloseFailed) => Some(S::CloseFailed),
            _ => None,
        }
    }
}
