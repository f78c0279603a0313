//! Session lifecycle state shared between the loop, the reader and handles.

use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::task;
use tokio_util::sync::CancellationToken;

use crate::close::CloseRecord;

/// Observable phase of a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// Created but the coordinating loop has not started.
    Connecting,
    /// Running; only the synchronisation message is accepted.
    AwaitingSync,
    /// Running and synchronised.
    Synced,
    /// A close frame is being written.
    Closing,
    /// Terminal.
    Closed,
}

impl SessionState {
    /// Whether the session has started closing.
    #[must_use]
    pub const fn is_closed(self) -> bool { matches!(self, Self::Closing | Self::Closed) }
}

struct Inner {
    state: SessionState,
    close: Option<CloseRecord>,
    loop_task: Option<task::Id>,
}

/// Lock-guarded phase plus the token that stops the reader.
pub(crate) struct Lifecycle {
    inner: Mutex<Inner>,
    cancel: CancellationToken,
}

impl Lifecycle {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: SessionState::Connecting,
                close: None,
                loop_task: None,
            }),
            cancel: CancellationToken::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> { self.inner.lock().unwrap_or_else(PoisonError::into_inner) }

    pub(crate) fn state(&self) -> SessionState { self.lock().state }

    pub(crate) fn is_closed(&self) -> bool { self.state().is_closed() }

    pub(crate) fn close_record(&self) -> Option<CloseRecord> { self.lock().close.clone() }

    pub(crate) fn token(&self) -> CancellationToken { self.cancel.clone() }

    /// `Connecting` → `AwaitingSync`, remembering the task running the loop.
    pub(crate) fn start(&self) {
        let mut inner = self.lock();
        if inner.state == SessionState::Connecting {
            inner.state = SessionState::AwaitingSync;
            inner.loop_task = task::try_id();
        }
    }

    /// Whether the caller is running on the session loop's own task.
    pub(crate) fn on_loop_task(&self) -> bool {
        task::try_id().is_some_and(|current| self.lock().loop_task == Some(current))
    }

    /// `AwaitingSync` → `Synced`.
    pub(crate) fn mark_synced(&self) {
        let mut inner = self.lock();
        if inner.state == SessionState::AwaitingSync {
            inner.state = SessionState::Synced;
        }
    }

    /// Claim the close. Returns `false` if another close got there first.
    pub(crate) fn begin_close(&self, record: CloseRecord) -> bool {
        let mut inner = self.lock();
        if inner.state.is_closed() {
            return false;
        }
        inner.state = SessionState::Closing;
        inner.close = Some(record);
        true
    }

    /// Enter the terminal state and stop the reader.
    pub(crate) fn finish_close(&self) {
        self.lock().state = SessionState::Closed;
        self.cancel.cancel();
    }
}
