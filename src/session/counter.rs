//! Live session counting and RAII guard.

use std::sync::atomic::{AtomicU64, Ordering};

/// Number of sessions whose loop is running.
static ACTIVE_SESSIONS: AtomicU64 = AtomicU64::new(0);

/// Increments [`ACTIVE_SESSIONS`] on creation and decrements it on drop.
pub(super) struct ActiveSession;

impl ActiveSession {
    pub(super) fn new() -> Self {
        ACTIVE_SESSIONS.fetch_add(1, Ordering::Relaxed);
        crate::metrics::inc_sessions();
        Self
    }
}

impl Drop for ActiveSession {
    fn drop(&mut self) {
        ACTIVE_SESSIONS.fetch_sub(1, Ordering::Relaxed);
        crate::metrics::dec_sessions();
    }
}

/// Return the current number of running sessions.
#[must_use]
pub fn active_session_count() -> u64 { ACTIVE_SESSIONS.load(Ordering::Relaxed) }
