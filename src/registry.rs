//! Registry of live session handles.
//!
//! `SessionRegistry` stores non-owning weak references to session handles,
//! letting administrative tasks push frames to, ban, or close live sessions
//! without keeping finished ones alive. Dead entries can be pruned
//! opportunistically or lazily at lookup time.

use std::{net::IpAddr, sync::Weak};

use bytes::Bytes;
use dashmap::DashMap;
use tracing::{debug, info};

use crate::{
    close::CloseCode,
    session::{HandleInner, SessionHandle, SessionId},
};

/// Concurrent registry of session handles keyed by [`SessionId`].
#[derive(Default)]
pub struct SessionRegistry(DashMap<SessionId, Weak<HandleInner>>);

impl SessionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Retrieve the handle for `id` if the session is still alive.
    #[must_use]
    pub fn get(&self, id: &SessionId) -> Option<SessionHandle> {
        let guard = self.0.get(id);
        let handle = guard.as_ref().and_then(|weak| weak.upgrade());
        drop(guard);
        if handle.is_none() {
            self.0.remove_if(id, |_, weak| weak.strong_count() == 0);
        }
        handle.map(SessionHandle::from_arc)
    }

    /// Insert the handle of a newly started session.
    pub fn insert(&self, handle: &SessionHandle) {
        self.0.insert(handle.id().clone(), handle.downgrade());
    }

    /// Remove a handle, typically on session teardown.
    pub fn remove(&self, id: &SessionId) { self.0.remove(id); }

    /// Remove all stale weak references without returning any handles.
    ///
    /// `DashMap::retain` acquires per-bucket write locks, so other operations
    /// may contend briefly while the registry is pruned.
    pub fn prune(&self) { self.0.retain(|_, weak| weak.strong_count() > 0); }

    /// Number of entries, including any not yet pruned.
    #[must_use]
    pub fn len(&self) -> usize { self.0.len() }

    /// Whether the registry has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.0.is_empty() }

    /// Prune stale weak references, then collect the remaining live handles.
    ///
    /// Sessions that have started closing are skipped but kept registered
    /// until their connection task removes them.
    #[must_use]
    pub fn active_handles(&self) -> Vec<SessionHandle> {
        let mut handles = Vec::with_capacity(self.0.len());
        self.0.retain(|_, weak| {
            let Some(inner) = weak.upgrade() else {
                return false;
            };
            let handle = SessionHandle::from_arc(inner);
            if !handle.is_closed() {
                handles.push(handle);
            }
            true
        });
        handles
    }

    /// Prune stale weak references, then return the IDs of live sessions.
    #[must_use]
    pub fn active_ids(&self) -> Vec<SessionId> {
        self.active_handles()
            .into_iter()
            .map(|handle| handle.id().clone())
            .collect()
    }

    /// Close every live session from `ip` as banned.
    ///
    /// Returns how many sessions were asked to close.
    pub fn ban(&self, ip: IpAddr) -> usize {
        let closed = self
            .active_handles()
            .into_iter()
            .filter(|handle| handle.ip() == ip)
            .filter(|handle| {
                handle.request_close(CloseCode::POLICY_VIOLATION, crate::session::BANNED_REASON)
            })
            .count();
        info!(%ip, closed, "banned address disconnected");
        closed
    }

    /// Ask every live session to close with `code` and `reason`.
    ///
    /// Returns how many sessions were asked to close.
    pub fn close_all(&self, code: CloseCode, reason: &str) -> usize {
        let closed = self
            .active_handles()
            .into_iter()
            .filter(|handle| handle.request_close(code, reason))
            .count();
        debug!(%code, reason, closed, "closing all sessions");
        closed
    }

    /// Queue `frame` on every live session.
    ///
    /// Returns how many sessions accepted it; sessions with a full outbound
    /// queue are skipped.
    pub fn broadcast(&self, frame: &Bytes) -> usize {
        self.active_handles()
            .into_iter()
            .filter(|handle| handle.push(frame.clone()).is_ok())
            .count()
    }
}
