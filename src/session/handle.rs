//! Cloneable handle used by other tasks to reach a running session.
//!
//! Handles only enqueue events; the session loop performs every effect.

use std::{
    fmt,
    net::IpAddr,
    sync::{Arc, Weak},
};

use bytes::Bytes;
use rand::{Rng, distributions::Alphanumeric};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use super::{
    event::{CloseSignal, Outbound},
    state::{Lifecycle, SessionState},
};
use crate::close::{CloseCode, CloseRecord};

/// Length of generated session identifiers.
pub const SESSION_ID_LEN: usize = 32;

/// Random token identifying a session for external correlation.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    /// Generate a random alphanumeric identifier.
    #[must_use]
    pub fn random() -> Self {
        let id = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(SESSION_ID_LEN)
            .map(char::from)
            .collect();
        Self(id)
    }

    /// Borrow the identifier as a string.
    #[must_use]
    pub fn as_str(&self) -> &str { &self.0 }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self { Self(value) }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

/// Errors returned when handing a frame to a session.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SendError {
    /// The session closed before the frame was written.
    #[error("session is closed")]
    Closed,
    /// The outbound queue is full.
    #[error("session outbound queue is full")]
    QueueFull,
    /// The transport rejected the frame; the session is ending.
    #[error("failed to write frame: {0}")]
    Write(String),
    /// Awaited from the session's own loop, which cannot write until the
    /// caller returns.
    #[error("send awaited from the session's own handler")]
    Reentrant,
}

pub(crate) struct HandleInner {
    id: SessionId,
    ip: IpAddr,
    outbound: mpsc::Sender<Outbound>,
    close: mpsc::Sender<CloseSignal>,
    lifecycle: Arc<Lifecycle>,
}

/// Handle to a session, cheap to clone.
#[derive(Clone)]
pub struct SessionHandle(Arc<HandleInner>);

impl SessionHandle {
    pub(crate) fn new(
        id: SessionId,
        ip: IpAddr,
        outbound: mpsc::Sender<Outbound>,
        close: mpsc::Sender<CloseSignal>,
        lifecycle: Arc<Lifecycle>,
    ) -> Self {
        Self(Arc::new(HandleInner {
            id,
            ip,
            outbound,
            close,
            lifecycle,
        }))
    }

    pub(crate) fn from_arc(inner: Arc<HandleInner>) -> Self { Self(inner) }

    pub(crate) fn downgrade(&self) -> Weak<HandleInner> { Arc::downgrade(&self.0) }

    pub(crate) fn lifecycle(&self) -> &Arc<Lifecycle> { &self.0.lifecycle }

    /// Identifier of the session.
    #[must_use]
    pub fn id(&self) -> &SessionId { &self.0.id }

    /// Remote address of the session's peer.
    #[must_use]
    pub fn ip(&self) -> IpAddr { self.0.ip }

    /// Current lifecycle phase.
    #[must_use]
    pub fn state(&self) -> SessionState { self.0.lifecycle.state() }

    /// Whether the session has started closing.
    #[must_use]
    pub fn is_closed(&self) -> bool { self.0.lifecycle.is_closed() }

    /// Status and reason of the first close, once closed.
    #[must_use]
    pub fn close_record(&self) -> Option<CloseRecord> { self.0.lifecycle.close_record() }

    /// Send `frame` and wait until the session has written it.
    ///
    /// Handlers reply through
    /// [`SessionContext::reply`](crate::SessionContext::reply) instead.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::Closed`] if the session closes before writing
    /// the frame, [`SendError::Write`] if the write failed, or
    /// [`SendError::Reentrant`] when awaited from a
    /// [`MessageHandler`](crate::MessageHandler) of this same session.
    pub async fn send(&self, frame: impl Into<Bytes>) -> Result<(), SendError> {
        if self.is_closed() {
            return Err(SendError::Closed);
        }
        if self.0.lifecycle.on_loop_task() {
            return Err(SendError::Reentrant);
        }
        let (ack, written) = oneshot::channel();
        self.0
            .outbound
            .send(Outbound {
                frame: frame.into(),
                ack: Some(ack),
            })
            .await
            .map_err(|_| SendError::Closed)?;
        written.await.map_err(|_| SendError::Closed)?
    }

    /// Queue `frame` without waiting for it to be written.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::Closed`] if the session is closed, or
    /// [`SendError::QueueFull`] if the outbound queue has no room.
    pub fn push(&self, frame: impl Into<Bytes>) -> Result<(), SendError> {
        if self.is_closed() {
            return Err(SendError::Closed);
        }
        self.0
            .outbound
            .try_send(Outbound {
                frame: frame.into(),
                ack: None,
            })
            .map_err(|error| match error {
                mpsc::error::TrySendError::Full(_) => SendError::QueueFull,
                mpsc::error::TrySendError::Closed(_) => SendError::Closed,
            })
    }

    /// Ask the session to close with `code` and `reason`.
    ///
    /// Succeeds without effect if the session is already closed.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::Closed`] if the session loop is gone before the
    /// request could be queued.
    pub async fn close(&self, code: CloseCode, reason: impl Into<String>) -> Result<(), SendError> {
        if self.is_closed() {
            return Ok(());
        }
        self.0
            .close
            .send(CloseSignal::new(code, reason))
            .await
            .map_err(|_| SendError::Closed)
    }

    /// Request a close without waiting. Returns whether a request was queued.
    ///
    /// A full close queue already holds a pending close, so nothing is lost.
    pub fn request_close(&self, code: CloseCode, reason: impl Into<String>) -> bool {
        if self.is_closed() {
            return false;
        }
        let queued = self.0.close.try_send(CloseSignal::new(code, reason)).is_ok();
        debug!(session = %self.0.id, queued, "close requested");
        queued
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.0.id)
            .field("ip", &self.0.ip)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
