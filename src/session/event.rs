//! Events consumed by the session loop.

use bytes::Bytes;
use tokio::sync::oneshot;

use super::handle::SendError;
use crate::close::CloseCode;

/// Request to close a session with a status and reason.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CloseSignal {
    /// Status code for the close frame.
    pub code: CloseCode,
    /// Reason for the close frame.
    pub reason: String,
}

impl CloseSignal {
    /// Create a close request.
    #[must_use]
    pub fn new(code: CloseCode, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }
}

/// A frame queued for writing, with an optional write acknowledgement.
pub(crate) struct Outbound {
    pub(crate) frame: Bytes,
    pub(crate) ack: Option<oneshot::Sender<Result<(), SendError>>>,
}

/// Result of waiting on the session's sources.
///
/// `None` payloads mean the source's senders are all gone.
pub(super) enum Event {
    Close(Option<CloseSignal>),
    Inbound(Option<Bytes>),
    Outbound(Option<Outbound>),
    /// Every source is closed.
    Idle,
}
