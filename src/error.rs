//! Error types for sessions and their transports.
//!
//! Transport failures, protocol violations, bans and application failures are
//! kept apart so the session can decide which ones end the connection.

use std::{io, time::Duration};

use bytes::Bytes;
use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Failure at the byte-stream level. Always fatal to the session.
#[derive(Debug, Error)]
pub enum TransportError {
    /// An I/O error from the underlying socket.
    #[error("transport I/O error: {0}")]
    Io(#[from] io::Error),
    /// An error reported by the WebSocket layer.
    #[error("websocket error: {0}")]
    WebSocket(#[source] Box<tungstenite::Error>),
    /// The peer sent a close frame.
    #[error("peer closed the connection (code {code:?}): {reason}")]
    PeerClosed {
        /// Status code from the peer's close frame, if it carried one.
        code: Option<u16>,
        /// Reason from the peer's close frame.
        reason: String,
    },
    /// The connection ended without a close frame or was already released.
    #[error("connection dropped")]
    Disconnected,
    /// A time-bounded write did not finish in time.
    #[error("write timed out after {0:?}")]
    Timeout(Duration),
}

impl From<tungstenite::Error> for TransportError {
    fn from(error: tungstenite::Error) -> Self {
        match error {
            tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
                Self::Disconnected
            }
            tungstenite::Error::Io(error) => Self::Io(error),
            other => Self::WebSocket(Box::new(other)),
        }
    }
}

/// Inbound data that breaks the framing or sequencing contract.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The frame had no payload after the type tag.
    #[error("invalid message: {frame:?}")]
    TooShort {
        /// The offending frame.
        frame: Bytes,
    },
    /// An application message arrived before synchronisation.
    #[error("invalid message: {frame:?}")]
    NotSynced {
        /// The offending frame.
        frame: Bytes,
    },
    /// The type tag is not a known message type.
    #[error("invalid message: {frame:?}")]
    UnknownType {
        /// The offending frame.
        frame: Bytes,
    },
    /// The peer sent a text frame.
    #[error("client sent a non-binary frame")]
    NonBinaryFrame,
}

/// Terminal outcome of a session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The transport failed.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// The peer violated the protocol and was disconnected.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    /// The peer's identity is banned.
    #[error("client is banned")]
    Banned,
    /// Too many consecutive application messages failed.
    #[error("closed after {0} consecutive rejected messages")]
    TooManyApplicationErrors(u32),
    /// The close frame could not be written. The session is closed regardless.
    #[error("{reason}: failed to send close frame: {source}")]
    CloseFailed {
        /// Reason the session was being closed for.
        reason: String,
        /// Why the close frame write failed.
        #[source]
        source: TransportError,
    },
}

impl SessionError {
    /// Returns true if the session ended because the peer closed it.
    #[must_use]
    pub fn is_peer_close(&self) -> bool {
        matches!(
            self,
            Self::Transport(TransportError::PeerClosed { .. } | TransportError::Disconnected)
        )
    }
}
