//! Frame transports a session runs over.
//!
//! A transport is an already-upgraded connection split into a read half and
//! a write half so the reader task and the session loop can own one each.

pub mod memory;
pub mod websocket;

use async_trait::async_trait;
use bytes::Bytes;

use crate::{close::CloseCode, error::TransportError};

/// A data frame delivered by the transport.
///
/// Control frames (ping, pong) are handled by the transport itself and close
/// frames surface as [`TransportError::PeerClosed`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InboundFrame {
    /// A binary frame, the only kind sessions accept.
    Binary(Bytes),
    /// A text frame.
    Text(String),
}

/// Read half of a transport.
#[async_trait]
pub trait FrameReader: Send + 'static {
    /// Wait for the next data frame.
    ///
    /// Implementations must be cancellation safe: dropping the returned
    /// future must not lose a frame.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] if the connection failed or was closed.
    async fn read_frame(&mut self) -> Result<InboundFrame, TransportError>;
}

/// Write half of a transport.
#[async_trait]
pub trait FrameWriter: Send + 'static {
    /// Write `payload` as one binary frame.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] if the frame could not be written.
    async fn write_binary(&mut self, payload: Bytes) -> Result<(), TransportError>;

    /// Write a close control frame. Callers bound this with a deadline.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] if the frame could not be written.
    async fn write_close(&mut self, code: CloseCode, reason: &str) -> Result<(), TransportError>;

    /// Flush and release the connection. Further writes fail.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] if flushing or closing the socket failed.
    async fn shutdown(&mut self) -> Result<(), TransportError>;
}
