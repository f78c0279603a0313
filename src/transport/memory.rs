//! In-memory transport driven by a scripted [`Peer`].
//!
//! Useful for exercising sessions without sockets: the peer injects frames
//! and read failures, observes everything the session writes, and can make
//! writes fail or stall.

use std::{
    future,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use super::{FrameReader, FrameWriter, InboundFrame};
use crate::{close::CloseCode, error::TransportError};

/// Something the session wrote to the transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Written {
    /// A binary frame.
    Binary(Bytes),
    /// A close control frame.
    Close {
        /// Status code of the close frame.
        code: CloseCode,
        /// Reason carried by the close frame.
        reason: String,
    },
    /// The transport was released.
    Shutdown,
}

#[derive(Default)]
struct Faults {
    fail_writes: AtomicBool,
    stall_writes: AtomicBool,
}

/// Read half handed to the session.
pub struct MemoryReader {
    rx: mpsc::UnboundedReceiver<Result<InboundFrame, TransportError>>,
}

/// Write half handed to the session.
pub struct MemoryWriter {
    tx: mpsc::UnboundedSender<Written>,
    faults: Arc<Faults>,
    released: bool,
}

/// The remote end of an in-memory transport.
pub struct Peer {
    to_session: Option<mpsc::UnboundedSender<Result<InboundFrame, TransportError>>>,
    from_session: mpsc::UnboundedReceiver<Written>,
    faults: Arc<Faults>,
}

/// Create a connected transport and the peer that drives it.
#[must_use]
pub fn pair() -> (MemoryReader, MemoryWriter, Peer) {
    let (to_session, rx) = mpsc::unbounded_channel();
    let (tx, from_session) = mpsc::unbounded_channel();
    let faults = Arc::new(Faults::default());
    (
        MemoryReader { rx },
        MemoryWriter {
            tx,
            faults: Arc::clone(&faults),
            released: false,
        },
        Peer {
            to_session: Some(to_session),
            from_session,
            faults,
        },
    )
}

impl Peer {
    fn inject(&self, item: Result<InboundFrame, TransportError>) {
        if let Some(tx) = &self.to_session {
            // The session may already have dropped its reader.
            let _ = tx.send(item);
        }
    }

    /// Send a binary frame to the session.
    pub fn send_binary(&self, payload: impl Into<Bytes>) {
        self.inject(Ok(InboundFrame::Binary(payload.into())));
    }

    /// Send a text frame to the session.
    pub fn send_text(&self, text: &str) { self.inject(Ok(InboundFrame::Text(text.to_owned()))); }

    /// Make the session's next read fail with `error`.
    pub fn fail_read(&self, error: TransportError) { self.inject(Err(error)); }

    /// Drop the connection; pending frames are still delivered first.
    pub fn disconnect(&mut self) { self.to_session = None; }

    /// Make subsequent writes fail (`true`) or succeed again (`false`).
    pub fn fail_writes(&self, fail: bool) { self.faults.fail_writes.store(fail, Ordering::SeqCst); }

    /// Make subsequent writes hang forever.
    pub fn stall_writes(&self) { self.faults.stall_writes.store(true, Ordering::SeqCst); }

    /// Wait for the next thing the session writes.
    ///
    /// Returns `None` once the session dropped its writer and everything
    /// written has been observed.
    pub async fn next_written(&mut self) -> Option<Written> { self.from_session.recv().await }

    /// Collect everything written so far without waiting.
    pub fn drain_written(&mut self) -> Vec<Written> {
        let mut written = Vec::new();
        while let Ok(item) = self.from_session.try_recv() {
            written.push(item);
        }
        written
    }
}

#[async_trait]
impl FrameReader for MemoryReader {
    async fn read_frame(&mut self) -> Result<InboundFrame, TransportError> {
        self.rx.recv().await.unwrap_or(Err(TransportError::Disconnected))
    }
}

impl MemoryWriter {
    async fn write(&mut self, item: Written) -> Result<(), TransportError> {
        if self.released {
            return Err(TransportError::Disconnected);
        }
        if self.faults.stall_writes.load(Ordering::SeqCst) {
            future::pending::<()>().await;
        }
        if self.faults.fail_writes.load(Ordering::SeqCst) {
            return Err(TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "injected write failure",
            )));
        }
        self.tx.send(item).map_err(|_| TransportError::Disconnected)
    }
}

#[async_trait]
impl FrameWriter for MemoryWriter {
    async fn write_binary(&mut self, payload: Bytes) -> Result<(), TransportError> {
        self.write(Written::Binary(payload)).await
    }

    async fn write_close(&mut self, code: CloseCode, reason: &str) -> Result<(), TransportError> {
        self.write(Written::Close {
            code,
            reason: reason.to_owned(),
        })
        .await
    }

    async fn shutdown(&mut self) -> Result<(), TransportError> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        self.tx
            .send(Written::Shutdown)
            .map_err(|_| TransportError::Disconnected)
    }
}
