//! Close handshake and transport release.

use std::sync::Arc;

use log::{debug, warn};
use tokio::time;

use super::Session;
use crate::{
    close::{CloseCode, CloseRecord},
    error::{SessionError, TransportError},
    handler::MessageHandler,
    metrics::{self, ErrorKind},
    transport::{FrameReader, FrameWriter},
};

/// Reason recorded when the connection drops without a close frame.
const TRANSPORT_LOST_REASON: &str = "connection lost";

/// Reason recorded when a session is dropped before it closed, such as when
/// a handler panics or the `run` future is cancelled.
pub(super) const ABORTED_REASON: &str = "session aborted";

impl<R, W, H> Session<R, W, H>
where
    R: FrameReader,
    W: FrameWriter,
    H: MessageHandler,
{
    /// Close the session with `code` and `reason`.
    ///
    /// Only the first close writes a frame; later calls return `Ok(())`. The
    /// session ends up closed and its transport released even when the close
    /// frame cannot be written.
    pub(super) async fn close(&mut self, code: CloseCode, reason: &str) -> Result<(), SessionError> {
        let record = CloseRecord::new(code, reason);
        let lifecycle = Arc::clone(self.handle.lifecycle());
        if !lifecycle.begin_close(record.clone()) {
            return Ok(());
        }

        let written = if code.is_sendable() {
            self.write_close(&record).await
        } else {
            Ok(())
        };
        lifecycle.finish_close();
        metrics::inc_closes(code);
        self.release_transport().await;

        written.map_err(|source| {
            metrics::inc_errors(ErrorKind::Close);
            SessionError::CloseFailed {
                reason: record.reason,
                source,
            }
        })
    }

    async fn write_close(&mut self, record: &CloseRecord) -> Result<(), TransportError> {
        let deadline = self.config.close_timeout;
        let writer = self.writer.as_mut().ok_or(TransportError::Disconnected)?;
        time::timeout(deadline, writer.write_close(record.code, &record.reason))
            .await
            .map_err(|_| TransportError::Timeout(deadline))?
    }

    /// Drop the writer after shutting it down. Safe to call repeatedly.
    pub(super) async fn release_transport(&mut self) {
        let Some(mut writer) = self.writer.take() else {
            return;
        };
        if let Err(error) = writer.shutdown().await {
            debug!(
                "transport shutdown failed: id={}, error={error}",
                self.handle.id()
            );
        }
    }

    /// Stop accepting events, close if nothing did, and release the transport.
    pub(super) async fn teardown(&mut self) {
        self.close_rx = None;
        self.inbound_rx = None;
        self.outbound_rx = None;

        let lifecycle = Arc::clone(self.handle.lifecycle());
        if lifecycle.begin_close(CloseRecord::new(CloseCode::ABNORMAL, TRANSPORT_LOST_REASON)) {
            lifecycle.finish_close();
            metrics::inc_closes(CloseCode::ABNORMAL);
        }
        self.release_transport().await;
    }
}

/// Claims the close and stops the reader if the session never got to close
/// on its own. The writer and reader halves are dropped with the session and
/// reader task, releasing the connection.
impl<R, W, H> Drop for Session<R, W, H> {
    fn drop(&mut self) {
        let lifecycle = self.handle.lifecycle();
        if lifecycle.begin_close(CloseRecord::new(CloseCode::ABNORMAL, ABORTED_REASON)) {
            metrics::inc_closes(CloseCode::ABNORMAL);
            warn!("session dropped while open: id={}", self.handle.id());
        }
        lifecycle.finish_close();
    }
}
