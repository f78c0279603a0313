//! Reader task translating transport reads into session events.

use std::sync::Arc;

use bytes::Bytes;
use log::debug;
use tokio::sync::mpsc;

use super::{event::CloseSignal, state::Lifecycle};
use crate::{
    close::CloseCode,
    error::{ProtocolError, SessionError},
    transport::{FrameReader, InboundFrame},
};

/// Close reason sent when the peer uses a text frame.
pub(super) const NON_BINARY_REASON: &str = "Only binary frames allowed";

/// Senders the reader feeds the session loop through.
pub(super) struct ReaderChannels {
    pub(super) inbound: mpsc::Sender<Bytes>,
    pub(super) close: mpsc::Sender<CloseSignal>,
}

/// Read frames until the session closes or the transport fails.
///
/// Returning drops the inbound sender, which tells the loop the transport is
/// gone.
pub(super) async fn run_reader<R: FrameReader>(
    mut reader: R,
    channels: ReaderChannels,
    lifecycle: Arc<Lifecycle>,
) -> Result<(), SessionError> {
    let token = lifecycle.token();
    loop {
        let read = tokio::select! {
            biased;

            () = token.cancelled() => return Ok(()),
            read = reader.read_frame() => read,
        };
        if lifecycle.is_closed() {
            return Ok(());
        }

        match read? {
            InboundFrame::Binary(frame) => {
                let sent = tokio::select! {
                    biased;

                    () = token.cancelled() => return Ok(()),
                    sent = channels.inbound.send(frame) => sent,
                };
                if sent.is_err() {
                    // The loop has stopped listening.
                    return Ok(());
                }
            }
            InboundFrame::Text(text) => {
                debug!("non-binary frame received: len={}", text.len());
                let signal = CloseSignal::new(CloseCode::UNSUPPORTED_DATA, NON_BINARY_REASON);
                tokio::select! {
                    biased;

                    () = token.cancelled() => {}
                    _ = channels.close.send(signal) => {}
                }
                return Err(ProtocolError::NonBinaryFrame.into());
            }
        }
    }
}
