//! Per-connection session engine.
//!
//! A [`Session`] owns every piece of mutable state for one connection and
//! drives it from a single loop. The loop polls three sources with a
//! `tokio::select!`: close requests, inbound frames from the reader task, and
//! outbound frames queued through [`SessionHandle`]s. The `biased` keyword
//! makes close requests win over inbound frames, and inbound frames over
//! outbound ones. One event is handled to completion before the next is
//! awaited, so handlers never observe concurrent changes to the session.

mod counter;
mod dispatch;
mod event;
mod handle;
mod reader;
mod shutdown;
mod state;
#[cfg(test)]
mod tests;

use std::sync::Arc;

use bytes::Bytes;
pub use counter::active_session_count;
use counter::ActiveSession;
pub(crate) use dispatch::BANNED_REASON;
pub use event::CloseSignal;
use event::{Event, Outbound};
pub(crate) use handle::HandleInner;
pub use handle::{SESSION_ID_LEN, SendError, SessionHandle, SessionId};
use log::{info, warn};
use reader::ReaderChannels;
pub use state::SessionState;
use state::Lifecycle;
use tokio::sync::mpsc;

use crate::{
    config::SessionConfig,
    error::{SessionError, TransportError},
    handler::MessageHandler,
    identity::Identity,
    metrics::{self, Direction},
    transport::{FrameReader, FrameWriter},
};

/// Pending close requests a session buffers.
const CLOSE_QUEUE_CAPACITY: usize = 4;

#[cfg(test)]
pub(crate) use event::Outbound as OutboundFrame;

/// A running handle with no session loop behind it, plus the loop's ends of
/// its queues.
#[cfg(test)]
pub(crate) fn test_handle(
    ip: std::net::IpAddr,
) -> (SessionHandle, mpsc::Receiver<Outbound>, mpsc::Receiver<CloseSignal>) {
    let (outbound_tx, outbound_rx) = mpsc::channel(8);
    let (close_tx, close_rx) = mpsc::channel(CLOSE_QUEUE_CAPACITY);
    let lifecycle = Arc::new(Lifecycle::new());
    lifecycle.start();
    let handle = SessionHandle::new(SessionId::random(), ip, outbound_tx, close_tx, lifecycle);
    (handle, outbound_rx, close_rx)
}

/// Why the loop stopped.
enum LoopExit {
    /// The loop ended on its own terms with this outcome.
    Finished(Result<(), SessionError>),
    /// The reader task stopped, taking the transport with it.
    TransportLost,
}

struct PendingReader<R> {
    reader: R,
    channels: ReaderChannels,
}

/// A live connection and its coordinating loop.
///
/// # Examples
///
/// ```no_run
/// use std::{net::Ipv4Addr, sync::Arc};
///
/// use boardsock::{
///     LoggingHandler,
///     Session,
///     config::SessionConfig,
///     identity::Identity,
///     transport::memory,
/// };
///
/// # async fn example() {
/// let (reader, writer, peer) = memory::pair();
/// let identity = Identity::new(Ipv4Addr::LOCALHOST.into());
/// let session = Session::new(
///     reader,
///     writer,
///     identity,
///     Arc::new(LoggingHandler),
///     SessionConfig::default(),
/// );
/// let handle = session.handle();
/// // The peer hanging up ends the session.
/// drop(peer);
/// let outcome = session.run().await;
/// assert!(handle.is_closed());
/// # drop(outcome);
/// # }
/// ```
pub struct Session<R, W, H> {
    handle: SessionHandle,
    identity: Identity,
    synced: bool,
    reader: Option<PendingReader<R>>,
    writer: Option<W>,
    handler: Arc<H>,
    config: SessionConfig,
    inbound_rx: Option<mpsc::Receiver<Bytes>>,
    outbound_rx: Option<mpsc::Receiver<Outbound>>,
    close_rx: Option<mpsc::Receiver<CloseSignal>>,
    app_errors: u32,
    counter: Option<ActiveSession>,
}

impl<R, W, H> Session<R, W, H>
where
    R: FrameReader,
    W: FrameWriter,
    H: MessageHandler,
{
    /// Create a session over an upgraded transport.
    ///
    /// `identity` is resolved by the caller and fixed for the session's
    /// lifetime. Nothing runs until [`run`](Self::run) is awaited.
    #[must_use]
    pub fn new(
        reader: R,
        writer: W,
        identity: Identity,
        handler: Arc<H>,
        config: SessionConfig,
    ) -> Self {
        let config = config.normalized();
        let (inbound_tx, inbound_rx) = mpsc::channel(config.inbound_capacity);
        let (outbound_tx, outbound_rx) = mpsc::channel(config.outbound_capacity);
        let (close_tx, close_rx) = mpsc::channel(CLOSE_QUEUE_CAPACITY);
        let handle = SessionHandle::new(
            SessionId::random(),
            identity.ip,
            outbound_tx,
            close_tx.clone(),
            Arc::new(Lifecycle::new()),
        );
        Self {
            handle,
            identity,
            synced: false,
            reader: Some(PendingReader {
                reader,
                channels: ReaderChannels {
                    inbound: inbound_tx,
                    close: close_tx,
                },
            }),
            writer: Some(writer),
            handler,
            config,
            inbound_rx: Some(inbound_rx),
            outbound_rx: Some(outbound_rx),
            close_rx: Some(close_rx),
            app_errors: 0,
            counter: None,
        }
    }

    /// A handle for reaching this session from other tasks.
    #[must_use]
    pub fn handle(&self) -> SessionHandle { self.handle.clone() }

    /// The session's identifier.
    #[must_use]
    pub fn id(&self) -> &SessionId { self.handle.id() }

    /// Run the session until it closes.
    ///
    /// Spawns the reader task, drives the coordinating loop, then makes sure
    /// the session is closed, the transport released and the reader stopped.
    ///
    /// # Errors
    ///
    /// Returns the first fatal error: the loop's if it had one, otherwise
    /// the reader's. A session closed on request returns `Ok(())`.
    pub async fn run(mut self) -> Result<(), SessionError> {
        let Some(PendingReader { reader, channels }) = self.reader.take() else {
            return Ok(());
        };
        let lifecycle = Arc::clone(self.handle.lifecycle());
        lifecycle.start();
        self.counter = Some(ActiveSession::new());
        info!(
            "session opened: id={}, peer={}, active_sessions={}",
            self.handle.id(),
            self.identity.ip,
            active_session_count()
        );

        let reader_task = tokio::spawn(reader::run_reader(reader, channels, lifecycle));
        let result = match self.event_loop().await {
            LoopExit::Finished(result) => result,
            LoopExit::TransportLost => Ok(()),
        };
        self.teardown().await;

        let reader_result = reader_task.await.unwrap_or_else(|error| {
            warn!("reader task failed: id={}, error={error}", self.handle.id());
            Ok(())
        });
        let outcome = result.and(reader_result);
        info!(
            "session closed: id={}, peer={}, close={:?}, outcome={outcome:?}",
            self.handle.id(),
            self.identity.ip,
            self.handle.close_record()
        );
        drop(self.counter.take());
        outcome
    }

    async fn event_loop(&mut self) -> LoopExit {
        while !self.handle.is_closed() {
            match self.next_event().await {
                Event::Close(Some(signal)) => {
                    return LoopExit::Finished(self.close(signal.code, &signal.reason).await);
                }
                Event::Close(None) => self.close_rx = None,
                Event::Inbound(Some(frame)) => {
                    if let Err(error) = self.dispatch(frame).await {
                        return LoopExit::Finished(Err(error));
                    }
                }
                Event::Inbound(None) => return LoopExit::TransportLost,
                Event::Outbound(Some(outbound)) => {
                    if let Err(error) = self.write_outbound(outbound).await {
                        return LoopExit::Finished(Err(error.into()));
                    }
                }
                Event::Outbound(None) => self.outbound_rx = None,
                Event::Idle => break,
            }
        }
        LoopExit::Finished(Ok(()))
    }

    /// Await the next ready event using biased priority ordering.
    ///
    /// The final `else` branch keeps `tokio::select!` from panicking once
    /// every source is closed.
    async fn next_event(&mut self) -> Event {
        let has_close = self.close_rx.is_some();
        let has_inbound = self.inbound_rx.is_some();
        let has_outbound = self.outbound_rx.is_some();

        tokio::select! {
            biased;

            res = Self::poll_queue(self.close_rx.as_mut()), if has_close => Event::Close(res),
            res = Self::poll_queue(self.inbound_rx.as_mut()), if has_inbound => Event::Inbound(res),
            res = Self::poll_queue(self.outbound_rx.as_mut()), if has_outbound => Event::Outbound(res),
            else => Event::Idle,
        }
    }

    /// Receive from `rx` if present, returning `None` otherwise.
    async fn poll_queue<T>(rx: Option<&mut mpsc::Receiver<T>>) -> Option<T> {
        match rx {
            Some(rx) => rx.recv().await,
            None => None,
        }
    }

    async fn write_outbound(&mut self, outbound: Outbound) -> Result<(), TransportError> {
        let Outbound { frame, ack } = outbound;
        let result = self.write_frame(frame).await;
        if let Some(ack) = ack {
            // The sender may have stopped waiting.
            let _ = ack.send(match &result {
                Ok(()) => Ok(()),
                Err(error) => Err(SendError::Write(error.to_string())),
            });
        }
        result
    }

    /// Write one binary frame. Only called while the session is open.
    async fn write_frame(&mut self, frame: Bytes) -> Result<(), TransportError> {
        let writer = self.writer.as_mut().ok_or(TransportError::Disconnected)?;
        writer.write_binary(frame).await?;
        metrics::inc_frames(Direction::Outbound);
        Ok(())
    }
}
