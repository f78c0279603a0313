//! Connection handling for [`SessionServer`](super::SessionServer).

use std::{any::Any, net::SocketAddr, sync::Arc};

use futures::FutureExt;
use log::{debug, error, info, warn};
use tokio::{net::TcpStream, time::timeout};
use tokio_tungstenite::accept_async;
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use crate::{
    close::CloseCode,
    config::SessionConfig,
    error::SessionError,
    handler::MessageHandler,
    identity::IdentityResolver,
    metrics::{self, ErrorKind},
    registry::SessionRegistry,
    session::Session,
    transport::websocket,
};

/// Close reason sent to sessions still open when the server stops.
pub(in crate::server) const SHUTDOWN_REASON: &str = "server shutting down";

/// State every connection task of one server shares.
pub(in crate::server) struct ConnectionShared<H, I> {
    pub handler: Arc<H>,
    pub resolver: Arc<I>,
    pub registry: Arc<SessionRegistry>,
    pub config: SessionConfig,
    pub shutdown: CancellationToken,
}

/// Spawn a task to serve a single TCP connection, logging and discarding any
/// panics.
pub(in crate::server) fn spawn_connection_task<H, I>(
    stream: TcpStream,
    peer_addr: SocketAddr,
    shared: Arc<ConnectionShared<H, I>>,
    tracker: &TaskTracker,
) where
    H: MessageHandler,
    I: IdentityResolver,
{
    tracker.spawn(async move {
        let fut = std::panic::AssertUnwindSafe(process_stream(stream, peer_addr, shared))
            .catch_unwind();

        if let Err(panic) = fut.await {
            metrics::inc_errors(ErrorKind::Panic);
            let panic_msg = panic_message(panic.as_ref());
            // Emit via both `log` and `tracing` for tests that capture either.
            error!("connection task panicked: panic={panic_msg}, peer_addr={peer_addr}");
            tracing::error!(panic = %panic_msg, %peer_addr, "connection task panicked");
        }
    });
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| format!("{panic:?}"))
}

async fn process_stream<H, I>(
    stream: TcpStream,
    peer_addr: SocketAddr,
    shared: Arc<ConnectionShared<H, I>>,
) where
    H: MessageHandler,
    I: IdentityResolver,
{
    let socket = match timeout(shared.config.handshake_timeout, accept_async(stream)).await {
        Ok(Ok(socket)) => socket,
        Ok(Err(e)) => {
            debug!("websocket upgrade failed: error={e}, peer_addr={peer_addr}");
            return;
        }
        Err(_) => {
            debug!("websocket upgrade timed out: peer_addr={peer_addr}");
            return;
        }
    };

    let identity = shared.resolver.resolve(peer_addr.ip());
    let (reader, writer) = websocket::split(socket);
    let session = Session::new(
        reader,
        writer,
        identity,
        Arc::clone(&shared.handler),
        shared.config,
    );
    let handle = session.handle();
    shared.registry.insert(&handle);
    // The server may have swept the registry before this session joined it.
    if shared.shutdown.is_cancelled() {
        handle.request_close(CloseCode::GOING_AWAY, SHUTDOWN_REASON);
    }

    let outcome = session.run().await;
    shared.registry.remove(handle.id());
    log_outcome(&outcome, peer_addr);
}

fn log_outcome(outcome: &Result<(), SessionError>, peer_addr: SocketAddr) {
    match outcome {
        Ok(()) => {}
        Err(e) if e.is_peer_close() => {
            debug!("peer disconnected: error={e}, peer_addr={peer_addr}");
        }
        Err(e @ (SessionError::Banned | SessionError::TooManyApplicationErrors(_))) => {
            info!("session ended by policy: error={e}, peer_addr={peer_addr}");
        }
        Err(e @ SessionError::Protocol(_)) => {
            info!("session ended by protocol violation: error={e}, peer_addr={peer_addr}");
        }
        // Already counted when the close frame write failed.
        Err(e @ SessionError::CloseFailed { .. }) => {
            warn!("close handshake failed: error={e}, peer_addr={peer_addr}");
        }
        Err(e) => {
            metrics::inc_errors(ErrorKind::Transport);
            warn!("session failed: error={e}, peer_addr={peer_addr}");
        }
    }
}
