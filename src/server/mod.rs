//! Tokio-based WebSocket server running one [`Session`](crate::Session) per
//! connection.
//!
//! `SessionServer` spawns worker tasks that accept TCP connections, upgrade
//! them to WebSocket under a handshake deadline, resolve the peer's identity
//! and hand the connection to a session registered in the server's
//! [`SessionRegistry`].

use std::sync::Arc;

use tokio::{net::TcpListener, sync::oneshot};

use crate::{
    config::SessionConfig,
    handler::MessageHandler,
    identity::{BanList, IdentityResolver},
    registry::SessionRegistry,
};

/// Tokio-based server for [`MessageHandler`]s.
///
/// The server carries a typestate `S` indicating whether it is [`Unbound`]
/// (not yet bound to a TCP listener) or [`Bound`]. New servers start
/// `Unbound` and must call [`bind`](SessionServer::bind) or
/// [`bind_existing_listener`](SessionServer::bind_existing_listener) before
/// running. Every worker shares one handler, one identity resolver and one
/// registry.
pub struct SessionServer<H, I = BanList, S = Unbound>
where
    H: MessageHandler,
    I: IdentityResolver,
    S: ServerState,
{
    pub(crate) handler: Arc<H>,
    pub(crate) resolver: Arc<I>,
    pub(crate) registry: Arc<SessionRegistry>,
    pub(crate) workers: usize,
    pub(crate) session_config: SessionConfig,
    pub(crate) backoff_config: BackoffConfig,
    /// Channel used to notify when the server is ready.
    ///
    /// A `oneshot::Sender` can transmit only one readiness notification, so a
    /// new sender must be provided each time the server is started.
    pub(crate) ready_tx: Option<oneshot::Sender<()>>,
    /// Typestate tracking whether the server has been bound to a listener.
    pub(crate) state: S,
}

/// Marker indicating the server has not yet bound a listener.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unbound;

/// Marker indicating the server is bound to a TCP listener.
#[derive(Debug, Clone)]
pub struct Bound {
    pub(crate) listener: Arc<TcpListener>,
}

/// Trait implemented by [`Unbound`] and [`Bound`] to model binding typestate.
pub trait ServerState: sealed::Sealed {}

mod sealed {
    //! Prevent external implementations of [`ServerState`].

    pub trait Sealed {}
    impl Sealed for super::Unbound {}
    impl Sealed for super::Bound {}
}

impl ServerState for Unbound {}
impl ServerState for Bound {}

mod config;
mod connection;
pub mod error;
mod runtime;

pub use error::ServerError;
/// Re-exported configuration types for server backoff behaviour.
pub use runtime::BackoffConfig;

#[cfg(test)]
pub(crate) mod test_util;
