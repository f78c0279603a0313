//! Builder methods and listener binding for [`SessionServer`].

use std::{
    net::{SocketAddr, TcpListener as StdTcpListener},
    sync::Arc,
};

use tokio::{net::TcpListener, sync::oneshot};

use super::{BackoffConfig, Bound, ServerError, ServerState, SessionServer, Unbound};
use crate::{
    config::SessionConfig,
    handler::MessageHandler,
    identity::IdentityResolver,
    registry::SessionRegistry,
};

impl<H, I> SessionServer<H, I, Unbound>
where
    H: MessageHandler,
    I: IdentityResolver,
{
    /// Create a server dispatching to `handler` and resolving identities
    /// with `resolver`.
    ///
    /// The worker count defaults to the number of available CPU cores (or 1
    /// if this cannot be determined).
    ///
    /// # Examples
    ///
    /// ```
    /// use std::sync::Arc;
    ///
    /// use boardsock::{LoggingHandler, identity::BanList, server::SessionServer};
    ///
    /// let server = SessionServer::new(Arc::new(LoggingHandler), Arc::new(BanList::default()));
    /// assert!(server.worker_count() >= 1);
    /// assert!(server.local_addr().is_none());
    /// ```
    #[must_use]
    pub fn new(handler: Arc<H>, resolver: Arc<I>) -> Self {
        let workers = std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get);
        Self {
            handler,
            resolver,
            registry: Arc::new(SessionRegistry::new()),
            workers,
            session_config: SessionConfig::default(),
            backoff_config: BackoffConfig::default(),
            ready_tx: None,
            state: Unbound,
        }
    }

    /// Return `None` as the server is not bound.
    #[must_use]
    pub const fn local_addr(&self) -> Option<SocketAddr> { None }

    /// Bind to a fresh address.
    ///
    /// # Errors
    /// Returns a [`ServerError`] if binding or configuring the listener fails.
    pub fn bind(self, addr: SocketAddr) -> Result<SessionServer<H, I, Bound>, ServerError> {
        let std_listener = StdTcpListener::bind(addr).map_err(ServerError::Bind)?;
        self.bind_existing_listener(std_listener)
    }

    /// Bind to an existing `StdTcpListener`.
    ///
    /// # Errors
    /// Returns a [`ServerError`] if configuring the listener fails.
    pub fn bind_existing_listener(
        self,
        std_listener: StdTcpListener,
    ) -> Result<SessionServer<H, I, Bound>, ServerError> {
        self.bind_to_listener(std_listener)
    }
}

impl<H, I> SessionServer<H, I, Bound>
where
    H: MessageHandler,
    I: IdentityResolver,
{
    /// Returns the bound address, or `None` if retrieving it fails.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> { self.state.listener.local_addr().ok() }
}

impl<H, I, S> SessionServer<H, I, S>
where
    H: MessageHandler,
    I: IdentityResolver,
    S: ServerState,
{
    /// Set the number of worker tasks to spawn for the server.
    #[must_use]
    pub fn workers(mut self, count: usize) -> Self {
        self.workers = count.max(1);
        self
    }

    /// Set the configuration every session is created with.
    #[must_use]
    pub fn session_config(mut self, config: SessionConfig) -> Self {
        self.session_config = config.normalized();
        self
    }

    /// Set the accept loop back-off timing.
    #[must_use]
    pub fn accept_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff_config = backoff.normalized();
        self
    }

    /// Configure a channel used to signal when the server is ready to accept
    /// connections.
    #[must_use]
    pub fn ready_signal(mut self, tx: oneshot::Sender<()>) -> Self {
        self.ready_tx = Some(tx);
        self
    }

    /// Returns the configured number of worker tasks for the server.
    #[inline]
    #[must_use]
    pub const fn worker_count(&self) -> usize { self.workers }

    /// Registry holding every live session of this server.
    ///
    /// Clone it before running the server to reach sessions from other
    /// tasks.
    #[must_use]
    pub fn registry(&self) -> Arc<SessionRegistry> { Arc::clone(&self.registry) }

    fn bind_to_listener(
        self,
        std_listener: StdTcpListener,
    ) -> Result<SessionServer<H, I, Bound>, ServerError> {
        let SessionServer {
            handler,
            resolver,
            registry,
            workers,
            session_config,
            backoff_config,
            ready_tx,
            ..
        } = self;

        std_listener
            .set_nonblocking(true)
            .map_err(ServerError::Bind)?;
        let tokio_listener = TcpListener::from_std(std_listener).map_err(ServerError::Bind)?;

        Ok(SessionServer {
            handler,
            resolver,
            registry,
            workers,
            session_config,
            backoff_config,
            ready_tx,
            state: Bound {
                listener: Arc::new(tokio_listener),
            },
        })
    }
}
