//! Runtime control for [`SessionServer`].

mod accept;
mod backoff;

use std::sync::Arc;

use accept::{AcceptLoopOptions, accept_loop};
pub use backoff::BackoffConfig;
use futures::Future;
use log::{info, warn};
use tokio::{select, signal};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use super::{
    Bound,
    ServerError,
    SessionServer,
    connection::{ConnectionShared, SHUTDOWN_REASON},
};
use crate::{close::CloseCode, handler::MessageHandler, identity::IdentityResolver};

impl<H, I> SessionServer<H, I, Bound>
where
    H: MessageHandler,
    I: IdentityResolver,
{
    /// Run the server until a shutdown signal is received.
    ///
    /// Spawns the configured number of worker tasks and awaits Ctrl+C for
    /// shutdown.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use std::sync::Arc;
    ///
    /// use boardsock::{LoggingHandler, identity::BanList, server::SessionServer};
    ///
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), boardsock::server::ServerError> {
    /// let server = SessionServer::new(Arc::new(LoggingHandler), Arc::new(BanList::default()))
    ///     .bind(([127, 0, 0, 1], 8000).into())?;
    /// server.run().await?;
    /// # Ok(())
    /// # }
    /// ```
    ///
    /// # Errors
    ///
    /// Accept failures are retried with exponential back-off and do not
    /// surface as errors; the signature leaves room for startup failures.
    pub async fn run(self) -> Result<(), ServerError> {
        self.run_with_shutdown(async {
            let _ = signal::ctrl_c().await;
        })
        .await
    }

    /// Run the server until the `shutdown` future resolves.
    ///
    /// On shutdown the workers stop accepting, every live session is closed
    /// with [`CloseCode::GOING_AWAY`], and the call returns once all
    /// connection tasks have finished.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::sync::Arc;
    ///
    /// use boardsock::{LoggingHandler, identity::BanList, server::SessionServer};
    /// use tokio::sync::oneshot;
    ///
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), boardsock::server::ServerError> {
    /// let server = SessionServer::new(Arc::new(LoggingHandler), Arc::new(BanList::default()))
    ///     .bind(([127, 0, 0, 1], 0).into())?;
    ///
    /// let (tx, rx) = oneshot::channel::<()>();
    /// let handle = tokio::spawn(async move {
    ///     server
    ///         .run_with_shutdown(async {
    ///             let _ = rx.await;
    ///         })
    ///         .await
    /// });
    ///
    /// // Signal shutdown
    /// let _ = tx.send(());
    /// handle
    ///     .await
    ///     .expect("join server task")
    ///     .expect("server run failed");
    /// # Ok(())
    /// # }
    /// ```
    ///
    /// # Errors
    ///
    /// Accept failures are retried with exponential back-off and do not
    /// surface as errors.
    pub async fn run_with_shutdown<S>(self, shutdown: S) -> Result<(), ServerError>
    where
        S: Future<Output = ()> + Send,
    {
        let SessionServer {
            handler,
            resolver,
            registry,
            workers,
            session_config,
            backoff_config,
            ready_tx,
            state: Bound { listener },
        } = self;
        let shutdown_token = CancellationToken::new();
        let tracker = TaskTracker::new();
        let shared = Arc::new(ConnectionShared {
            handler,
            resolver,
            registry: Arc::clone(&registry),
            config: session_config,
            shutdown: shutdown_token.clone(),
        });

        for _ in 0..workers {
            tracker.spawn(accept_loop(
                Arc::clone(&listener),
                Arc::clone(&shared),
                AcceptLoopOptions {
                    shutdown: shutdown_token.clone(),
                    tracker: tracker.clone(),
                    backoff: backoff_config,
                },
            ));
        }

        // Signal readiness after all workers have been spawned.
        if let Some(tx) = ready_tx
            && tx.send(()).is_err()
        {
            warn!("failed to send readiness signal: receiver dropped");
        }

        select! {
            () = shutdown => {},
            () = tracker.wait() => {},
        }

        shutdown_token.cancel();
        let closing = registry.close_all(CloseCode::GOING_AWAY, SHUTDOWN_REASON);
        info!("server shutting down: closing_sessions={closing}");
        tracker.close();
        tracker.wait().await;
        Ok(())
    }
}
