//! Application logic invoked by the dispatcher.
//!
//! The session validates framing and sequencing; everything a message means
//! is up to the [`MessageHandler`]. Handlers run inside the session loop, one
//! message at a time, so they never race with other handlers of the same
//! session.

use async_trait::async_trait;
use bytes::Bytes;
use log::info;
use thiserror::Error;

use crate::{
    identity::Identity,
    message::MessageType,
    session::{SessionHandle, SessionId},
};

/// Failure of a handler for domain reasons.
///
/// Handler failures do not close the session on their own; see
/// [`SessionConfig::max_consecutive_app_errors`](crate::config::SessionConfig).
#[derive(Debug, Error)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl HandlerError {
    /// Create an error with a message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Create an error wrapping an underlying cause.
    #[must_use]
    pub fn with_source(
        message: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(source.into()),
        }
    }
}

/// View of the session given to a handler.
pub struct SessionContext<'a> {
    handle: &'a SessionHandle,
    identity: &'a Identity,
    synced: bool,
    replies: Vec<Bytes>,
}

impl<'a> SessionContext<'a> {
    pub(crate) fn new(handle: &'a SessionHandle, identity: &'a Identity, synced: bool) -> Self {
        Self {
            handle,
            identity,
            synced,
            replies: Vec::new(),
        }
    }

    /// Identifier of the session.
    #[must_use]
    pub fn id(&self) -> &SessionId { self.handle.id() }

    /// Identity resolved when the session started.
    #[must_use]
    pub fn identity(&self) -> &Identity { self.identity }

    /// Whether the session was synchronised before this message.
    #[must_use]
    pub fn is_synced(&self) -> bool { self.synced }

    /// Queue `frame` to be written once the handler returns.
    ///
    /// Replies are written in the order they were queued, ahead of any
    /// frame queued by other tasks in the meantime.
    pub fn reply(&mut self, frame: impl Into<Bytes>) { self.replies.push(frame.into()); }

    /// A handle for reaching the session from background tasks.
    ///
    /// Awaiting [`SessionHandle::send`] on it from the handler itself fails
    /// with [`SendError::Reentrant`](crate::SendError::Reentrant).
    #[must_use]
    pub fn handle(&self) -> SessionHandle { self.handle.clone() }

    pub(crate) fn into_replies(self) -> Vec<Bytes> { self.replies }
}

/// Application logic for validated messages.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    /// Handle `payload` of a message of type `message`.
    ///
    /// The payload excludes the type tag.
    ///
    /// # Errors
    ///
    /// Returns a [`HandlerError`] if the message cannot be applied.
    async fn handle(
        &self,
        message: MessageType,
        payload: Bytes,
        ctx: &mut SessionContext<'_>,
    ) -> Result<(), HandlerError>;
}

/// Handler that logs every message and accepts it.
#[derive(Clone, Copy, Debug, Default)]
pub struct LoggingHandler;

#[async_trait]
impl MessageHandler for LoggingHandler {
    async fn handle(
        &self,
        message: MessageType,
        payload: Bytes,
        ctx: &mut SessionContext<'_>,
    ) -> Result<(), HandlerError> {
        info!(
            "message received: session={}, ip={}, type={message:?}, payload={payload:?}",
            ctx.id(),
            ctx.identity().ip
        );
        Ok(())
    }
}
