//! Validation and routing of inbound frames.

use bytes::Bytes;
use log::{debug, warn};

use super::Session;
use crate::{
    close::CloseCode,
    error::{ProtocolError, SessionError},
    handler::{MessageHandler, SessionContext},
    message::{MIN_FRAME_LEN, MessageType},
    metrics::{self, Direction, ErrorKind},
    transport::{FrameReader, FrameWriter},
};

/// Close reason for banned clients.
pub(crate) const BANNED_REASON: &str = "You are banned";

/// Close reason once the application error bound is reached.
pub(crate) const REJECTED_REASON: &str = "too many rejected messages";

impl<R, W, H> Session<R, W, H>
where
    R: FrameReader,
    W: FrameWriter,
    H: MessageHandler,
{
    /// Validate `frame` and hand it to the handler.
    ///
    /// Returns an error when the frame ended the session.
    pub(super) async fn dispatch(&mut self, frame: Bytes) -> Result<(), SessionError> {
        metrics::inc_frames(Direction::Inbound);
        if self.identity.banned {
            self.close(CloseCode::POLICY_VIOLATION, BANNED_REASON).await?;
            return Err(SessionError::Banned);
        }

        let message = match self.validate(&frame) {
            Ok(message) => message,
            Err(error) => return self.protocol_error(error).await,
        };

        let payload = frame.slice(1..);
        let mut ctx = SessionContext::new(&self.handle, &self.identity, self.synced);
        let outcome = self.handler.handle(message, payload, &mut ctx).await;
        let replies = ctx.into_replies();

        match outcome {
            Ok(()) => {
                self.app_errors = 0;
                if message == MessageType::Synchronise {
                    self.synced = true;
                    self.handle.lifecycle().mark_synced();
                }
            }
            Err(error) => {
                self.app_errors = self.app_errors.saturating_add(1);
                metrics::inc_errors(ErrorKind::Application);
                warn!(
                    "message rejected: id={}, type={message:?}, consecutive={}, error={error}",
                    self.handle.id(),
                    self.app_errors
                );
                if self
                    .config
                    .max_consecutive_app_errors
                    .is_some_and(|limit| self.app_errors >= limit)
                {
                    self.close(CloseCode::POLICY_VIOLATION, REJECTED_REASON).await?;
                    return Err(SessionError::TooManyApplicationErrors(self.app_errors));
                }
            }
        }

        for reply in replies {
            if self.handle.is_closed() {
                break;
            }
            self.write_frame(reply).await?;
        }
        Ok(())
    }

    fn validate(&self, frame: &Bytes) -> Result<MessageType, ProtocolError> {
        if frame.len() < MIN_FRAME_LEN {
            return Err(ProtocolError::TooShort {
                frame: frame.clone(),
            });
        }
        let tag = frame[0];
        if !self.synced && tag != MessageType::Synchronise.tag() {
            return Err(ProtocolError::NotSynced {
                frame: frame.clone(),
            });
        }
        MessageType::try_from(tag).map_err(|_| ProtocolError::UnknownType {
            frame: frame.clone(),
        })
    }

    /// Close the session over a protocol violation and surface it.
    async fn protocol_error(&mut self, error: ProtocolError) -> Result<(), SessionError> {
        metrics::inc_errors(ErrorKind::Protocol);
        debug!("protocol violation: id={}, error={error}", self.handle.id());
        self.close(CloseCode::PROTOCOL_ERROR, &error.to_string()).await?;
        Err(error.into())
    }
}
