//! Errors raised by [`SessionServer`](super::SessionServer) operations.

use std::io;

use thiserror::Error;

/// Errors that may occur while configuring or running the server.
///
/// Accept failures are retried with back-off and never surface here.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Binding or configuring the listener failed.
    #[error("bind error: {0}")]
    Bind(#[source] io::Error),
}
