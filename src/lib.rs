#![doc(html_root_url = "https://docs.rs/boardsock/latest")]
//! Public API for the `boardsock` library.
//!
//! Each WebSocket connection is served by a [`Session`]: a reader task feeding
//! a single coordinating loop that validates tagged binary frames, hands them
//! to a [`MessageHandler`], writes outbound frames and runs an idempotent,
//! time-bounded close handshake. [`server::SessionServer`] accepts
//! connections and keeps live sessions in a [`SessionRegistry`].

pub mod close;
pub mod config;
pub mod error;
pub mod handler;
pub mod identity;
pub mod message;
pub mod metrics;
pub mod registry;
pub mod server;
pub mod session;
pub mod transport;

pub use close::{CloseCode, CloseRecord};
pub use error::{ProtocolError, SessionError, TransportError};
pub use handler::{HandlerError, LoggingHandler, MessageHandler, SessionContext};
pub use message::MessageType;
pub use metrics::{Direction, ERRORS_TOTAL, FRAMES_PROCESSED, SESSIONS_ACTIVE, SESSIONS_CLOSED};
pub use registry::SessionRegistry;
pub use session::{SendError, Session, SessionHandle, SessionId, SessionState};
