//! Metric helpers for `boardsock`.
//!
//! This module defines metric names and simple helper functions wrapping the
//! [`metrics`](https://docs.rs/metrics) crate. Without the `metrics` feature
//! every helper compiles to nothing.

#[cfg(feature = "metrics")]
use metrics::{counter, gauge};

use crate::close::CloseCode;

/// Name of the gauge tracking running sessions.
pub const SESSIONS_ACTIVE: &str = "boardsock_sessions_active";
/// Name of the counter tracking processed frames.
pub const FRAMES_PROCESSED: &str = "boardsock_frames_processed_total";
/// Name of the counter tracking closed sessions by status code.
pub const SESSIONS_CLOSED: &str = "boardsock_sessions_closed_total";
/// Name of the counter tracking error occurrences.
pub const ERRORS_TOTAL: &str = "boardsock_errors_total";

/// Direction of frame processing.
#[derive(Clone, Copy, Debug)]
pub enum Direction {
    /// Inbound frames received from a client.
    Inbound,
    /// Outbound frames sent to a client.
    Outbound,
}

impl Direction {
    #[cfg_attr(not(feature = "metrics"), allow(dead_code))]
    fn as_str(self) -> &'static str {
        match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        }
    }
}

/// Category of a recorded error.
#[derive(Clone, Copy, Debug)]
pub enum ErrorKind {
    /// The peer broke the framing or sequencing rules.
    Protocol,
    /// A read or write failed.
    Transport,
    /// A handler rejected a message.
    Application,
    /// A close frame could not be written.
    Close,
    /// A connection task panicked.
    Panic,
}

impl ErrorKind {
    #[cfg_attr(not(feature = "metrics"), allow(dead_code))]
    fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Protocol => "protocol",
            ErrorKind::Transport => "transport",
            ErrorKind::Application => "application",
            ErrorKind::Close => "close",
            ErrorKind::Panic => "panic",
        }
    }
}

/// Increment the active sessions gauge.
pub fn inc_sessions() {
    #[cfg(feature = "metrics")]
    gauge!(SESSIONS_ACTIVE).increment(1.0);
}

/// Decrement the active sessions gauge.
pub fn dec_sessions() {
    #[cfg(feature = "metrics")]
    gauge!(SESSIONS_ACTIVE).decrement(1.0);
}

/// Record a processed frame for the given direction.
pub fn inc_frames(direction: Direction) {
    #[cfg(feature = "metrics")]
    counter!(FRAMES_PROCESSED, "direction" => direction.as_str()).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = direction;
}

/// Record a session closed with `code`.
pub fn inc_closes(code: CloseCode) {
    #[cfg(feature = "metrics")]
    counter!(SESSIONS_CLOSED, "code" => code.as_u16().to_string()).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = code;
}

/// Record an error occurrence.
pub fn inc_errors(kind: ErrorKind) {
    #[cfg(feature = "metrics")]
    counter!(ERRORS_TOTAL, "kind" => kind.as_str()).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = kind;
}
