//! WebSocket close codes and the record kept for a closed session.

use std::fmt;

/// Longest reason a close frame can carry: 125 byte payload minus the code.
pub const MAX_REASON_BYTES: usize = 123;

/// Status code sent in a close control frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CloseCode(u16);

impl CloseCode {
    /// Normal closure.
    pub const NORMAL: Self = Self(1000);
    /// The endpoint is going away, such as a server shutting down.
    pub const GOING_AWAY: Self = Self(1001);
    /// The peer broke the framing or sequencing rules.
    pub const PROTOCOL_ERROR: Self = Self(1002);
    /// The peer sent a frame type the session does not accept.
    pub const UNSUPPORTED_DATA: Self = Self(1003);
    /// The connection dropped without a close frame. Never sent on the wire.
    pub const ABNORMAL: Self = Self(1006);
    /// The peer violated a server policy, such as being banned.
    pub const POLICY_VIOLATION: Self = Self(1008);
    /// The server hit an unexpected condition.
    pub const INTERNAL_ERROR: Self = Self(1011);

    /// Wrap a raw status code.
    #[must_use]
    pub const fn new(code: u16) -> Self { Self(code) }

    /// Return the raw status code.
    #[must_use]
    pub const fn as_u16(self) -> u16 { self.0 }

    /// Whether this code may appear in a close frame.
    ///
    /// 1005, 1006 and 1015 are reserved for local reporting only.
    #[must_use]
    pub const fn is_sendable(self) -> bool { !matches!(self.0, 1005 | 1006 | 1015) }
}

impl From<u16> for CloseCode {
    fn from(code: u16) -> Self { Self(code) }
}

impl From<CloseCode> for u16 {
    fn from(code: CloseCode) -> Self { code.0 }
}

impl fmt::Display for CloseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}

/// Status and reason recorded by the first close of a session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CloseRecord {
    /// Status code of the close.
    pub code: CloseCode,
    /// Human-readable reason, already truncated to fit a close frame.
    pub reason: String,
}

impl CloseRecord {
    /// Create a record, truncating `reason` to [`MAX_REASON_BYTES`].
    #[must_use]
    pub fn new(code: CloseCode, reason: &str) -> Self {
        Self {
            code,
            reason: truncate_reason(reason).to_owned(),
        }
    }
}

/// Cut `reason` to at most [`MAX_REASON_BYTES`] without splitting a character.
#[must_use]
pub fn truncate_reason(reason: &str) -> &str {
    if reason.len() <= MAX_REASON_BYTES {
        return reason;
    }
    let mut end = MAX_REASON_BYTES;
    while !reason.is_char_boundary(end) {
        end -= 1;
    }
    &reason[..end]
}
