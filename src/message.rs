//! Message type tags carried in the first byte of every application frame.
//!
//! Tags below [`CONTROL_THRESHOLD`] modify stored application state. Tags at
//! or above it steer the session itself and never write to stored state.

use bytes::{BufMut, Bytes, BytesMut};

/// First tag reserved for session-control messages.
pub const CONTROL_THRESHOLD: u8 = 30;

/// Smallest frame the dispatcher accepts: a tag and one payload byte.
pub const MIN_FRAME_LEN: usize = 2;

/// Known message types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    /// Create a new thread.
    InsertThread = 1,
    /// Append a post to a thread.
    InsertPost = 2,
    /// Synchronise the session; unlocks every other message type.
    Synchronise = CONTROL_THRESHOLD,
    /// Switch the thread or board the session is synchronised to.
    SwitchSync = CONTROL_THRESHOLD + 1,
}

/// Error returned for tags with no known message type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("unknown message type {0}")]
pub struct UnknownMessageType(pub u8);

impl MessageType {
    /// Raw tag value.
    #[must_use]
    pub const fn tag(self) -> u8 { self as u8 }

    /// Whether the message steers the session rather than application state.
    #[must_use]
    pub const fn is_control(self) -> bool { self.tag() >= CONTROL_THRESHOLD }
}

impl TryFrom<u8> for MessageType {
    type Error = UnknownMessageType;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        match tag {
            1 => Ok(Self::InsertThread),
            2 => Ok(Self::InsertPost),
            30 => Ok(Self::Synchronise),
            31 => Ok(Self::SwitchSync),
            other => Err(UnknownMessageType(other)),
        }
    }
}

impl From<MessageType> for u8 {
    fn from(message: MessageType) -> Self { message.tag() }
}

/// Prefix `payload` with the tag of `message`, producing a wire frame.
#[must_use]
pub fn encode_message(message: MessageType, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(1 + payload.len());
    buf.put_u8(message.tag());
    buf.put_slice(payload);
    buf.freeze()
}
