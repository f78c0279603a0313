//! Per-session configuration.

use std::time::Duration;

/// Default bound on writing a close frame.
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);
/// Default bound on the WebSocket upgrade handshake.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);
/// Default number of consecutive handler failures tolerated.
pub const DEFAULT_MAX_APP_ERRORS: u32 = 8;

/// Settings shared by every session a server spawns.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use boardsock::config::SessionConfig;
///
/// let config = SessionConfig::default()
///     .close_timeout(Duration::from_secs(1))
///     .max_consecutive_app_errors(None);
/// assert_eq!(config.close_timeout, Duration::from_secs(1));
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionConfig {
    /// Deadline for writing the close frame.
    pub close_timeout: Duration,
    /// Deadline for the upgrade handshake, applied by the server.
    pub handshake_timeout: Duration,
    /// Capacity of the queue between the reader task and the session loop.
    pub inbound_capacity: usize,
    /// Capacity of the queue of outbound frames awaiting the session loop.
    pub outbound_capacity: usize,
    /// Consecutive handler failures tolerated before the session is closed.
    /// `None` never closes on handler failures.
    pub max_consecutive_app_errors: Option<u32>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            inbound_capacity: 16,
            outbound_capacity: 64,
            max_consecutive_app_errors: Some(DEFAULT_MAX_APP_ERRORS),
        }
    }
}

impl SessionConfig {
    /// Set the close frame deadline.
    #[must_use]
    pub fn close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    /// Set the upgrade handshake deadline.
    #[must_use]
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Set the inbound and outbound queue capacities.
    #[must_use]
    pub fn capacity(mut self, inbound: usize, outbound: usize) -> Self {
        self.inbound_capacity = inbound;
        self.outbound_capacity = outbound;
        self
    }

    /// Set how many consecutive handler failures are tolerated.
    #[must_use]
    pub fn max_consecutive_app_errors(mut self, limit: Option<u32>) -> Self {
        self.max_consecutive_app_errors = limit;
        self
    }

    /// Clamp values that would make a session unusable.
    ///
    /// Queue capacities are raised to at least one, zero deadlines to one
    /// millisecond, and an error bound of zero becomes one.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.inbound_capacity = self.inbound_capacity.max(1);
        self.outbound_capacity = self.outbound_capacity.max(1);
        self.close_timeout = self.close_timeout.max(Duration::from_millis(1));
        self.handshake_timeout = self.handshake_timeout.max(Duration::from_millis(1));
        self.max_consecutive_app_errors = self.max_consecutive_app_errors.map(|n| n.max(1));
        self
    }
}
