//! Protocol tunables.
//!
//! The protocol defaults are exposed as constants and collected in
//! [`RatConfig`], which is handed to every connection and listener. Tests
//! shrink the timeouts to milliseconds without touching engine code.

use std::time::Duration;

use crate::error::{RatError, Result};
use crate::packet::MAX_PAYLOAD;

/// Maximum payload carried by one segment.
pub const RAT_PAYLOAD_SIZE: usize = MAX_PAYLOAD;
/// Default number of segments per window round.
pub const RAT_DEFAULT_WINDOW: usize = 5;
/// Attempts the retransmission manager makes before giving up.
pub const RAT_RETRY_TIMES: u32 = 5;
/// How long one attempt waits for a reply.
pub const RAT_REPLY_TIMEOUT: Duration = Duration::from_secs(4);
/// How long one teardown attempt waits for a reply.
pub const RAT_BYE_TIMEOUT: Duration = Duration::from_secs(1);

/// Largest window the `offset` count field can describe.
pub const MAX_WINDOW: usize = u8::MAX as usize;

/// What `recv` does when the peer stays silent (no data, no keep-alive) for
/// a whole idle window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeepalivePolicy {
    /// Report `RetryExhausted` and keep the connection open.
    Ignore,
    /// Same as `Ignore`, with a warning in the log.
    #[default]
    Log,
    /// Report `RetryExhausted` and close the connection.
    Reset,
}

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct RatConfig {
    /// Segments per window round, in `1..=255`.
    pub window_size: usize,
    /// Bytes per segment, in `1..=512`.
    pub payload_size: usize,
    /// Attempts per reliable exchange.
    pub retry_times: u32,
    /// Wait per attempt for handshake, data and keep-alive exchanges.
    pub reply_timeout: Duration,
    /// Wait per attempt during teardown.
    pub bye_timeout: Duration,
    /// Answer keep-alive probes from the peer.
    pub obey_keepalives: bool,
    /// Reaction to a silent peer during `recv`.
    pub keepalive_policy: KeepalivePolicy,
}

impl Default for RatConfig {
    fn default() -> Self {
        Self {
            window_size: RAT_DEFAULT_WINDOW,
            payload_size: RAT_PAYLOAD_SIZE,
            retry_times: RAT_RETRY_TIMES,
            reply_timeout: RAT_REPLY_TIMEOUT,
            bye_timeout: RAT_BYE_TIMEOUT,
            obey_keepalives: true,
            keepalive_policy: KeepalivePolicy::default(),
        }
    }
}

impl RatConfig {
    /// Set the reply timeout; the teardown timeout follows at one quarter.
    pub fn with_reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = timeout;
        self.bye_timeout = timeout / 4;
        self
    }

    pub fn with_window_size(mut self, window_size: usize) -> Self {
        self.window_size = window_size;
        self
    }

    pub fn with_payload_size(mut self, payload_size: usize) -> Self {
        self.payload_size = payload_size;
        self
    }

    pub fn with_retry_times(mut self, retry_times: u32) -> Self {
        self.retry_times = retry_times;
        self
    }

    pub fn with_keepalives(mut self, obey: bool) -> Self {
        self.obey_keepalives = obey;
        self
    }

    pub fn with_keepalive_policy(mut self, policy: KeepalivePolicy) -> Self {
        self.keepalive_policy = policy;
        self
    }

    /// Longest a `recv` waits for the first segment of a round.
    pub fn idle_window(&self) -> Duration {
        self.reply_timeout * self.retry_times
    }

    /// Check every value against the limits of the wire format.
    pub fn validate(&self) -> Result<()> {
        if self.window_size == 0 || self.window_size > MAX_WINDOW {
            return Err(RatError::out_of_range(
                "window_size",
                self.window_size as u64,
                MAX_WINDOW as u64,
            ));
        }
        if self.payload_size == 0 || self.payload_size > MAX_PAYLOAD {
            return Err(RatError::out_of_range(
                "payload_size",
                self.payload_size as u64,
                MAX_PAYLOAD as u64,
            ));
        }
        if self.retry_times == 0 {
            return Err(RatError::out_of_range("retry_times", 0, u32::MAX.into()));
        }
        Ok(())
    }
}
