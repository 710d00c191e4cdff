//! Retransmission state for the lock-step exchange.
//!
//! The protocol has no negative acknowledgment; loss is detected only by
//! silence. Exactly one message is outstanding per session at any time.
//! The engine's receive loop polls this state on every tick: once the
//! timeout elapses without a reply the outstanding bytes are resent
//! verbatim, up to the retry budget, after which the session fails.
use std::time::{Duration, Instant};

/// Timing knobs for a session. Tests shrink these; production sessions
/// use the defaults.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Silence threshold before a resend.
    pub timeout: Duration,
    /// Resends allowed before the session fails with a timeout.
    pub max_retries: u32,
    /// How often the receive loop wakes up to poll (socket read timeout).
    pub tick: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            timeout: Duration::from_millis(3000),
            max_retries: 3,
            tick: Duration::from_millis(500),
        }
    }
}

/// What the engine should do after a poll.
#[derive(Debug, PartialEq, Eq)]
pub enum RetryAction<'a> {
    /// Nothing outstanding, or the timeout has not elapsed yet.
    Wait,
    /// Resend these exact bytes to the peer.
    Resend(&'a [u8]),
    /// Retry budget exhausted; fail the session.
    TimedOut { retries: u32 },
}

/// Tracks the single outstanding message of a session.
pub struct RetryState {
    config: RetryConfig,
    outstanding: Option<Vec<u8>>,
    last_send: Instant,
    retries: u32,
}

impl RetryState {
    pub fn new(config: RetryConfig) -> Self {
        RetryState {
            config,
            outstanding: None,
            last_send: Instant::now(),
            retries: 0,
        }
    }

    /// Record a freshly sent message as the outstanding one. Resets the
    /// retry count; the bytes kept here are what a resend puts on the wire.
    pub fn arm(&mut self, packet: Vec<u8>, now: Instant) {
        self.outstanding = Some(packet);
        self.last_send = now;
        self.retries = 0;
    }

    /// Clear the outstanding message (terminal state reached).
    pub fn disarm(&mut self) {
        self.outstanding = None;
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Decide whether to resend, give up, or keep waiting.
    pub fn poll(&mut self, now: Instant) -> RetryAction<'_> {
        if self.outstanding.is_none() {
            return RetryAction::Wait;
        }
        if now.duration_since(self.last_send) <= self.config.timeout {
            return RetryAction::Wait;
        }
        if self.retries >= self.config.max_retries {
            return RetryAction::TimedOut {
                retries: self.retries,
            };
        }
        self.last_send = now;
        self.retries += 1;
        match &self.outstanding {
            Some(packet) => RetryAction::Resend(packet),
            None => RetryAction::Wait,
        }
    }
}
