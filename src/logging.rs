//! Transfer observer trait for structured diagnostics.
//!
//! The engines never touch a process-wide logger; every diagnostic goes
//! through an injected `TransferLogger`. Callers pick `TracingLogger` to
//! forward to the `tracing` crate, `NullLogger` to discard, or their own
//! implementation to route logs elsewhere.
use std::fmt;
use std::net::SocketAddr;

/// One structured log entry from a running session.
#[derive(Debug, Clone)]
pub struct TransferLog {
    /// "upload" or "download".
    pub component: &'static str,
    /// The remote filename of the session.
    pub filename: String,
    pub event: TransferEvent,
}

/// Session lifecycle events.
#[derive(Debug, Clone)]
pub enum TransferEvent {
    /// RRQ/WRQ sent to the initial server address.
    RequestSent { peer: SocketAddr },
    /// DATA block put on the wire (upload).
    BlockSent { block: u16, len: usize },
    /// Matching ACK received (upload).
    AckReceived { block: u16 },
    /// In-order DATA block received (download).
    BlockReceived { block: u16, len: usize },
    /// ACK put on the wire (download).
    AckSent { block: u16 },
    /// Outstanding message resent after a silent timeout.
    Retransmit { retries: u32 },
    /// Remote sent an ERROR message.
    PeerError { code: u16, message: String },
    /// Session reached its terminal success state.
    Completed { total_bytes: u64 },
    /// Session failed; the cause is surfaced to the caller as well.
    Failed { message: String },
}

impl fmt::Display for TransferEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RequestSent { peer } => write!(f, "request_sent peer={}", peer),
            Self::BlockSent { block, len } => write!(f, "block_sent block={} len={}", block, len),
            Self::AckReceived { block } => write!(f, "ack_received block={}", block),
            Self::BlockReceived { block, len } => {
                write!(f, "block_received block={} len={}", block, len)
            }
            Self::AckSent { block } => write!(f, "ack_sent block={}", block),
            Self::Retransmit { retries } => write!(f, "retransmit retries={}", retries),
            Self::PeerError { code, message } => {
                write!(f, "peer_error code={} message={}", code, message)
            }
            Self::Completed { total_bytes } => write!(f, "completed bytes={}", total_bytes),
            Self::Failed { message } => write!(f, "failed: {}", message),
        }
    }
}

/// Trait for session logging. Implementations can forward to `tracing`,
/// collect entries for a UI, or discard them.
pub trait TransferLogger: Send + Sync {
    fn log(&self, entry: TransferLog);
}

/// Logger that uses the `tracing` crate.
pub struct TracingLogger;

impl TransferLogger for TracingLogger {
    fn log(&self, entry: TransferLog) {
        // Lifecycle events at info, per-block traffic at debug
        match &entry.event {
            TransferEvent::RequestSent { .. }
            | TransferEvent::Retransmit { .. }
            | TransferEvent::PeerError { .. }
            | TransferEvent::Completed { .. }
            | TransferEvent::Failed { .. } => {
                tracing::info!(
                    component = entry.component,
                    filename = %entry.filename,
                    "{}",
                    entry.event,
                );
            }
            _ => {
                tracing::debug!(
                    component = entry.component,
                    filename = %entry.filename,
                    "{}",
                    entry.event,
                );
            }
        }
    }
}

/// No-op logger that discards all entries.
pub struct NullLogger;

impl TransferLogger for NullLogger {
    fn log(&self, _entry: TransferLog) {}
}
