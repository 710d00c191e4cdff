//! Lock-step TFTP (RFC 1350) client over UDP.
//!
//! Provides:
//! - Binary codec for the five wire messages (RRQ/WRQ/DATA/ACK/ERROR)
//! - Upload engine: WRQ, then 512-byte blocks acknowledged one at a time
//! - Download engine: RRQ, per-block ACKs, accumulated payload persisted
//!   on the final short block
//! - Timeout-driven retransmission of the single outstanding message
//! - `TftpClient` facade: file I/O, ephemeral local ports, one engine run
//!   per transfer
//!
//! One session per transfer, each with its own socket and retry state.
//! Reliability comes solely from the resend-on-silence policy; there is
//! no windowing and no negative acknowledgment.
pub mod client;
pub mod logging;
pub mod protocol;
pub mod receiver;
pub mod retry;
pub mod sender;

use thiserror::Error;

use crate::protocol::{ErrorCode, WireError};

// Re-export key types for convenience.
pub use client::{ephemeral_port, TftpClient};
pub use logging::{NullLogger, TracingLogger, TransferEvent, TransferLog, TransferLogger};
pub use protocol::{ByteOrder, Message, Opcode, BLOCK_SIZE, MAX_PACKET};
pub use receiver::{run_download, DownloadConfig, DownloadResult};
pub use retry::{RetryAction, RetryConfig, RetryState};
pub use sender::{run_upload, Progress, UploadConfig, UploadResult};

/// Terminal failure of one transfer session. Every failure funnels into
/// the engine's single `Err` return; the socket and retry state are
/// released before it surfaces, on every path.
#[derive(Debug, Error)]
pub enum TransferError {
    /// The peer sent a datagram the codec rejects.
    #[error(transparent)]
    Wire(#[from] WireError),
    /// The peer aborted the transfer with an ERROR message.
    #[error("peer error {}: {message}", code.as_u16())]
    Peer { code: ErrorCode, message: String },
    /// Retry budget exhausted with no reply.
    #[error("transfer timed out after {retries} retries")]
    Timeout { retries: u32 },
    /// Socket or file system failure.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
