//! Upload engine: pushes a file to the server in lock-step.
//!
//! Flow:
//!   1. Bind the UDP socket on the facade-chosen local port
//!   2. Send WRQ, arm retransmission
//!   3. ACK(0) → capture the server's transfer port, send block 1
//!   4. Each matching ACK → progress event, next block
//!   5. ACK for the final short block → done
//!   6. Silence → resend the outstanding message, up to the retry budget
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use crossbeam_channel::Sender as ChannelSender;

use crate::logging::{TransferEvent, TransferLog, TransferLogger};
use crate::protocol::{ByteOrder, Message, BLOCK_SIZE, MAX_PACKET};
use crate::retry::{RetryAction, RetryConfig, RetryState};
use crate::TransferError;

const COMPONENT: &str = "upload";

/// Progress notification emitted after each acknowledged block.
/// Informational only; it plays no part in flow control.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub block: u16,
    pub total_blocks: u32,
}

/// Upload configuration.
pub struct UploadConfig {
    /// Server address the request is sent to. The session follows the
    /// server to whatever port its replies come from.
    pub remote: SocketAddr,
    /// Local port the facade allocated for this session.
    pub local_port: u16,
    /// Remote filename carried in the WRQ.
    pub filename: String,
    /// Transfer mode carried in the WRQ, normally "octet".
    pub mode: String,
    pub byte_order: ByteOrder,
    pub retry: RetryConfig,
    pub logger: Option<Arc<dyn TransferLogger>>,
}

/// Result of a completed upload.
#[derive(Debug)]
pub struct UploadResult {
    pub bytes_sent: u64,
    pub blocks: u32,
    pub retransmits: u32,
    pub elapsed: Duration,
}

/// What the receive loop should do after feeding a datagram to the session.
#[derive(Debug, Default)]
struct Outcome {
    /// Message to send and arm as the new outstanding message.
    reply: Option<Message>,
    /// Progress to report (an ACK matched the current block).
    progress: Option<Progress>,
    /// Session reached DONE.
    done: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SendState {
    Init,
    RequestSent,
    Sending,
    Done,
}

/// The upload state machine, free of any I/O. The run loop feeds it raw
/// datagrams and executes the outcomes.
pub(crate) struct UploadSession {
    state: SendState,
    filename: String,
    mode: String,
    data: Bytes,
    offset: usize,
    block: u16,
    blocks_sent: u32,
    total_blocks: u32,
    last_was_short: bool,
    byte_order: ByteOrder,
}

impl UploadSession {
    fn new(filename: String, mode: String, data: Bytes, byte_order: ByteOrder) -> Self {
        // Kept formula from the reference behavior: counts the mandatory
        // short final block, including the empty one after an exact
        // multiple of 512 bytes.
        let total_blocks = (data.len() / BLOCK_SIZE + 1) as u32;
        UploadSession {
            state: SendState::Init,
            filename,
            mode,
            data,
            offset: 0,
            block: 0,
            blocks_sent: 0,
            total_blocks,
            last_was_short: false,
            byte_order,
        }
    }

    fn total_blocks(&self) -> u32 {
        self.total_blocks
    }

    fn bytes_sent(&self) -> u64 {
        self.offset as u64
    }

    /// Begin the transfer: produce the WRQ.
    fn start(&mut self) -> Message {
        self.state = SendState::RequestSent;
        Message::WriteRequest {
            filename: self.filename.clone(),
            mode: self.mode.clone(),
        }
    }

    fn handle_packet(&mut self, datagram: &[u8]) -> Result<Outcome, TransferError> {
        let msg = Message::decode(datagram, self.byte_order)?;
        match msg {
            Message::Ack { block } => Ok(self.handle_ack(block)),
            Message::Error { code, message } => Err(TransferError::Peer { code, message }),
            // Valid opcode, wrong direction: noise, not a protocol breach
            _ => Ok(Outcome::default()),
        }
    }

    fn handle_ack(&mut self, block: u16) -> Outcome {
        match self.state {
            SendState::RequestSent if block == 0 => {
                self.state = SendState::Sending;
                Outcome {
                    reply: Some(self.next_block()),
                    ..Outcome::default()
                }
            }
            SendState::Sending if block == self.block => {
                let progress = Progress {
                    block: self.block,
                    total_blocks: self.total_blocks,
                };
                if self.last_was_short {
                    self.state = SendState::Done;
                    Outcome {
                        progress: Some(progress),
                        done: true,
                        ..Outcome::default()
                    }
                } else {
                    Outcome {
                        reply: Some(self.next_block()),
                        progress: Some(progress),
                        done: false,
                    }
                }
            }
            // Stale or out-of-order ACK: dropped without a reply, the
            // retransmission timer recovers if the peer is truly stuck
            _ => Outcome::default(),
        }
    }

    fn next_block(&mut self) -> Message {
        let remaining = self.data.len() - self.offset;
        let take = remaining.min(BLOCK_SIZE);
        let payload = self.data.slice(self.offset..self.offset + take);
        self.offset += take;
        self.block = self.block.wrapping_add(1);
        self.blocks_sent += 1;
        self.last_was_short = take < BLOCK_SIZE;
        Message::Data {
            block: self.block,
            payload,
        }
    }
}

/// Run an upload to completion. Blocks the calling thread; the facade (or
/// the caller) decides whether to spawn a dedicated thread per session.
pub fn run_upload(
    config: UploadConfig,
    data: Bytes,
    progress_tx: Option<ChannelSender<Progress>>,
) -> Result<UploadResult, TransferError> {
    let logger = config.logger.clone();
    let filename = config.filename.clone();

    let result = drive(config, data, progress_tx);
    match &result {
        Ok(res) => log_event(
            &logger,
            &filename,
            TransferEvent::Completed {
                total_bytes: res.bytes_sent,
            },
        ),
        Err(e) => log_event(
            &logger,
            &filename,
            TransferEvent::Failed {
                message: e.to_string(),
            },
        ),
    }
    result
}

fn drive(
    config: UploadConfig,
    data: Bytes,
    progress_tx: Option<ChannelSender<Progress>>,
) -> Result<UploadResult, TransferError> {
    let socket = bind_for(&config.remote, config.local_port)?;
    socket.set_read_timeout(Some(config.retry.tick))?;

    let mut session = UploadSession::new(
        config.filename.clone(),
        config.mode.clone(),
        data,
        config.byte_order,
    );
    let mut retry = RetryState::new(config.retry.clone());
    let mut peer = config.remote;
    let mut retransmits: u32 = 0;
    let start = Instant::now();

    let request = session.start().encode(config.byte_order);
    socket.send_to(&request, peer)?;
    log_event(
        &config.logger,
        &config.filename,
        TransferEvent::RequestSent { peer },
    );
    retry.arm(request, Instant::now());

    let mut recv_buf = [0u8; MAX_PACKET + 64];
    loop {
        match socket.recv_from(&mut recv_buf) {
            Ok((len, src)) => {
                // The server may answer from a fresh ephemeral port; all
                // further traffic goes there.
                peer = src;
                let outcome = session.handle_packet(&recv_buf[..len])?;

                if let Some(progress) = outcome.progress {
                    log_event(
                        &config.logger,
                        &config.filename,
                        TransferEvent::AckReceived {
                            block: progress.block,
                        },
                    );
                    if let Some(tx) = &progress_tx {
                        let _ = tx.send(progress);
                    }
                }

                if let Some(reply) = outcome.reply {
                    let len = match &reply {
                        Message::Data { payload, .. } => payload.len(),
                        _ => 0,
                    };
                    let encoded = reply.encode(config.byte_order);
                    socket.send_to(&encoded, peer)?;
                    log_event(
                        &config.logger,
                        &config.filename,
                        TransferEvent::BlockSent {
                            block: session.block,
                            len,
                        },
                    );
                    retry.arm(encoded, Instant::now());
                }

                if outcome.done {
                    retry.disarm();
                    return Ok(UploadResult {
                        bytes_sent: session.bytes_sent(),
                        blocks: session.blocks_sent,
                        retransmits,
                        elapsed: start.elapsed(),
                    });
                }
            }
            Err(ref e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                // Tick: Windows reports TimedOut, Unix WouldBlock
                match retry.poll(Instant::now()) {
                    RetryAction::Wait => {}
                    RetryAction::Resend(packet) => {
                        socket.send_to(packet, peer)?;
                        retransmits += 1;
                        log_event(
                            &config.logger,
                            &config.filename,
                            TransferEvent::Retransmit {
                                retries: retransmits,
                            },
                        );
                    }
                    RetryAction::TimedOut { retries } => {
                        return Err(TransferError::Timeout { retries });
                    }
                }
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// Bind an unspecified-address socket of the same family as the remote.
pub(crate) fn bind_for(remote: &SocketAddr, local_port: u16) -> std::io::Result<UdpSocket> {
    let bind_addr: SocketAddr = match remote {
        SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, local_port).into(),
        SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, local_port).into(),
    };
    UdpSocket::bind(bind_addr)
}

fn log_event(logger: &Option<Arc<dyn TransferLogger>>, filename: &str, event: TransferEvent) {
    if let Some(logger) = logger {
        logger.log(TransferLog {
            component: COMPONENT,
            filename: filename.to_string(),
            event,
        });
    }
}
