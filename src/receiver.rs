//! Download engine: pulls a file from the server in lock-step.
//!
//! Flow:
//!   1. Bind the UDP socket on the facade-chosen local port
//!   2. Send RRQ, arm retransmission
//!   3. DATA(1) → capture the server's transfer port, append, ACK(1)
//!   4. Each in-order DATA → append, ACK, advance
//!   5. Short payload → final ACK, persist the buffer, done
//!   6. Silence → resend the outstanding message, up to the retry budget
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};

use crate::logging::{TransferEvent, TransferLog, TransferLogger};
use crate::protocol::{ByteOrder, Message, BLOCK_SIZE, MAX_PACKET};
use crate::retry::{RetryAction, RetryConfig, RetryState};
use crate::sender::bind_for;
use crate::TransferError;

const COMPONENT: &str = "download";

/// Download configuration.
pub struct DownloadConfig {
    /// Server address the request is sent to. The session follows the
    /// server to whatever port its replies come from.
    pub remote: SocketAddr,
    /// Local port the facade allocated for this session.
    pub local_port: u16,
    /// Remote filename carried in the RRQ; also the name the payload is
    /// written under in `output_dir`.
    pub filename: String,
    /// Transfer mode carried in the RRQ, normally "octet".
    pub mode: String,
    /// Directory the downloaded file is written to.
    pub output_dir: PathBuf,
    pub byte_order: ByteOrder,
    pub retry: RetryConfig,
    pub logger: Option<Arc<dyn TransferLogger>>,
}

/// Result of a completed download.
#[derive(Debug)]
pub struct DownloadResult {
    pub bytes_received: u64,
    pub blocks: u32,
    pub elapsed: Duration,
}

/// What the receive loop should do after feeding a datagram to the session.
#[derive(Debug, Default)]
struct Outcome {
    /// ACK to send and arm as the new outstanding message.
    reply: Option<Message>,
    /// The final short block arrived; persist and finish after the ACK.
    done: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecvState {
    Init,
    RequestSent,
    Receiving,
    Done,
}

/// The download state machine, free of any I/O.
pub(crate) struct DownloadSession {
    state: RecvState,
    filename: String,
    mode: String,
    buffer: BytesMut,
    block: u16,
    blocks: u32,
    byte_order: ByteOrder,
}

impl DownloadSession {
    fn new(filename: String, mode: String, byte_order: ByteOrder) -> Self {
        DownloadSession {
            state: RecvState::Init,
            filename,
            mode,
            buffer: BytesMut::new(),
            block: 0,
            blocks: 0,
            byte_order,
        }
    }

    /// Begin the transfer: produce the RRQ.
    fn start(&mut self) -> Message {
        self.state = RecvState::RequestSent;
        Message::ReadRequest {
            filename: self.filename.clone(),
            mode: self.mode.clone(),
        }
    }

    fn handle_packet(&mut self, datagram: &[u8]) -> Result<Outcome, TransferError> {
        let msg = Message::decode(datagram, self.byte_order)?;
        match msg {
            Message::Data { block, payload } => Ok(self.handle_data(block, payload)),
            Message::Error { code, message } => Err(TransferError::Peer { code, message }),
            // Valid opcode, wrong direction: noise, not a protocol breach
            _ => Ok(Outcome::default()),
        }
    }

    fn handle_data(&mut self, block: u16, payload: Bytes) -> Outcome {
        let expected = match self.state {
            RecvState::RequestSent => 1,
            RecvState::Receiving => self.block.wrapping_add(1),
            _ => return Outcome::default(),
        };
        if block != expected {
            // Duplicate or out-of-order delivery: dropped without a
            // re-ACK; the sender's retransmission recovers
            return Outcome::default();
        }

        self.state = RecvState::Receiving;
        self.block = block;
        self.blocks += 1;
        let last = payload.len() < BLOCK_SIZE;
        self.buffer.extend_from_slice(&payload);
        if last {
            self.state = RecvState::Done;
        }
        Outcome {
            reply: Some(Message::Ack { block }),
            done: last,
        }
    }

    fn bytes_received(&self) -> u64 {
        self.buffer.len() as u64
    }

    fn into_buffer(self) -> BytesMut {
        self.buffer
    }
}

/// Run a download to completion, persisting the payload under
/// `output_dir/filename`. Blocks the calling thread.
pub fn run_download(config: DownloadConfig) -> Result<DownloadResult, TransferError> {
    let logger = config.logger.clone();
    let filename = config.filename.clone();

    let result = drive(config);
    match &result {
        Ok(res) => log_event(
            &logger,
            &filename,
            TransferEvent::Completed {
                total_bytes: res.bytes_received,
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

fn drive(config: DownloadConfig) -> Result<DownloadResult, TransferError> {
    let socket = bind_for(&config.remote, config.local_port)?;
    socket.set_read_timeout(Some(config.retry.tick))?;

    let mut session = DownloadSession::new(
        config.filename.clone(),
        config.mode.clone(),
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
                let received = len;
                let outcome = session.handle_packet(&recv_buf[..received])?;

                if let Some(reply) = outcome.reply {
                    log_event(
                        &config.logger,
                        &config.filename,
                        TransferEvent::BlockReceived {
                            block: session.block,
                            len: received.saturating_sub(4),
                        },
                    );
                    let encoded = reply.encode(config.byte_order);
                    socket.send_to(&encoded, peer)?;
                    log_event(
                        &config.logger,
                        &config.filename,
                        TransferEvent::AckSent {
                            block: session.block,
                        },
                    );
                    retry.arm(encoded, Instant::now());
                }

                if outcome.done {
                    retry.disarm();
                    let blocks = session.blocks;
                    let bytes_received = session.bytes_received();
                    persist(&config, session.into_buffer())?;
                    return Ok(DownloadResult {
                        bytes_received,
                        blocks,
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

/// Write the accumulated payload to the destination. A failure here is
/// the session failure; the transfer is not retried.
fn persist(config: &DownloadConfig, buffer: BytesMut) -> Result<(), TransferError> {
    std::fs::create_dir_all(&config.output_dir)?;
    let path = config.output_dir.join(&config.filename);
    std::fs::write(path, &buffer)?;
    Ok(())
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
