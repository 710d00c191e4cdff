//! Integration tests: run real transfers against a mock TFTP server on
//! loopback UDP and verify the payload arrives intact byte-for-byte.
//!
//! The mock server answers from a fresh ephemeral socket after the
//! request, the way RFC 1350 servers pick a transfer ID, so these tests
//! also cover the client's peer-port correction.
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::Bytes;

use tftp_client::protocol::{ByteOrder, ErrorCode, Message, BLOCK_SIZE};
use tftp_client::sender::{run_upload, Progress, UploadConfig};
use tftp_client::{ephemeral_port, RetryConfig, TftpClient, TracingLogger, TransferError};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn test_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("tftp_client_test_{}", name));
    let _ = std::fs::create_dir_all(&dir);
    dir
}

fn patterned(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

fn fast_retry() -> RetryConfig {
    RetryConfig {
        timeout: Duration::from_millis(200),
        max_retries: 3,
        tick: Duration::from_millis(20),
    }
}

/// Server half of an upload: take the WRQ, ack block 0 from a fresh
/// transfer socket, collect blocks until the short one. When
/// `drop_first_data` is set the first DATA is swallowed to force the
/// client into a retransmit.
fn spawn_upload_server(
    order: ByteOrder,
    drop_first_data: bool,
) -> (SocketAddr, JoinHandle<Vec<u8>>) {
    let listen = UdpSocket::bind("127.0.0.1:0").unwrap();
    let addr = listen.local_addr().unwrap();

    let handle = thread::spawn(move || {
        let mut buf = [0u8; 2048];
        let (len, client) = listen.recv_from(&mut buf).unwrap();
        match Message::decode(&buf[..len], order).unwrap() {
            Message::WriteRequest { mode, .. } => assert_eq!(mode, "octet"),
            other => panic!("expected WRQ, got {:?}", other),
        }

        let tid = UdpSocket::bind("127.0.0.1:0").unwrap();
        tid.send_to(&Message::Ack { block: 0 }.encode(order), client)
            .unwrap();

        let mut collected = Vec::new();
        let mut expected: u16 = 1;
        let mut dropped = false;
        loop {
            let (len, from) = tid.recv_from(&mut buf).unwrap();
            let msg = match Message::decode(&buf[..len], order) {
                Ok(m) => m,
                Err(_) => continue,
            };
            if let Message::Data { block, payload } = msg {
                if drop_first_data && !dropped {
                    dropped = true;
                    continue;
                }
                if block != expected {
                    // duplicate from a retransmit; re-ack so the client moves on
                    tid.send_to(&Message::Ack { block }.encode(order), from)
                        .unwrap();
                    continue;
                }
                collected.extend_from_slice(&payload);
                tid.send_to(&Message::Ack { block }.encode(order), from)
                    .unwrap();
                if payload.len() < BLOCK_SIZE {
                    return collected;
                }
                expected = expected.wrapping_add(1);
            }
        }
    });
    (addr, handle)
}

/// Server half of a download: take the RRQ, stream `payload` in 512-byte
/// blocks from a fresh transfer socket, waiting for each ACK.
fn spawn_download_server(payload: Vec<u8>, order: ByteOrder) -> (SocketAddr, JoinHandle<()>) {
    let listen = UdpSocket::bind("127.0.0.1:0").unwrap();
    let addr = listen.local_addr().unwrap();

    let handle = thread::spawn(move || {
        let mut buf = [0u8; 2048];
        let (len, client) = listen.recv_from(&mut buf).unwrap();
        match Message::decode(&buf[..len], order).unwrap() {
            Message::ReadRequest { .. } => {}
            other => panic!("expected RRQ, got {:?}", other),
        }

        let tid = UdpSocket::bind("127.0.0.1:0").unwrap();
        let mut block: u16 = 1;
        let mut offset = 0usize;
        loop {
            let end = (offset + BLOCK_SIZE).min(payload.len());
            let chunk = &payload[offset..end];
            let msg = Message::Data {
                block,
                payload: Bytes::copy_from_slice(chunk),
            };
            tid.send_to(&msg.encode(order), client).unwrap();

            loop {
                let (len, _) = tid.recv_from(&mut buf).unwrap();
                if let Ok(Message::Ack { block: acked }) = Message::decode(&buf[..len], order) {
                    if acked == block {
                        break;
                    }
                }
            }

            offset = end;
            if chunk.len() < BLOCK_SIZE {
                return;
            }
            block = block.wrapping_add(1);
        }
    });
    (addr, handle)
}

#[test]
fn upload_roundtrip_via_facade() {
    init_tracing();
    let dir = test_dir("upload_roundtrip");
    let input = dir.join("input.bin");
    let data = patterned(1100);
    std::fs::write(&input, &data).unwrap();

    let (server, handle) = spawn_upload_server(ByteOrder::Big, false);
    let client = TftpClient::new(IpAddr::V4(Ipv4Addr::LOCALHOST), server.port())
        .with_logger(Arc::new(TracingLogger));

    let (progress_tx, progress_rx) = crossbeam_channel::unbounded::<Progress>();
    let result = client.upload(&input, Some(progress_tx)).unwrap();

    assert_eq!(result.bytes_sent, 1100);
    assert_eq!(result.blocks, 3);
    assert_eq!(result.retransmits, 0);

    let progress: Vec<Progress> = progress_rx.try_iter().collect();
    assert_eq!(
        progress,
        vec![
            Progress { block: 1, total_blocks: 3 },
            Progress { block: 2, total_blocks: 3 },
            Progress { block: 3, total_blocks: 3 },
        ]
    );

    let collected = handle.join().unwrap();
    assert_eq!(collected, data);

    let _ = std::fs::remove_file(&input);
}

#[test]
fn upload_exact_multiple_ends_with_empty_block() {
    init_tracing();
    let data = patterned(BLOCK_SIZE * 2);
    let (server, handle) = spawn_upload_server(ByteOrder::Big, false);

    let config = UploadConfig {
        remote: server,
        local_port: ephemeral_port().unwrap(),
        filename: "exact.bin".into(),
        mode: "octet".into(),
        byte_order: ByteOrder::Big,
        retry: fast_retry(),
        logger: None,
    };
    let result = run_upload(config, Bytes::from(data.clone()), None).unwrap();

    // two full blocks plus the mandatory empty final one
    assert_eq!(result.blocks, 3);
    assert_eq!(result.bytes_sent, data.len() as u64);
    assert_eq!(handle.join().unwrap(), data);
}

#[test]
fn upload_recovers_from_lost_block() {
    init_tracing();
    let data = patterned(700);
    let (server, handle) = spawn_upload_server(ByteOrder::Big, true);

    let config = UploadConfig {
        remote: server,
        local_port: ephemeral_port().unwrap(),
        filename: "lossy.bin".into(),
        mode: "octet".into(),
        byte_order: ByteOrder::Big,
        retry: fast_retry(),
        logger: Some(Arc::new(TracingLogger)),
    };
    let result = run_upload(config, Bytes::from(data.clone()), None).unwrap();

    assert!(result.retransmits >= 1, "expected at least one retransmit");
    assert_eq!(handle.join().unwrap(), data);
}

#[test]
fn download_roundtrip_via_facade() {
    init_tracing();
    let dir = test_dir("download_roundtrip");
    let data = patterned(1100);
    let (server, handle) = spawn_download_server(data.clone(), ByteOrder::Big);

    let client = TftpClient::new(IpAddr::V4(Ipv4Addr::LOCALHOST), server.port())
        .with_logger(Arc::new(TracingLogger));
    let result = client.download("pulled.bin", &dir).unwrap();

    assert_eq!(result.bytes_received, 1100);
    assert_eq!(result.blocks, 3);

    let written = std::fs::read(dir.join("pulled.bin")).unwrap();
    assert_eq!(written, data);
    handle.join().unwrap();

    let _ = std::fs::remove_file(dir.join("pulled.bin"));
}

#[test]
fn download_little_endian_session() {
    init_tracing();
    let dir = test_dir("download_le");
    let data = patterned(600);
    let (server, handle) = spawn_download_server(data.clone(), ByteOrder::Little);

    let client = TftpClient::new(IpAddr::V4(Ipv4Addr::LOCALHOST), server.port())
        .with_byte_order(ByteOrder::Little);
    let result = client.download("le.bin", &dir).unwrap();

    assert_eq!(result.bytes_received, 600);
    assert_eq!(std::fs::read(dir.join("le.bin")).unwrap(), data);
    handle.join().unwrap();

    let _ = std::fs::remove_file(dir.join("le.bin"));
}

#[test]
fn silent_server_times_out() {
    init_tracing();
    // bound but never answers
    let silent = UdpSocket::bind("127.0.0.1:0").unwrap();
    let server = silent.local_addr().unwrap();

    let config = UploadConfig {
        remote: server,
        local_port: ephemeral_port().unwrap(),
        filename: "void.bin".into(),
        mode: "octet".into(),
        byte_order: ByteOrder::Big,
        retry: RetryConfig {
            timeout: Duration::from_millis(80),
            max_retries: 2,
            tick: Duration::from_millis(10),
        },
        logger: None,
    };
    match run_upload(config, Bytes::from(patterned(100)), None) {
        Err(TransferError::Timeout { retries }) => assert_eq!(retries, 2),
        other => panic!("expected timeout, got {:?}", other),
    }
    drop(silent);
}

#[test]
fn remote_error_aborts_upload() {
    init_tracing();
    let listen = UdpSocket::bind("127.0.0.1:0").unwrap();
    let server = listen.local_addr().unwrap();

    let handle = thread::spawn(move || {
        let mut buf = [0u8; 2048];
        let (_, client) = listen.recv_from(&mut buf).unwrap();
        let tid = UdpSocket::bind("127.0.0.1:0").unwrap();
        tid.send_to(
            &Message::error(ErrorCode::FileAlreadyExists).encode(ByteOrder::Big),
            client,
        )
        .unwrap();
    });

    let config = UploadConfig {
        remote: server,
        local_port: ephemeral_port().unwrap(),
        filename: "dupe.bin".into(),
        mode: "octet".into(),
        byte_order: ByteOrder::Big,
        retry: fast_retry(),
        logger: None,
    };
    match run_upload(config, Bytes::from(patterned(100)), None) {
        Err(TransferError::Peer { code, message }) => {
            assert_eq!(code, ErrorCode::FileAlreadyExists);
            assert_eq!(message, "File already exists.");
        }
        other => panic!("expected peer error, got {:?}", other),
    }
    handle.join().unwrap();
}
