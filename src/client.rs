//! Client facade: resolves local files into bytes, allocates ephemeral
//! local ports and runs one engine per transfer on the calling thread.
//! Callers that want concurrent transfers spawn a thread per session;
//! sessions share no state.
use std::io;
use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use crossbeam_channel::Sender as ChannelSender;

use crate::logging::TransferLogger;
use crate::protocol::{ByteOrder, DEFAULT_MODE};
use crate::receiver::{run_download, DownloadConfig, DownloadResult};
use crate::retry::RetryConfig;
use crate::sender::{run_upload, Progress, UploadConfig, UploadResult};
use crate::TransferError;

/// TFTP client bound to one server address. Cheap to construct; every
/// `upload`/`download` call is an independent session with its own
/// socket, port and retry state.
pub struct TftpClient {
    remote: SocketAddr,
    byte_order: ByteOrder,
    retry: RetryConfig,
    logger: Option<Arc<dyn TransferLogger>>,
}

impl TftpClient {
    /// Client for the server at `host:port` with big-endian wire
    /// integers and the default retry policy.
    pub fn new(host: IpAddr, port: u16) -> Self {
        TftpClient {
            remote: SocketAddr::new(host, port),
            byte_order: ByteOrder::Big,
            retry: RetryConfig::default(),
            logger: None,
        }
    }

    /// Use a different byte order for every session this client creates.
    /// The server must be configured to match.
    pub fn with_byte_order(mut self, order: ByteOrder) -> Self {
        self.byte_order = order;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_logger(mut self, logger: Arc<dyn TransferLogger>) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Push a local file to the server under its file name component.
    /// Blocks until the transfer reaches a terminal state. Progress
    /// notifications, if a channel is given, arrive once per
    /// acknowledged block.
    pub fn upload(
        &self,
        file_path: &Path,
        progress_tx: Option<ChannelSender<Progress>>,
    ) -> Result<UploadResult, TransferError> {
        let data = std::fs::read(file_path)?;
        let filename = file_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                io::Error::new(io::ErrorKind::InvalidInput, "path has no file name")
            })?;

        let config = UploadConfig {
            remote: self.remote,
            local_port: ephemeral_port()?,
            filename,
            mode: DEFAULT_MODE.to_string(),
            byte_order: self.byte_order,
            retry: self.retry.clone(),
            logger: self.logger.clone(),
        };
        run_upload(config, Bytes::from(data), progress_tx)
    }

    /// Pull `file_name` from the server into `dest_dir/file_name`.
    /// Blocks until the transfer reaches a terminal state.
    pub fn download(&self, file_name: &str, dest_dir: &Path) -> Result<DownloadResult, TransferError> {
        let config = DownloadConfig {
            remote: self.remote,
            local_port: ephemeral_port()?,
            filename: file_name.to_string(),
            mode: DEFAULT_MODE.to_string(),
            output_dir: dest_dir.to_path_buf(),
            byte_order: self.byte_order,
            retry: self.retry.clone(),
            logger: self.logger.clone(),
        };
        run_download(config)
    }
}

/// Allocate a random free UDP port: bind to port 0, read the assigned
/// number, release the socket and reuse the number for the session.
pub fn ephemeral_port() -> io::Result<u16> {
    let socket = UdpSocket::bind(("0.0.0.0", 0))?;
    let port = socket.local_addr()?.port();
    drop(socket);
    Ok(port)
}
