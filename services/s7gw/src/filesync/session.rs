//! File-sync session for one touch panel
//!
//! Keeps a TCP connection to the panel open, retrying forever while the
//! device is registered. On each connection the panel repeatedly opens
//! with a numeric handshake, then asks either for the encrypted user file
//! or to upload its measurement and event logs.

use std::future::Future;
use std::path::Path;
use std::time::Duration;

use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::protocol::{
    ends_with_marker, handshake_reply, is_event_switch, log_target_name, parse_handshake_token,
    Command, MarkerScanner, ScanResult, CHUNK_SIZE, DRV_ACK, PNL_ACK,
};
use crate::config::FileSyncConfig;
use crate::core::delivery::{publish, Delivery, DeliveryTx, DeviceKey, PANEL_ERROR_POINT};
use crate::crypto::{render_decimal_lines, Encryptor};
use crate::error::{GatewayError, Result};
use crate::runtime::{sleep_or_cancel, ConnectBackoff, RuntimeContext, StatusFlag};

/// Poll interval while the gateway is in standby
const STANDBY_POLL: Duration = Duration::from_secs(1);

/// Observable session phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileSyncPhase {
    AwaitingConnect,
    Connecting,
    Connected,
    /// Waiting for the next handshake on an open connection
    Idle,
    Handshaking,
    TransferringUser,
    TransferringLog,
    TransferringEvent,
    Draining,
    Stopped,
}

/// Everything a session needs at construction
#[derive(Debug, Clone)]
pub struct FileSyncParams {
    pub key: DeviceKey,
    pub target: String,
    pub config: FileSyncConfig,
    pub ctx: RuntimeContext,
    pub token: CancellationToken,
    pub deliveries: DeliveryTx,
}

/// Protocol state machine for one panel connection target
pub struct FileSyncSession {
    key: DeviceKey,
    target: String,
    config: FileSyncConfig,
    ctx: RuntimeContext,
    token: CancellationToken,
    deliveries: DeliveryTx,
    phase: watch::Sender<FileSyncPhase>,
    status: StatusFlag,
    encryptor: Encryptor,
}

impl FileSyncSession {
    pub fn new(params: FileSyncParams) -> (Self, watch::Receiver<FileSyncPhase>) {
        let (phase, phase_rx) = watch::channel(FileSyncPhase::AwaitingConnect);
        (
            Self {
                key: params.key,
                target: params.target,
                config: params.config,
                ctx: params.ctx,
                token: params.token,
                deliveries: params.deliveries,
                phase,
                status: StatusFlag::new(),
                encryptor: Encryptor::panel(),
            },
            phase_rx,
        )
    }

    /// Outer connect loop; returns once the token is cancelled
    pub async fn run(mut self) {
        info!(panel = %self.target, port = self.config.port, "File sync session started");
        let mut backoff = ConnectBackoff::new(
            Duration::from_secs(self.config.short_backoff_secs),
            Duration::from_secs(self.config.long_backoff_secs),
            self.config.short_backoff_attempts,
        );

        while !self.token.is_cancelled() {
            self.set_phase(FileSyncPhase::AwaitingConnect);
            if self.ctx.is_standby() {
                if !sleep_or_cancel(&self.token, STANDBY_POLL).await {
                    break;
                }
                continue;
            }

            self.set_phase(FileSyncPhase::Connecting);
            let mut stream = match self.connect().await {
                Ok(stream) => stream,
                Err(GatewayError::Cancelled) => break,
                Err(e) => {
                    self.report(true);
                    let delay = backoff.record_failure();
                    info!(
                        panel = %self.target,
                        attempt = backoff.streak(),
                        "Panel connect failed: {}, retrying in {:?}",
                        e,
                        delay
                    );
                    if !sleep_or_cancel(&self.token, delay).await {
                        break;
                    }
                    continue;
                },
            };

            backoff.reset();
            self.set_phase(FileSyncPhase::Connected);
            info!(panel = %self.target, "Connected to touch panel");

            match self.serve(&mut stream).await {
                Ok(()) | Err(GatewayError::Cancelled) => {},
                Err(e) => warn!(panel = %self.target, "Panel connection aborted: {}", e),
            }
            let _ = stream.shutdown().await;

            if !self.token.is_cancelled() {
                self.report(true);
            }
        }

        self.set_phase(FileSyncPhase::Draining);
        debug!(panel = %self.target, "File sync session draining");
        self.set_phase(FileSyncPhase::Stopped);
        info!(panel = %self.target, "File sync session stopped");
    }

    async fn connect(&self) -> Result<TcpStream> {
        let addr = format!("{}:{}", self.target, self.config.port);
        let timeout = self.config.connect_timeout();
        tokio::select! {
            _ = self.token.cancelled() => Err(GatewayError::Cancelled),
            r = tokio::time::timeout(timeout, TcpStream::connect(&addr)) => match r {
                Ok(Ok(stream)) => Ok(stream),
                Ok(Err(e)) => Err(GatewayError::FileSync(format!("connect to {}: {}", addr, e))),
                Err(_) => Err(GatewayError::FileSync(format!(
                    "could not connect to {} within {:?}",
                    addr, timeout
                ))),
            },
        }
    }

    /// Handshake/command loop on one open connection
    async fn serve(&mut self, stream: &mut TcpStream) -> Result<()> {
        let mut buf = vec![0u8; CHUNK_SIZE];

        loop {
            if self.token.is_cancelled() {
                return Err(GatewayError::Cancelled);
            }
            if self.ctx.is_standby() {
                info!(panel = %self.target, "Standby, closing panel connection");
                return Ok(());
            }
            self.report(false);

            self.set_phase(FileSyncPhase::Idle);
            let n = self.recv(stream, &mut buf).await?;
            self.set_phase(FileSyncPhase::Handshaking);
            let token = parse_handshake_token(&buf[..n]);
            debug!(panel = %self.target, token, "Handshake received");
            self.send(stream, handshake_reply(token).as_bytes()).await?;

            let n = self.recv(stream, &mut buf).await?;
            match Command::parse(&buf[..n]) {
                Command::User => self.send_user_file(stream).await?,
                Command::LogFile => self.receive_log_files(stream, &mut buf).await?,
                Command::Unknown(cmd) => {
                    warn!(panel = %self.target, command = %cmd, "Unknown panel command");
                },
            }
        }
    }

    async fn send_user_file(&mut self, stream: &mut TcpStream) -> Result<()> {
        self.set_phase(FileSyncPhase::TransferringUser);
        let path = &self.config.user_file;
        info!(panel = %self.target, file = %path.display(), "Sending user file");

        let data = tokio::fs::read(path).await.map_err(|e| {
            GatewayError::FileSync(format!("cannot read user file {}: {}", path.display(), e))
        })?;
        let blocks = self.encryptor.encrypt_blocks(&data);
        self.send(stream, render_decimal_lines(&blocks).as_bytes())
            .await?;
        self.send(stream, DRV_ACK).await?;

        info!(panel = %self.target, blocks = blocks.len(), "User file sent");
        Ok(())
    }

    async fn receive_log_files(&mut self, stream: &mut TcpStream, buf: &mut [u8]) -> Result<()> {
        self.set_phase(FileSyncPhase::TransferringLog);
        self.send(stream, DRV_ACK).await?;
        let mut dir = self.config.measurement_dir.clone();

        loop {
            let n = self.recv(stream, buf).await?;
            let msg = &buf[..n];

            if is_event_switch(msg) {
                self.set_phase(FileSyncPhase::TransferringEvent);
                dir = self.config.event_dir.clone();
                self.send(stream, DRV_ACK).await?;
                debug!(panel = %self.target, "Switched to event files");
                continue;
            }
            if ends_with_marker(msg) {
                info!(panel = %self.target, "Log file transfer finished");
                return Ok(());
            }

            let Some(name) = log_target_name(msg) else {
                return Err(GatewayError::FileSync(format!(
                    "invalid file name from panel: {:?}",
                    String::from_utf8_lossy(msg)
                )));
            };
            let path = dir.join(&name);
            self.receive_file(stream, buf, &dir, &path).await?;
        }
    }

    async fn receive_file(
        &mut self,
        stream: &mut TcpStream,
        buf: &mut [u8],
        dir: &Path,
        path: &Path,
    ) -> Result<()> {
        tokio::fs::create_dir_all(dir).await?;
        let mut file = File::create(path).await.map_err(|e| {
            GatewayError::FileSync(format!("cannot create {}: {}", path.display(), e))
        })?;
        info!(panel = %self.target, file = %path.display(), "Receiving file");

        let body = async {
            self.send(stream, DRV_ACK).await?;
            let mut scanner = MarkerScanner::new(PNL_ACK);
            let mut total = 0usize;
            loop {
                let n = self.recv(stream, buf).await?;
                let (bytes, complete) = match scanner.push(&buf[..n]) {
                    ScanResult::Pending(bytes) => (bytes, false),
                    ScanResult::Complete(bytes) => (bytes, true),
                };
                file.write_all(&bytes).await?;
                total += bytes.len();
                if complete {
                    file.flush().await?;
                    return Ok::<usize, GatewayError>(total);
                }
            }
        };

        match body.await {
            Ok(total) => {
                drop(file);
                debug!(panel = %self.target, bytes = total, "File received");
                self.send(stream, DRV_ACK).await
            },
            Err(e) => {
                drop(file);
                if let Err(rm) = tokio::fs::remove_file(path).await {
                    warn!(file = %path.display(), "Failed to remove partial file: {}", rm);
                } else {
                    debug!(file = %path.display(), "Removed partial file");
                }
                Err(e)
            },
        }
    }

    async fn recv(&self, stream: &mut TcpStream, buf: &mut [u8]) -> Result<usize> {
        let n = self.guarded("receive", stream.read(buf)).await?;
        if n == 0 {
            return Err(GatewayError::FileSync("connection closed by panel".into()));
        }
        Ok(n)
    }

    async fn send(&self, stream: &mut TcpStream, bytes: &[u8]) -> Result<()> {
        self.guarded("send", stream.write_all(bytes)).await
    }

    /// Race an I/O step against cancellation and the receive timeout
    async fn guarded<T>(
        &self,
        what: &str,
        fut: impl Future<Output = std::io::Result<T>>,
    ) -> Result<T> {
        let timeout = self.config.receive_timeout();
        tokio::select! {
            _ = self.token.cancelled() => Err(GatewayError::Cancelled),
            r = tokio::time::timeout(timeout, fut) => match r {
                Ok(Ok(v)) => Ok(v),
                Ok(Err(e)) => Err(GatewayError::FileSync(format!("{} failed: {}", what, e))),
                Err(_) => Err(GatewayError::FileSync(format!("{} timed out after {:?}", what, timeout))),
            },
        }
    }

    fn set_phase(&self, phase: FileSyncPhase) {
        self.phase.send_replace(phase);
    }

    fn report(&mut self, error: bool) {
        if let Some(value) = self.status.update(error) {
            debug!(panel = %self.target, error = value, "Panel connection status changed");
            publish(
                &self.deliveries,
                Delivery::status(&self.key, PANEL_ERROR_POINT, value),
            );
        }
    }
}
