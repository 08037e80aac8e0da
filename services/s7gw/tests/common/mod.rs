//! Shared helpers for s7gw integration tests

#![allow(dead_code)]
#![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use s7gw::config::GatewayConfig;
use s7gw::core::transport::MockTransportFactory;
use s7gw::{DataSink, Gateway, RuntimeContext};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Sink that records every delivery in arrival order
#[derive(Debug, Default)]
pub struct RecordingSink {
    deliveries: Mutex<Vec<(String, u16, Vec<u8>)>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn all(&self) -> Vec<(String, u16, Vec<u8>)> {
        self.deliveries.lock().clone()
    }

    /// Payloads delivered for one address, oldest first
    pub fn values_for(&self, address: &str) -> Vec<Vec<u8>> {
        self.deliveries
            .lock()
            .iter()
            .filter(|(a, _, _)| a == address)
            .map(|(_, _, p)| p.clone())
            .collect()
    }

    pub fn last(&self, address: &str) -> Option<Vec<u8>> {
        self.values_for(address).pop()
    }
}

impl DataSink for RecordingSink {
    fn deliver(&self, address: &str, byte_length: u16, payload: &[u8]) {
        self.deliveries
            .lock()
            .push((address.to_string(), byte_length, payload.to_vec()));
    }
}

/// Defaults with file sync off and a one-second default poll interval
pub fn polling_config() -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.file_sync.enabled = false;
    config.polling.default_interval_secs = 1;
    config.polling.cycle_interval_ms = 1000;
    config
}

/// File sync against a local panel on `port`, writing under `root`
pub fn file_sync_config(root: &Path, port: u16) -> GatewayConfig {
    let mut config = polling_config();
    config.file_sync.enabled = true;
    config.file_sync.port = port;
    config.file_sync.user_file = root.join("users.txt");
    config.file_sync.measurement_dir = root.join("measurements");
    config.file_sync.event_dir = root.join("events");
    config.file_sync.connect_timeout_secs = 2;
    config.file_sync.receive_timeout_secs = 5;
    config.file_sync.short_backoff_secs = 1;
    config.file_sync.long_backoff_secs = 1;
    config.shutdown.join_timeout_secs = 5;
    config
}

/// Gateway over mock PLCs
pub fn mock_gateway(
    config: GatewayConfig,
) -> (Gateway, Arc<MockTransportFactory>, Arc<RecordingSink>) {
    let factory = Arc::new(MockTransportFactory::new());
    let sink = RecordingSink::new();
    let gateway = Gateway::new(config, factory.clone(), sink.clone(), RuntimeContext::new()).unwrap();
    (gateway, factory, sink)
}

/// Poll `check` every 20ms until it holds or `timeout` elapses
pub async fn wait_for(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Scripted touch panel on the far end of a file-sync connection
pub struct PanelPeer {
    pub stream: TcpStream,
}

impl PanelPeer {
    pub fn new(stream: TcpStream) -> Self {
        Self { stream }
    }

    pub async fn send(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.unwrap();
        self.stream.flush().await.unwrap();
    }

    /// Read exactly `n` bytes
    pub async fn recv_exact(&mut self, n: usize) -> Vec<u8> {
        let mut buf = vec![0u8; n];
        tokio::time::timeout(Duration::from_secs(5), self.stream.read_exact(&mut buf))
            .await
            .expect("panel read timed out")
            .unwrap();
        buf
    }

    /// Read until the accumulated bytes end with `suffix`
    pub async fn recv_until(&mut self, suffix: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        let mut buf = [0u8; 1024];
        while !out.ends_with(suffix) {
            let n = tokio::time::timeout(Duration::from_secs(5), self.stream.read(&mut buf))
                .await
                .expect("panel read timed out")
                .unwrap();
            assert!(n > 0, "driver closed the connection");
            out.extend_from_slice(&buf[..n]);
        }
        out
    }

    /// Send a handshake token and check the `token + 1` reply
    pub async fn handshake(&mut self, token: i64) {
        self.send(token.to_string().as_bytes()).await;
        let expected = (token + 1).to_string();
        let reply = self.recv_exact(expected.len()).await;
        assert_eq!(reply, expected.as_bytes());
    }

    pub async fn expect_ack(&mut self) {
        let ack = self.recv_exact(s7gw::filesync::DRV_ACK.len()).await;
        assert_eq!(ack, s7gw::filesync::DRV_ACK);
    }
}
