//! Touch-Panel File Sync Integration Tests
//!
//! A scripted panel listens on loopback and drives the driver through:
//! - Handshake and the encrypted user file
//! - Measurement and event log uploads with split end markers
//! - Partial file cleanup on a dropped connection
//! - Target handover and connection status points

#![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{file_sync_config, mock_gateway, wait_for, PanelPeer};
use s7gw::core::delivery::{Delivery, DeviceKey};
use s7gw::crypto::{Encryptor, BLOCK_SIZE};
use s7gw::filesync::{FileSyncPhase, FileSyncSupervisor, DRV_ACK, PNL_ACK};
use s7gw::RuntimeContext;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

async fn panel_listener() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

async fn accept(listener: &TcpListener) -> PanelPeer {
    let (stream, _) = tokio::time::timeout(Duration::from_secs(5), listener.accept())
        .await
        .expect("driver did not connect")
        .unwrap();
    PanelPeer::new(stream)
}

fn decrypt_lines(body: &[u8]) -> Vec<u8> {
    let text = std::str::from_utf8(body).unwrap();
    let bytes: Vec<u8> = text.lines().map(|l| l.parse::<u8>().unwrap()).collect();
    assert_eq!(bytes.len() % BLOCK_SIZE, 0);

    let encryptor = Encryptor::panel();
    bytes
        .chunks(BLOCK_SIZE)
        .flat_map(|chunk| {
            let mut block = [0u8; BLOCK_SIZE];
            block.copy_from_slice(chunk);
            encryptor.decrypt_block(block)
        })
        .collect()
}

// ============================================================================
// Gateway-driven sessions
// ============================================================================

#[tokio::test]
async fn test_user_file_sent_encrypted() {
    let dir = TempDir::new().unwrap();
    let (listener, port) = panel_listener().await;
    let config = file_sync_config(dir.path(), port);
    let users = b"admin;1234;3\noperator;0000;1\n".to_vec();
    std::fs::write(&config.file_sync.user_file, &users).unwrap();

    let (gateway, _factory, sink) = mock_gateway(config);
    gateway
        .add_variable("10.0.0.1;127.0.0.1", "VB0", 1)
        .await
        .unwrap();

    let mut panel = accept(&listener).await;
    panel.handshake(17).await;
    panel.send(b"User").await;

    let reply = panel.recv_until(DRV_ACK).await;
    let body = &reply[..reply.len() - DRV_ACK.len()];
    let plain = decrypt_lines(body);
    assert_eq!(&plain[..users.len()], &users[..]);
    assert!(plain[users.len()..].iter().all(|&b| b == 0));

    // Back at the handshake on the same connection
    panel.handshake(41).await;

    assert!(
        wait_for(Duration::from_secs(2), || {
            sink.values_for("10.0.0.1;127.0.0.1$_touchConError") == vec![vec![0]]
        })
        .await
    );
    gateway.shutdown().await;
}

#[tokio::test]
async fn test_log_files_received_into_both_directories() {
    let dir = TempDir::new().unwrap();
    let (listener, port) = panel_listener().await;
    let config = file_sync_config(dir.path(), port);
    let measurement_dir = config.file_sync.measurement_dir.clone();
    let event_dir = config.file_sync.event_dir.clone();

    let (gateway, _factory, _sink) = mock_gateway(config);
    gateway
        .add_variable("10.0.0.1;127.0.0.1", "VB0", 1)
        .await
        .unwrap();

    let mut panel = accept(&listener).await;
    panel.handshake(1).await;
    panel.send(b"LogFile").await;
    panel.expect_ack().await;

    // Measurement file, end marker split over two writes
    panel.send(b"Logs/2024_05_01.log").await;
    panel.expect_ack().await;
    panel.send(b"time;value\n1;2\n##PNL").await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    panel.send(b"_ACK##").await;
    panel.expect_ack().await;

    // Switch to events
    panel.send(b"Event").await;
    panel.expect_ack().await;
    panel.send(b"alarms.LOG").await;
    panel.expect_ack().await;
    panel.send(b"door open##PNL_ACK##").await;
    panel.expect_ack().await;

    // End of the file list
    panel.send(PNL_ACK).await;
    panel.handshake(99).await;

    assert_eq!(
        std::fs::read(measurement_dir.join("2024_05_01.dat")).unwrap(),
        b"time;value\n1;2\n"
    );
    assert_eq!(
        std::fs::read(event_dir.join("alarms.dat")).unwrap(),
        b"door open"
    );
    gateway.shutdown().await;
}

#[tokio::test]
async fn test_partial_file_removed_on_disconnect() {
    let dir = TempDir::new().unwrap();
    let (listener, port) = panel_listener().await;
    let config = file_sync_config(dir.path(), port);
    let partial = config.file_sync.measurement_dir.join("cut.dat");

    let (gateway, _factory, sink) = mock_gateway(config);
    gateway
        .add_variable("10.0.0.1;127.0.0.1", "VB0", 1)
        .await
        .unwrap();

    let mut panel = accept(&listener).await;
    panel.handshake(3).await;
    panel.send(b"LogFile").await;
    panel.expect_ack().await;
    panel.send(b"cut.log").await;
    panel.expect_ack().await;
    panel.send(b"half a file").await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    drop(panel);

    assert!(wait_for(Duration::from_secs(3), || !partial.exists()).await);
    assert!(
        wait_for(Duration::from_secs(3), || {
            let values = sink.values_for("10.0.0.1;127.0.0.1$_touchConError");
            values.len() >= 2 && values[..2] == [vec![0], vec![1]]
        })
        .await
    );

    // The driver reconnects to the same panel
    let mut panel = accept(&listener).await;
    panel.handshake(4).await;
    gateway.shutdown().await;
}

#[tokio::test]
async fn test_panel_target_handover() {
    let dir = TempDir::new().unwrap();
    let (listener, port) = panel_listener().await;
    let config = file_sync_config(dir.path(), port);

    // Key without a panel: no file sync until a target is set
    let (gateway, _factory, _sink) = mock_gateway(config);
    gateway.add_variable("10.0.0.1", "VB0", 1).await.unwrap();
    assert_eq!(gateway.touch_panel_target("10.0.0.1").await.unwrap(), None);

    gateway
        .set_touch_panel_target("10.0.0.1", "127.0.0.1")
        .await
        .unwrap();
    let mut panel = accept(&listener).await;
    panel.handshake(10).await;
    assert_eq!(
        gateway.touch_panel_target("10.0.0.1").await.unwrap(),
        Some("127.0.0.1".to_string())
    );

    // Same target again keeps the live connection
    gateway
        .set_touch_panel_target("10.0.0.1", "127.0.0.1")
        .await
        .unwrap();
    panel.handshake(11).await;

    gateway.shutdown().await;
}

// ============================================================================
// Supervisor
// ============================================================================

#[tokio::test]
async fn test_handover_drains_previous_session() {
    let dir = TempDir::new().unwrap();
    let (listener, port) = panel_listener().await;
    let config = file_sync_config(dir.path(), port);
    let (tx, mut rx) = mpsc::unbounded_channel::<Delivery>();

    let key = DeviceKey::parse("10.0.0.1;127.0.0.1").unwrap();
    let supervisor = Arc::new(FileSyncSupervisor::new(
        key,
        config.file_sync.clone(),
        RuntimeContext::new(),
        CancellationToken::new(),
        tx,
        Duration::from_secs(5),
    ));

    // Nothing listens on 127.0.0.2; the session keeps retrying
    supervisor.set_target("127.0.0.2").await;
    let old_phase = supervisor.phase().await.unwrap();
    let first = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.address, "10.0.0.1;127.0.0.1$_touchConError");
    assert_eq!(first.payload, vec![1]);

    supervisor.set_target("127.0.0.1").await;
    assert_eq!(*old_phase.borrow(), FileSyncPhase::Stopped);

    let mut panel = accept(&listener).await;
    panel.handshake(7).await;
    let mut phase = supervisor.phase().await.unwrap();
    assert!(
        tokio::time::timeout(
            Duration::from_secs(2),
            phase.wait_for(|p| *p == FileSyncPhase::Handshaking || *p == FileSyncPhase::Idle)
        )
        .await
        .is_ok()
    );

    supervisor.stop().await;
    assert_eq!(*phase.borrow(), FileSyncPhase::Stopped);
    assert_eq!(supervisor.target().await, None);
}

#[tokio::test]
async fn test_disabled_file_sync_never_connects() {
    let dir = TempDir::new().unwrap();
    let (listener, port) = panel_listener().await;
    let mut config = file_sync_config(dir.path(), port);
    config.file_sync.enabled = false;

    let (gateway, _factory, _sink) = mock_gateway(config);
    gateway
        .add_variable("10.0.0.1;127.0.0.1", "VB0", 1)
        .await
        .unwrap();

    let accepted = tokio::time::timeout(Duration::from_millis(500), listener.accept()).await;
    assert!(accepted.is_err());
    gateway.shutdown().await;
}
