//! Per-device polling loop
//!
//! One task per PLC. Each cycle drains queued writes, then reads every due
//! variable, forwards the results upward and sleeps for the rest of the
//! cycle. On exit the link is closed, the schedule is cleared and the
//! companion file-sync session is stopped before the task returns.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::connection::{ConnectOutcome, ConnectionManager};
use super::delivery::{publish, Delivery, DeliveryTx, DeviceKey};
use super::scheduler::BatchScheduler;
use super::store::VariableStore;
use crate::error::GatewayError;
use crate::filesync::FileSyncSupervisor;
use crate::runtime::{sleep_or_cancel, RuntimeContext};

/// Poll interval while the gateway is in standby
const STANDBY_POLL: Duration = Duration::from_secs(1);

/// Polling task for one PLC
pub struct DeviceSession {
    key: DeviceKey,
    store: Arc<VariableStore>,
    conn: ConnectionManager,
    scheduler: BatchScheduler,
    deliveries: DeliveryTx,
    ctx: RuntimeContext,
    token: CancellationToken,
    cycle_interval: Duration,
    file_sync: Option<Arc<FileSyncSupervisor>>,
}

impl DeviceSession {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        key: DeviceKey,
        store: Arc<VariableStore>,
        conn: ConnectionManager,
        scheduler: BatchScheduler,
        deliveries: DeliveryTx,
        ctx: RuntimeContext,
        token: CancellationToken,
        cycle_interval: Duration,
    ) -> Self {
        Self {
            key,
            store,
            conn,
            scheduler,
            deliveries,
            ctx,
            token,
            cycle_interval,
            file_sync: None,
        }
    }

    /// Companion panel session to stop when this loop exits
    pub fn with_file_sync(mut self, supervisor: Arc<FileSyncSupervisor>) -> Self {
        self.file_sync = Some(supervisor);
        self
    }

    /// Run until the device token is cancelled
    pub async fn run(mut self) {
        info!(device = %self.key, "Device session started");
        let token = self.token.clone();

        while !token.is_cancelled() {
            if self.ctx.is_standby() {
                if self.conn.is_connected() {
                    info!(device = %self.key, "Standby, releasing PLC connection");
                    self.conn.close().await;
                }
                if !sleep_or_cancel(&token, STANDBY_POLL).await {
                    break;
                }
                continue;
            }

            if !self.conn.is_connected() {
                match self.conn.connect_until_ready(&token, &self.ctx).await {
                    Ok(ConnectOutcome::Connected) => {},
                    Ok(ConnectOutcome::Standby) => continue,
                    Err(_) => break,
                }
            }

            let started = Instant::now();
            tokio::select! {
                _ = token.cancelled() => break,
                _ = self.cycle() => {},
            }

            if self.conn.check_streak().is_err() {
                match self.conn.reconnect(&token, &self.ctx).await {
                    Ok(_) => {},
                    Err(GatewayError::Cancelled) => break,
                    Err(e) => warn!(device = %self.key, "Reconnect failed: {}", e),
                }
                continue;
            }

            let remaining = self.cycle_interval.saturating_sub(started.elapsed());
            if !remaining.is_zero() && !sleep_or_cancel(&token, remaining).await {
                break;
            }
        }

        self.shutdown().await;
    }

    /// Writes first, then due reads
    async fn cycle(&mut self) {
        let writes = self.store.due_for_write();
        if !writes.is_empty() {
            let written = self.scheduler.run_writes(&mut self.conn, writes).await;
            for item in &written {
                self.store.mark_due(&item.name);
            }
            debug!(device = %self.key, count = written.len(), "Writes complete");
        }

        let reads = self.store.due_for_read(Instant::now());
        if reads.is_empty() {
            return;
        }
        let results = self.scheduler.run_reads(&mut self.conn, reads).await;
        for item in results {
            let address = self.key.data_address(&item.name, item.poll_interval_secs);
            publish(&self.deliveries, Delivery::new(address, item.data));
        }
    }

    async fn shutdown(&mut self) {
        info!(device = %self.key, "Device session stopping");
        self.conn.close().await;
        self.store.clear_schedule();
        if let Some(file_sync) = &self.file_sync {
            file_sync.stop().await;
        }

        let stats = self.scheduler.stats();
        info!(
            device = %self.key,
            batches = stats.batches_sent,
            reads = stats.items_read,
            writes = stats.items_written,
            failed = stats.failed_items,
            "Device session stopped"
        );
    }
}
