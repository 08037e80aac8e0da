//! Handover of the file-sync session between panel targets
//!
//! At most one session runs per device. Switching target cancels the
//! running session, waits (bounded) for it to exit and only then starts the
//! next one. Concurrent requests are serialised; the last one wins.

use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::session::{FileSyncParams, FileSyncPhase, FileSyncSession};
use crate::config::FileSyncConfig;
use crate::core::delivery::{DeliveryTx, DeviceKey};
use crate::runtime::RuntimeContext;

struct ActiveSession {
    target: String,
    token: CancellationToken,
    handle: JoinHandle<()>,
    phase: watch::Receiver<FileSyncPhase>,
}

/// Owns the file-sync session of one device
pub struct FileSyncSupervisor {
    key: DeviceKey,
    config: FileSyncConfig,
    ctx: RuntimeContext,
    /// Device token; sessions run on child tokens of it
    parent: CancellationToken,
    deliveries: DeliveryTx,
    join_timeout: Duration,
    active: Mutex<Option<ActiveSession>>,
}

impl FileSyncSupervisor {
    pub fn new(
        key: DeviceKey,
        config: FileSyncConfig,
        ctx: RuntimeContext,
        parent: CancellationToken,
        deliveries: DeliveryTx,
        join_timeout: Duration,
    ) -> Self {
        Self {
            key,
            config,
            ctx,
            parent,
            deliveries,
            join_timeout,
            active: Mutex::new(None),
        }
    }

    /// Serve `ip`, replacing any running session
    ///
    /// A request for the target already being served is a no-op.
    pub async fn set_target(&self, ip: &str) {
        let mut active = self.active.lock().await;

        if let Some(current) = active.take() {
            if current.target == ip && !current.handle.is_finished() {
                *active = Some(current);
                return;
            }
            info!(
                device = %self.key,
                from = %current.target,
                to = %ip,
                "Stopping file sync session for handover"
            );
            self.drain(current).await;
        }

        if !self.config.enabled {
            info!(device = %self.key, "File sync disabled, not serving {}", ip);
            return;
        }
        if self.parent.is_cancelled() {
            return;
        }

        let token = self.parent.child_token();
        let (session, phase) = FileSyncSession::new(FileSyncParams {
            key: self.key.clone(),
            target: ip.to_string(),
            config: self.config.clone(),
            ctx: self.ctx.clone(),
            token: token.clone(),
            deliveries: self.deliveries.clone(),
        });
        let handle = tokio::spawn(session.run());
        info!(device = %self.key, panel = %ip, "File sync session spawned");

        *active = Some(ActiveSession {
            target: ip.to_string(),
            token,
            handle,
            phase,
        });
    }

    /// Stop the running session, if any, and wait for it
    pub async fn stop(&self) {
        if let Some(current) = self.active.lock().await.take() {
            self.drain(current).await;
        }
    }

    /// Current target
    pub async fn target(&self) -> Option<String> {
        self.active.lock().await.as_ref().map(|a| a.target.clone())
    }

    /// Phase receiver of the running session
    pub async fn phase(&self) -> Option<watch::Receiver<FileSyncPhase>> {
        self.active.lock().await.as_ref().map(|a| a.phase.clone())
    }

    async fn drain(&self, current: ActiveSession) {
        current.token.cancel();
        let mut handle = current.handle;
        match tokio::time::timeout(self.join_timeout, &mut handle).await {
            Ok(Ok(())) => info!(panel = %current.target, "File sync session exited"),
            Ok(Err(e)) => warn!(panel = %current.target, "File sync task failed: {}", e),
            Err(_) => {
                warn!(
                    panel = %current.target,
                    "File sync session did not exit within {:?}, aborting",
                    self.join_timeout
                );
                handle.abort();
            },
        }
    }
}
