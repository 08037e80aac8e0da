//! Process-wide runtime context
//!
//! Replaces a global run flag: every session receives a clone at
//! construction and checks it at each loop head and blocking boundary.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Shutdown token plus the redundancy standby flag
#[derive(Debug, Clone, Default)]
pub struct RuntimeContext {
    shutdown: CancellationToken,
    standby: Arc<AtomicBool>,
}

impl RuntimeContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token cancelled on process shutdown
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Child token for one session; cancelled with the process token
    pub fn child_token(&self) -> CancellationToken {
        self.shutdown.child_token()
    }

    pub fn request_shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Passive side of a redundant pair: no PLC or panel traffic
    pub fn set_standby(&self, standby: bool) {
        self.standby.store(standby, Ordering::SeqCst);
    }

    pub fn is_standby(&self) -> bool {
        self.standby.load(Ordering::SeqCst)
    }
}

/// Sleep unless the token fires first; returns `false` when cancelled
pub async fn sleep_or_cancel(token: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        _ = token.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}
