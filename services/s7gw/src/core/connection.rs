//! PLC connection lifecycle
//!
//! `Disconnected -> Connecting -> Connected`, back to `Disconnected` when the
//! batch failure streak reaches the configured threshold. Reconnection is
//! retried at a fixed interval for as long as the device stays registered.
//! The `_Error` status point is published only when its value changes.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::delivery::{publish, Delivery, DeliveryTx, DeviceKey, PLC_ERROR_POINT};
use super::transport::PlcTransport;
use crate::error::{GatewayError, Result};
use crate::runtime::{sleep_or_cancel, ConnectBackoff, RuntimeContext, StatusFlag};

/// Upper bound for a single connect attempt
pub const PLC_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// How a connect loop ended without error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    Connected,
    /// Standby was raised while retrying
    Standby,
}

/// Connection statistics
#[derive(Debug, Clone, Default)]
pub struct ConnectionStats {
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
    pub disconnections: u64,
    pub forced_reconnects: u64,
    pub last_connected: Option<Instant>,
}

/// Owns the transport of one PLC
#[derive(Debug)]
pub struct ConnectionManager {
    key: DeviceKey,
    transport: Box<dyn PlcTransport>,
    state: ConnectionState,
    failure_streak: u32,
    max_failures: u32,
    backoff: ConnectBackoff,
    status: StatusFlag,
    stats: ConnectionStats,
    deliveries: DeliveryTx,
}

impl ConnectionManager {
    pub fn new(
        key: DeviceKey,
        transport: Box<dyn PlcTransport>,
        retry_interval: Duration,
        max_failures: u32,
        deliveries: DeliveryTx,
    ) -> Self {
        Self {
            key,
            transport,
            state: ConnectionState::Disconnected,
            failure_streak: 0,
            max_failures,
            backoff: ConnectBackoff::fixed(retry_interval),
            status: StatusFlag::new(),
            stats: ConnectionStats::default(),
            deliveries,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn stats(&self) -> &ConnectionStats {
        &self.stats
    }

    pub fn failure_streak(&self) -> u32 {
        self.failure_streak
    }

    pub fn record_success(&mut self) {
        self.failure_streak = 0;
    }

    /// Count a failed batch; returns the new streak
    pub fn record_failure(&mut self) -> u32 {
        self.failure_streak = self.failure_streak.saturating_add(1);
        self.failure_streak
    }

    /// `StreakExceeded` once the streak reaches the reconnect threshold
    pub fn check_streak(&self) -> Result<()> {
        if self.failure_streak >= self.max_failures {
            return Err(GatewayError::StreakExceeded(self.failure_streak));
        }
        Ok(())
    }

    pub(crate) fn transport_mut(&mut self) -> &mut dyn PlcTransport {
        self.transport.as_mut()
    }

    /// One connect attempt bounded by [`PLC_CONNECT_TIMEOUT`]
    pub async fn try_connect(&mut self) -> Result<()> {
        self.state = ConnectionState::Connecting;
        self.stats.attempts += 1;

        let result = match tokio::time::timeout(PLC_CONNECT_TIMEOUT, self.transport.connect()).await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(GatewayError::from(e)),
            Err(_) => Err(GatewayError::ConnectFailure(format!(
                "no answer within {:?}",
                PLC_CONNECT_TIMEOUT
            ))),
        };

        match result {
            Ok(()) => {
                self.state = ConnectionState::Connected;
                self.failure_streak = 0;
                self.backoff.reset();
                self.stats.successes += 1;
                self.stats.last_connected = Some(Instant::now());
                info!(device = %self.key, "PLC connected");
                self.report(false);
                Ok(())
            },
            Err(e) => {
                self.state = ConnectionState::Disconnected;
                self.stats.failures += 1;
                self.report(true);
                Err(e)
            },
        }
    }

    /// Retry until connected, cancelled or put in standby
    pub async fn connect_until_ready(
        &mut self,
        token: &CancellationToken,
        ctx: &RuntimeContext,
    ) -> Result<ConnectOutcome> {
        loop {
            if token.is_cancelled() {
                return Err(GatewayError::Cancelled);
            }
            if ctx.is_standby() {
                return Ok(ConnectOutcome::Standby);
            }

            let attempt = tokio::select! {
                _ = token.cancelled() => return Err(GatewayError::Cancelled),
                r = self.try_connect() => r,
            };

            match attempt {
                Ok(()) => return Ok(ConnectOutcome::Connected),
                Err(e) => {
                    let delay = self.backoff.record_failure();
                    warn!(
                        device = %self.key,
                        attempt = self.backoff.streak(),
                        "PLC connect failed: {}, retrying in {:?}",
                        e,
                        delay
                    );
                    if !sleep_or_cancel(token, delay).await {
                        return Err(GatewayError::Cancelled);
                    }
                },
            }
        }
    }

    /// Drop the link after a failure streak and connect again
    pub async fn reconnect(
        &mut self,
        token: &CancellationToken,
        ctx: &RuntimeContext,
    ) -> Result<ConnectOutcome> {
        let cause = GatewayError::StreakExceeded(self.failure_streak);
        warn!(device = %self.key, "{}, reconnecting", cause);
        self.stats.forced_reconnects += 1;
        self.disconnect().await;
        self.failure_streak = 0;
        self.connect_until_ready(token, ctx).await
    }

    /// Close the link and report the error status
    pub async fn disconnect(&mut self) {
        self.close().await;
        self.report(true);
    }

    /// Close the link without touching the status point
    pub async fn close(&mut self) {
        if self.state != ConnectionState::Disconnected || self.transport.is_connected() {
            self.transport.disconnect().await;
            self.stats.disconnections += 1;
            debug!(device = %self.key, "PLC disconnected");
        }
        self.state = ConnectionState::Disconnected;
    }

    fn report(&mut self, error: bool) {
        if let Some(value) = self.status.update(error) {
            debug!(device = %self.key, error = value, "PLC connection status changed");
            publish(
                &self.deliveries,
                Delivery::status(&self.key, PLC_ERROR_POINT, value),
            );
        }
    }
}
