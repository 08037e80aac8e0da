//! Host-facing device registry
//!
//! The host registers variables per device key (`"<plcIP>;<panelIP>"`).
//! The first variable of a new key spawns its polling task and, when a
//! panel address is present, its file-sync session. Removing the last
//! variable stops both and waits for them to drain.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex as SyncMutex;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::address::Address;
use crate::codec::fit_payload;
use crate::config::GatewayConfig;
use crate::core::connection::ConnectionManager;
use crate::core::delivery::{
    publish, spawn_consumer, DataSink, Delivery, DeliveryTx, DeviceKey, VERSION_ADDRESS,
};
use crate::core::scheduler::BatchScheduler;
use crate::core::session::DeviceSession;
use crate::core::store::VariableStore;
use crate::core::transport::{TransportFactory, TransportSettings};
use crate::error::{GatewayError, Result};
use crate::filesync::FileSyncSupervisor;
use crate::runtime::RuntimeContext;

/// Driver version published under `_VERSION`
pub const DRIVER_VERSION: &str = env!("CARGO_PKG_VERSION");

struct DeviceEntry {
    store: Arc<VariableStore>,
    token: CancellationToken,
    handle: JoinHandle<()>,
    file_sync: Arc<FileSyncSupervisor>,
}

/// Registry of device sessions
pub struct Gateway {
    config: GatewayConfig,
    transports: Arc<dyn TransportFactory>,
    ctx: RuntimeContext,
    local_tsap: u16,
    remote_tsap: u16,
    deliveries: SyncMutex<Option<DeliveryTx>>,
    consumer: SyncMutex<Option<JoinHandle<()>>>,
    devices: Mutex<HashMap<DeviceKey, DeviceEntry>>,
}

impl Gateway {
    /// Validate the configuration, start the delivery consumer and publish
    /// the driver version
    ///
    /// Must be called inside a tokio runtime.
    pub fn new(
        config: GatewayConfig,
        transports: Arc<dyn TransportFactory>,
        sink: Arc<dyn DataSink>,
        ctx: RuntimeContext,
    ) -> Result<Self> {
        config.validate()?;
        let local_tsap = config.plc.local_tsap()?;
        let remote_tsap = config.plc.remote_tsap()?;

        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let consumer = spawn_consumer(rx, sink);
        publish(
            &tx,
            Delivery::new(VERSION_ADDRESS, DRIVER_VERSION.as_bytes().to_vec()),
        );
        info!(version = DRIVER_VERSION, "S7 gateway started");

        Ok(Self {
            config,
            transports,
            ctx,
            local_tsap,
            remote_tsap,
            deliveries: SyncMutex::new(Some(tx)),
            consumer: SyncMutex::new(Some(consumer)),
            devices: Mutex::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn context(&self) -> &RuntimeContext {
        &self.ctx
    }

    /// Register a variable, creating the device session on first use
    pub async fn add_variable(
        &self,
        device_key: &str,
        raw_address: &str,
        poll_interval_secs: u64,
    ) -> Result<()> {
        let key = DeviceKey::parse(device_key)?;
        let address = Address::parse(raw_address)
            .map_err(|e| GatewayError::invalid_address(raw_address, e))?;

        let mut devices = self.devices.lock().await;
        if !devices.contains_key(&key) {
            let entry = self.spawn_device(&key).await?;
            devices.insert(key.clone(), entry);
        }
        if let Some(entry) = devices.get(&key) {
            if entry.store.insert(raw_address, address, poll_interval_secs) {
                info!(device = %key, address = raw_address, poll = poll_interval_secs, "Variable added");
            }
        }
        Ok(())
    }

    /// Unregister a variable; the last one stops the device
    pub async fn remove_variable(&self, device_key: &str, raw_address: &str) -> Result<()> {
        let key = DeviceKey::parse(device_key)?;

        let entry = {
            let mut devices = self.devices.lock().await;
            let entry = devices
                .get(&key)
                .ok_or_else(|| GatewayError::DeviceNotFound(key.to_string()))?;
            if !entry.store.remove(raw_address) {
                return Err(GatewayError::VariableNotFound(raw_address.to_string()));
            }
            info!(device = %key, address = raw_address, "Variable removed");
            if !entry.store.is_empty() {
                return Ok(());
            }
            devices.remove(&key)
        };

        if let Some(entry) = entry {
            info!(device = %key, "Last variable removed, stopping device");
            self.stop_device(&key, entry).await;
        }
        Ok(())
    }

    /// Queue a wire-order payload for the next cycle
    pub async fn queue_write(
        &self,
        device_key: &str,
        raw_address: &str,
        payload: Vec<u8>,
    ) -> Result<()> {
        let key = DeviceKey::parse(device_key)?;
        let address = Address::parse(raw_address)
            .map_err(|e| GatewayError::invalid_address(raw_address, e))?;
        let payload = fit_payload(&address, payload)?;

        let devices = self.devices.lock().await;
        let entry = devices
            .get(&key)
            .ok_or_else(|| GatewayError::DeviceNotFound(key.to_string()))?;
        entry.store.queue_write(raw_address, payload)
    }

    /// Point the device's file-sync session at a new panel address
    pub async fn set_touch_panel_target(&self, device_key: &str, ip: &str) -> Result<()> {
        let key = DeviceKey::parse(device_key)?;
        let supervisor = {
            let devices = self.devices.lock().await;
            devices
                .get(&key)
                .map(|entry| entry.file_sync.clone())
                .ok_or_else(|| GatewayError::DeviceNotFound(key.to_string()))?
        };
        supervisor.set_target(ip).await;
        Ok(())
    }

    /// Current file-sync target of a device
    pub async fn touch_panel_target(&self, device_key: &str) -> Result<Option<String>> {
        let key = DeviceKey::parse(device_key)?;
        let supervisor = {
            let devices = self.devices.lock().await;
            devices
                .get(&key)
                .map(|entry| entry.file_sync.clone())
                .ok_or_else(|| GatewayError::DeviceNotFound(key.to_string()))?
        };
        Ok(supervisor.target().await)
    }

    /// Apply a numeric debug level: 1 info, 2 debug, 3 trace
    pub fn set_debug_level(&self, level: i16) -> Result<()> {
        let filter = common::level_for_debug(level).ok_or_else(|| {
            warn!(level, "Rejected debug level outside 1..=3");
            GatewayError::Config(format!("debug level {} outside 1..=3", level))
        })?;
        common::set_log_level(filter).map_err(|e| GatewayError::Config(e.to_string()))
    }

    /// Enter or leave standby (passive side of a redundant pair)
    pub fn set_standby(&self, standby: bool) {
        info!(standby, "Standby mode changed");
        self.ctx.set_standby(standby);
    }

    pub async fn device_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .devices
            .lock()
            .await
            .keys()
            .map(ToString::to_string)
            .collect();
        keys.sort();
        keys
    }

    pub async fn is_running(&self, device_key: &str) -> bool {
        let Ok(key) = DeviceKey::parse(device_key) else {
            return false;
        };
        self.devices
            .lock()
            .await
            .get(&key)
            .is_some_and(|entry| !entry.handle.is_finished())
    }

    /// Stop every device and flush pending deliveries
    pub async fn shutdown(&self) {
        info!("S7 gateway shutting down");
        let entries: Vec<(DeviceKey, DeviceEntry)> =
            self.devices.lock().await.drain().collect();
        for (key, entry) in entries {
            self.stop_device(&key, entry).await;
        }

        drop(self.deliveries.lock().take());
        let consumer = self.consumer.lock().take();
        if let Some(mut consumer) = consumer {
            let timeout = self.config.shutdown.join_timeout();
            if tokio::time::timeout(timeout, &mut consumer).await.is_err() {
                warn!("Delivery consumer did not finish within {:?}", timeout);
                consumer.abort();
            }
        }
        info!("S7 gateway stopped");
    }

    async fn spawn_device(&self, key: &DeviceKey) -> Result<DeviceEntry> {
        let deliveries = self
            .deliveries
            .lock()
            .clone()
            .ok_or(GatewayError::Cancelled)?;
        let settings = TransportSettings {
            ip: key.plc_ip().to_string(),
            local_tsap: self.local_tsap,
            remote_tsap: self.remote_tsap,
        };
        info!(device = %key, plc = %settings, "Creating device session");

        let conn = ConnectionManager::new(
            key.clone(),
            self.transports.create(&settings),
            self.config.plc.reconnect_interval(),
            self.config.plc.max_consecutive_failures,
            deliveries.clone(),
        );
        let store = Arc::new(VariableStore::new(self.config.polling.default_interval()));
        let token = self.ctx.child_token();

        let file_sync = Arc::new(FileSyncSupervisor::new(
            key.clone(),
            self.config.file_sync.clone(),
            self.ctx.clone(),
            token.clone(),
            deliveries.clone(),
            self.config.shutdown.join_timeout(),
        ));
        if let Some(panel) = key.panel_ip() {
            file_sync.set_target(panel).await;
        }

        let session = DeviceSession::new(
            key.clone(),
            store.clone(),
            conn,
            BatchScheduler::new(self.config.batch.clone()),
            deliveries,
            self.ctx.clone(),
            token.clone(),
            self.config.polling.cycle_interval(),
        )
        .with_file_sync(file_sync.clone());
        let handle = tokio::spawn(session.run());

        Ok(DeviceEntry {
            store,
            token,
            handle,
            file_sync,
        })
    }

    async fn stop_device(&self, key: &DeviceKey, entry: DeviceEntry) {
        entry.token.cancel();
        let timeout = self.config.shutdown.join_timeout();
        let mut handle = entry.handle;
        match tokio::time::timeout(timeout, &mut handle).await {
            Ok(Ok(())) => info!(device = %key, "Device session drained"),
            Ok(Err(e)) => warn!(device = %key, "Device task failed: {}", e),
            Err(_) => {
                warn!(device = %key, "Device session did not exit within {:?}, aborting", timeout);
                handle.abort();
            },
        }
        entry.file_sync.stop().await;
    }
}

impl Drop for Gateway {
    fn drop(&mut self) {
        for entry in self.devices.get_mut().values() {
            entry.token.cancel();
        }
    }
}
