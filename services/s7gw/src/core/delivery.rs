//! Upward delivery of read results and status points
//!
//! Sessions push `Delivery` messages into an unbounded channel; a consumer
//! task drains it into the host's `DataSink`.

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{GatewayError, Result};

/// Status point: PLC connection error
pub const PLC_ERROR_POINT: &str = "_Error";
/// Status point: touch-panel connection error
pub const PANEL_ERROR_POINT: &str = "_touchConError";
/// Driver version point, published once at start
pub const VERSION_ADDRESS: &str = "_VERSION";

/// Host-side consumer of delivered values
pub trait DataSink: Send + Sync {
    /// Called once per successfully read item or status change
    fn deliver(&self, address: &str, byte_length: u16, payload: &[u8]);
}

/// One value travelling upward
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub address: String,
    pub payload: Vec<u8>,
}

impl Delivery {
    pub fn new(address: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            address: address.into(),
            payload,
        }
    }

    /// One-byte boolean status point
    pub fn status(key: &DeviceKey, point: &str, error: bool) -> Self {
        Self::new(key.point_address(point), vec![u8::from(error)])
    }

    /// Payload length as the host sees it; `None` above `u16::MAX`
    pub fn byte_len(&self) -> Option<u16> {
        u16::try_from(self.payload.len()).ok()
    }
}

pub type DeliveryTx = mpsc::UnboundedSender<Delivery>;
pub type DeliveryRx = mpsc::UnboundedReceiver<Delivery>;

/// Queue a delivery; a closed channel means the gateway is shutting down
pub fn publish(tx: &DeliveryTx, delivery: Delivery) {
    if let Err(e) = tx.send(delivery) {
        debug!(address = %e.0.address, "Delivery dropped, consumer gone");
    }
}

/// Drain the channel into the sink until every sender is dropped
pub fn spawn_consumer(mut rx: DeliveryRx, sink: Arc<dyn DataSink>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(delivery) = rx.recv().await {
            match delivery.byte_len() {
                Some(len) => sink.deliver(&delivery.address, len, &delivery.payload),
                None => warn!(
                    address = %delivery.address,
                    len = delivery.payload.len(),
                    "Dropping delivery longer than 65535 bytes"
                ),
            }
        }
        info!("Delivery consumer stopped");
    })
}

/// Device identity: PLC IP plus optional touch-panel IP
///
/// Written as `"<plcIP>;<panelIP>"`; the panel part may be missing or empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceKey {
    plc_ip: String,
    panel_ip: Option<String>,
}

impl DeviceKey {
    pub fn parse(raw: &str) -> Result<Self> {
        let (plc, panel) = match raw.split_once(';') {
            Some((plc, panel)) => (plc.trim(), panel.trim()),
            None => (raw.trim(), ""),
        };
        if plc.is_empty() {
            return Err(GatewayError::InvalidDeviceKey(format!(
                "'{}' has no PLC address",
                raw
            )));
        }
        Ok(Self {
            plc_ip: plc.to_string(),
            panel_ip: (!panel.is_empty()).then(|| panel.to_string()),
        })
    }

    pub fn plc_ip(&self) -> &str {
        &self.plc_ip
    }

    pub fn panel_ip(&self) -> Option<&str> {
        self.panel_ip.as_deref()
    }

    /// `<key>$<raw>$<poll>` for a data item
    pub fn data_address(&self, raw: &str, poll_interval_secs: u64) -> String {
        format!("{}${}${}", self, raw, poll_interval_secs)
    }

    /// `<key>$<point>` for a status point
    pub fn point_address(&self, point: &str) -> String {
        format!("{}${}", self, point)
    }
}

impl fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.panel_ip {
            Some(panel) => write!(f, "{};{}", self.plc_ip, panel),
            None => write!(f, "{}", self.plc_ip),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingSink(Mutex<Vec<(String, u16, Vec<u8>)>>);

    impl DataSink for RecordingSink {
        fn deliver(&self, address: &str, byte_length: u16, payload: &[u8]) {
            self.0
                .lock()
                .push((address.to_string(), byte_length, payload.to_vec()));
        }
    }

    #[test]
    fn test_device_key_forms() {
        let key = DeviceKey::parse("10.0.0.5;10.0.0.6").unwrap();
        assert_eq!(key.plc_ip(), "10.0.0.5");
        assert_eq!(key.panel_ip(), Some("10.0.0.6"));
        assert_eq!(key.to_string(), "10.0.0.5;10.0.0.6");

        let key = DeviceKey::parse("10.0.0.5;").unwrap();
        assert_eq!(key.panel_ip(), None);
        assert_eq!(key.to_string(), "10.0.0.5");

        let key = DeviceKey::parse("10.0.0.5").unwrap();
        assert_eq!(key.panel_ip(), None);

        assert!(DeviceKey::parse(";10.0.0.6").is_err());
    }

    #[test]
    fn test_address_formats() {
        let key = DeviceKey::parse("1.2.3.4;5.6.7.8").unwrap();
        assert_eq!(key.data_address("VW10", 5), "1.2.3.4;5.6.7.8$VW10$5");
        assert_eq!(key.point_address(PLC_ERROR_POINT), "1.2.3.4;5.6.7.8$_Error");

        let status = Delivery::status(&key, PANEL_ERROR_POINT, true);
        assert_eq!(status.address, "1.2.3.4;5.6.7.8$_touchConError");
        assert_eq!(status.payload, vec![1]);
        assert_eq!(status.byte_len(), Some(1));
    }

    #[tokio::test]
    async fn test_consumer_drains_into_sink() {
        let sink = Arc::new(RecordingSink::default());
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = spawn_consumer(rx, sink.clone());

        publish(&tx, Delivery::new("a", vec![1, 2]));
        publish(&tx, Delivery::new("b", vec![3]));
        drop(tx);
        handle.await.unwrap();

        let got = sink.0.lock().clone();
        assert_eq!(
            got,
            vec![("a".to_string(), 2, vec![1, 2]), ("b".to_string(), 1, vec![3])]
        );
    }

    #[tokio::test]
    async fn test_oversize_delivery_not_truncated() {
        let sink = Arc::new(RecordingSink::default());
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = spawn_consumer(rx, sink.clone());

        let largest = Delivery::new("max", vec![0; 65535]);
        assert_eq!(largest.byte_len(), Some(u16::MAX));
        let oversize = Delivery::new("big", vec![0; 65536]);
        assert_eq!(oversize.byte_len(), None);

        publish(&tx, oversize);
        publish(&tx, largest);
        drop(tx);
        handle.await.unwrap();

        let got = sink.0.lock().clone();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].0, "max");
        assert_eq!(got[0].1, u16::MAX);
        assert_eq!(got[0].2.len(), 65535);
    }
}
