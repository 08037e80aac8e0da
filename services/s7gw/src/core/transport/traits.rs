//! PLC transport seam
//!
//! The S7 telegram encoding lives in an external client library. The
//! gateway only decides which memory ranges go into each call and
//! interprets the per-item status that comes back.

use std::fmt;

use async_trait::async_trait;
use thiserror::Error;

use crate::address::{Address, Area, WordKind, DEFAULT_DB_NUMBER};

/// Transport layer error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Connection could not be established
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Connection dropped during a call
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// Operation timed out
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// The PLC rejected a single item
    #[error("Item failed: {0}")]
    ItemFailed(String),

    /// Malformed response or unsupported request
    #[error("Protocol error: {0}")]
    ProtocolError(String),
}

/// Status of one item inside a multi-item call
pub type ItemStatus = Result<(), TransportError>;

/// One memory range in a transport call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataItem {
    pub area: Area,
    pub word_kind: WordKind,
    pub db_number: u16,
    /// Byte offset, or bit position for bit items
    pub start: u32,
    pub amount: u32,
    /// Wire-order payload sized to the address
    pub data: Vec<u8>,
}

impl DataItem {
    /// Zeroed read buffer for an address
    pub fn for_read(addr: &Address) -> Self {
        Self::with_data(addr, vec![0; addr.byte_size()])
    }

    /// Item carrying a write payload
    pub fn with_data(addr: &Address, data: Vec<u8>) -> Self {
        Self {
            area: addr.area,
            word_kind: addr.word_kind,
            db_number: DEFAULT_DB_NUMBER,
            start: addr.transport_start(),
            amount: addr.amount,
            data,
        }
    }

    pub fn byte_size(&self) -> usize {
        self.word_kind.element_size() * self.amount as usize
    }
}

/// Connection parameters for one PLC
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportSettings {
    pub ip: String,
    pub local_tsap: u16,
    pub remote_tsap: u16,
}

impl fmt::Display for TransportSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (local TSAP {:#06x}, remote TSAP {:#06x})",
            self.ip, self.local_tsap, self.remote_tsap
        )
    }
}

/// Client for one PLC
#[async_trait]
pub trait PlcTransport: Send + fmt::Debug {
    /// Open the ISO-on-TCP session
    async fn connect(&mut self) -> Result<(), TransportError>;

    /// Close the session; never fails
    async fn disconnect(&mut self);

    fn is_connected(&self) -> bool;

    /// Read several items in one request, filling `data` of each success
    async fn read_multi(&mut self, items: &mut [DataItem])
        -> Result<Vec<ItemStatus>, TransportError>;

    /// Write several items in one request
    async fn write_multi(&mut self, items: &[DataItem]) -> Result<Vec<ItemStatus>, TransportError>;

    /// Single-item read, used for items too large for a multi-item request
    async fn read_area(&mut self, item: &mut DataItem) -> Result<(), TransportError>;

    /// Single-item write, used for items too large for a multi-item request
    async fn write_area(&mut self, item: &DataItem) -> Result<(), TransportError>;
}

/// Creates one transport per PLC
pub trait TransportFactory: Send + Sync {
    fn create(&self, settings: &TransportSettings) -> Box<dyn PlcTransport>;
}
