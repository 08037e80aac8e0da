//! S7 Gateway Library (s7gw)
//!
//! Polls S7-200 family PLCs for host-registered variables and keeps a
//! touch-panel file channel alive next to each PLC.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────┐   add/remove/write   ┌──────────────┐  batches  ┌──────────────┐
//! │   Host   │─────────────────────►│   Gateway    │──────────►│ PlcTransport │
//! │          │◄─────── DataSink ────│ (per device) │           └──────────────┘
//! └──────────┘                      │   session    │  TCP      ┌──────────────┐
//!                                   │  + file sync │──────────►│ Touch panel  │
//!                                   └──────────────┘           └──────────────┘
//! ```
//!
//! - **`address`**: textual S7 address grammar
//! - **`codec`**: value widths and big-endian payloads
//! - **`core`**: connection lifecycle, variable store, batch scheduler and device loop
//! - **`filesync`**: panel handshake, encrypted user file and log upload
//! - **`crypto`**: DES block encryption for the panel user file
//! - **`runtime`**: cancellation, standby and backoff helpers
//! - **`gateway`**: the host-facing registry

pub mod address;
pub mod codec;
pub mod config;
pub mod core;
pub mod crypto;
pub mod error;
pub mod filesync;
pub mod gateway;
pub mod runtime;

pub use address::{Address, AddressError, Area, WordKind};
pub use codec::{Value, ValueKind};
pub use config::GatewayConfig;
pub use crate::core::delivery::{DataSink, DeviceKey};
pub use crate::core::transport::{PlcTransport, TransportError, TransportFactory, TransportSettings};
pub use error::{GatewayError, Result};
pub use gateway::{Gateway, DRIVER_VERSION};
pub use runtime::RuntimeContext;
