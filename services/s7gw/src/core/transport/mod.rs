//! Transport layer
//!
//! - `traits`: the `PlcTransport` seam implemented by the external S7 client
//! - `mock`: in-memory transport used by tests and simulations

pub mod mock;
pub mod traits;

pub use mock::{MockCall, MockPlcHandle, MockPlcTransport, MockTransportFactory};
pub use traits::{
    DataItem, ItemStatus, PlcTransport, TransportError, TransportFactory, TransportSettings,
};
