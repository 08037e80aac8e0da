//! Polling core: transport seam, connection lifecycle, variable store,
//! batch scheduling and the per-device session loop

pub mod connection;
pub mod delivery;
pub mod scheduler;
pub mod session;
pub mod store;
pub mod transport;

pub use connection::{ConnectOutcome, ConnectionManager, ConnectionState, ConnectionStats};
pub use delivery::{
    DataSink, Delivery, DeliveryRx, DeliveryTx, DeviceKey, PANEL_ERROR_POINT, PLC_ERROR_POINT,
    VERSION_ADDRESS,
};
pub use scheduler::{plan_batches, BatchPlan, BatchScheduler, Direction, SchedulerStats};
pub use session::DeviceSession;
pub use store::{DueItem, Variable, VariableStore};
