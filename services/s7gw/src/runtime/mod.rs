//! Runtime orchestration helpers shared by the device and file-sync sessions

pub mod context;
pub mod reconnect;

pub use context::{sleep_or_cancel, RuntimeContext};
pub use reconnect::{ConnectBackoff, StatusFlag};
