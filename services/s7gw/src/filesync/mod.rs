//! Touch-panel file synchronisation
//!
//! - `protocol`: wire constants, command parsing and the split-marker scanner
//! - `session`: the per-target connect/handshake/transfer state machine
//! - `supervisor`: one-session-per-device handover

pub mod protocol;
pub mod session;
pub mod supervisor;

pub use protocol::{Command, MarkerScanner, ScanResult, DRV_ACK, PNL_ACK};
pub use session::{FileSyncParams, FileSyncPhase, FileSyncSession};
pub use supervisor::FileSyncSupervisor;
