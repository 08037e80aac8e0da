//! Shared building blocks for the S7 gateway services
//!
//! - logging bootstrap with runtime level control

pub mod logging;

pub use logging::{
    current_log_level, init_logging, level_for_debug, set_log_level, LoggingConfig, LoggingError,
};
