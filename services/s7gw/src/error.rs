//! Error handling for the S7 gateway
//!
//! Every failure is local to one device or one file-sync session; nothing here
//! is fatal to the process.

use thiserror::Error;

use crate::address::AddressError;
use crate::core::transport::TransportError;

/// Gateway error type
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Address string failed the grammar; never scheduled
    #[error("Invalid address '{raw}': {source}")]
    InvalidAddress {
        raw: String,
        #[source]
        source: AddressError,
    },

    /// Transport connect error, retried while the device stays registered
    #[error("Connect failure: {0}")]
    ConnectFailure(String),

    /// A read or write call returned non-success
    #[error("Batch I/O failure: {0}")]
    BatchIo(String),

    /// Too many consecutive batch failures, forces a reconnect
    #[error("Failure streak exceeded ({0} consecutive failures)")]
    StreakExceeded(u32),

    /// Touch-panel socket or file error
    #[error("File sync error: {0}")]
    FileSync(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Unknown device key
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// Malformed `<plcIP>;<panelIP>` key
    #[error("Invalid device key: {0}")]
    InvalidDeviceKey(String),

    /// Address not registered on the device
    #[error("Variable not found: {0}")]
    VariableNotFound(String),

    /// Write payload does not fit the address
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// Input/Output errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Stop was requested while waiting
    #[error("Operation cancelled")]
    Cancelled,
}

/// Result type alias for the gateway
pub type Result<T> = std::result::Result<T, GatewayError>;

impl GatewayError {
    /// Create an invalid address error
    pub fn invalid_address(raw: impl Into<String>, source: AddressError) -> Self {
        Self::InvalidAddress {
            raw: raw.into(),
            source,
        }
    }
}

impl From<TransportError> for GatewayError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::ConnectionFailed(msg) | TransportError::Timeout(msg) => {
                Self::ConnectFailure(msg)
            },
            other => Self::BatchIo(other.to_string()),
        }
    }
}

impl From<figment::Error> for GatewayError {
    fn from(err: figment::Error) -> Self {
        Self::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_conversion() {
        let err: GatewayError = TransportError::ConnectionFailed("refused".into()).into();
        assert!(matches!(err, GatewayError::ConnectFailure(_)));

        let err: GatewayError = TransportError::ItemFailed("area".into()).into();
        assert!(matches!(err, GatewayError::BatchIo(_)));
    }

    #[test]
    fn test_error_display() {
        let err = GatewayError::invalid_address("X1", AddressError::UnknownArea('X'));
        assert_eq!(err.to_string(), "Invalid address 'X1': Unknown memory area 'X'");
    }
}
