//! Gateway configuration
//!
//! Loaded with figment: built-in defaults, then a YAML file, then
//! `S7GW_`-prefixed environment variables (nested keys split on `__`,
//! e.g. `S7GW_PLC__REMOTE_TSAP=0x0200`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use common::LoggingConfig;
use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, Result};

/// Default configuration file location
pub const DEFAULT_CONFIG_PATH: &str = "config/s7gw.yaml";

/// Environment variable prefix
pub const ENV_PREFIX: &str = "S7GW_";

/// Fallback when the configured default polling interval is 0
pub const FALLBACK_POLL_INTERVAL_SECS: u64 = 2;

/// Root configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub plc: PlcConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub file_sync: FileSyncConfig,
    #[serde(default)]
    pub shutdown: ShutdownConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// PLC link settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlcConfig {
    /// Local TSAP as hex (`"0x1000"` or `"1000"`)
    pub local_tsap: String,
    /// Remote TSAP as hex
    pub remote_tsap: String,
    /// Seconds between reconnect attempts
    pub reconnect_interval_secs: u64,
    /// Consecutive failed batches before a forced reconnect
    pub max_consecutive_failures: u32,
}

impl Default for PlcConfig {
    fn default() -> Self {
        Self {
            local_tsap: "0x1000".to_string(),
            remote_tsap: "0x1001".to_string(),
            reconnect_interval_secs: 5,
            max_consecutive_failures: 5,
        }
    }
}

impl PlcConfig {
    pub fn local_tsap(&self) -> Result<u16> {
        parse_hex_u16(&self.local_tsap)
    }

    pub fn remote_tsap(&self) -> Result<u16> {
        parse_hex_u16(&self.remote_tsap)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_secs(self.reconnect_interval_secs)
    }
}

/// Polling cadence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    /// Global minimum interval; 0 falls back to 2 seconds
    pub default_interval_secs: u64,
    /// Target duration of one polling cycle
    pub cycle_interval_ms: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            default_interval_secs: FALLBACK_POLL_INTERVAL_SECS,
            cycle_interval_ms: 1000,
        }
    }
}

impl PollingConfig {
    pub fn default_interval(&self) -> Duration {
        match self.default_interval_secs {
            0 => Duration::from_secs(FALLBACK_POLL_INTERVAL_SECS),
            secs => Duration::from_secs(secs),
        }
    }

    pub fn cycle_interval(&self) -> Duration {
        Duration::from_millis(self.cycle_interval_ms)
    }
}

/// Packing limits for one direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchLimits {
    /// Maximum items in one multi-item call
    pub max_items: usize,
    /// Protocol overhead per item
    pub variable_overhead: usize,
    /// Protocol overhead per message
    pub message_overhead: usize,
}

/// PDU budget and per-direction limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    pub pdu_size: usize,
    pub read: BatchLimits,
    pub write: BatchLimits,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            pdu_size: 240,
            read: BatchLimits {
                max_items: 19,
                variable_overhead: 5,
                message_overhead: 13,
            },
            write: BatchLimits {
                max_items: 12,
                variable_overhead: 16,
                message_overhead: 12,
            },
        }
    }
}

/// Touch-panel file synchronisation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileSyncConfig {
    pub enabled: bool,
    /// TCP port on the panel
    pub port: u16,
    /// File sent encrypted on a `User` request
    pub user_file: PathBuf,
    /// Destination for measurement log files
    pub measurement_dir: PathBuf,
    /// Destination after the panel sends `Event`
    pub event_dir: PathBuf,
    pub connect_timeout_secs: u64,
    pub receive_timeout_secs: u64,
    pub short_backoff_secs: u64,
    pub long_backoff_secs: u64,
    /// Consecutive connect failures that use the short backoff
    pub short_backoff_attempts: u32,
}

impl Default for FileSyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 20248,
            user_file: PathBuf::from("data/users.txt"),
            measurement_dir: PathBuf::from("data/measurements"),
            event_dir: PathBuf::from("data/events"),
            connect_timeout_secs: 10,
            receive_timeout_secs: 120,
            short_backoff_secs: 4,
            long_backoff_secs: 10,
            short_backoff_attempts: 3,
        }
    }
}

impl FileSyncConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_secs(self.receive_timeout_secs)
    }
}

/// Graceful shutdown
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownConfig {
    /// Upper bound when waiting for a session task to exit
    pub join_timeout_secs: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            join_timeout_secs: 10,
        }
    }
}

impl ShutdownConfig {
    pub fn join_timeout(&self) -> Duration {
        Duration::from_secs(self.join_timeout_secs)
    }
}

impl GatewayConfig {
    /// Load from `S7GW_CONFIG` or the default path, then the environment
    pub fn load() -> Result<Self> {
        let path = std::env::var("S7GW_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        if !Path::new(&path).exists() {
            tracing::warn!("Config file {} not found, using defaults", path);
        }
        Self::from_file(path)
    }

    /// Load from an explicit YAML file, then the environment
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config: Self = Figment::from(Serialized::defaults(Self::default()))
            .merge(Yaml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;

        config.validate()?;
        Ok(config)
    }

    /// Reject values the runtime cannot work with
    pub fn validate(&self) -> Result<()> {
        self.plc.local_tsap()?;
        self.plc.remote_tsap()?;

        if self.plc.max_consecutive_failures == 0 {
            return Err(GatewayError::Config(
                "plc.max_consecutive_failures must be greater than 0".into(),
            ));
        }
        if self.polling.cycle_interval_ms == 0 {
            return Err(GatewayError::Config(
                "polling.cycle_interval_ms must be greater than 0".into(),
            ));
        }
        if self.batch.pdu_size == 0 {
            return Err(GatewayError::Config("batch.pdu_size must be greater than 0".into()));
        }
        for (name, limits) in [("read", &self.batch.read), ("write", &self.batch.write)] {
            if limits.max_items == 0 {
                return Err(GatewayError::Config(format!(
                    "batch.{}.max_items must be greater than 0",
                    name
                )));
            }
        }
        if self.file_sync.enabled && self.file_sync.port == 0 {
            return Err(GatewayError::Config("file_sync.port must be greater than 0".into()));
        }

        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {},
            other => {
                return Err(GatewayError::Config(format!("Invalid log level: {}", other)));
            },
        }

        Ok(())
    }
}

/// Parse a TSAP written in base 16, with or without `0x`
pub fn parse_hex_u16(value: &str) -> Result<u16> {
    let trimmed = value.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    u16::from_str_radix(digits, 16)
        .map_err(|e| GatewayError::Config(format!("Invalid TSAP '{}': {}", value, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_defaults() {
        let config = GatewayConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.batch.pdu_size, 240);
        assert_eq!(config.batch.read.max_items, 19);
        assert_eq!(config.batch.write.variable_overhead, 16);
        assert_eq!(config.file_sync.port, 20248);
        assert_eq!(config.plc.reconnect_interval(), Duration::from_secs(5));
    }

    #[test]
    fn test_zero_default_interval_falls_back() {
        let polling = PollingConfig {
            default_interval_secs: 0,
            cycle_interval_ms: 1000,
        };
        assert_eq!(polling.default_interval(), Duration::from_secs(2));
    }

    #[test]
    fn test_hex_tsap() {
        assert_eq!(parse_hex_u16("0x0100").unwrap(), 0x0100);
        assert_eq!(parse_hex_u16("4D57").unwrap(), 0x4D57);
        assert!(parse_hex_u16("xyz").is_err());
        assert!(parse_hex_u16("0x10000").is_err());
    }

    #[test]
    fn test_yaml_and_env_layering() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "s7gw.yaml",
                r#"
plc:
  remote_tsap: "0x0200"
polling:
  default_interval_secs: 3
file_sync:
  port: 30000
"#,
            )?;
            jail.set_env("S7GW_BATCH__PDU_SIZE", "480");
            jail.set_env("S7GW_FILE_SYNC__ENABLED", "false");

            let config = GatewayConfig::from_file("s7gw.yaml").expect("config loads");
            assert_eq!(config.plc.remote_tsap().unwrap(), 0x0200);
            assert_eq!(config.plc.local_tsap().unwrap(), 0x1000);
            assert_eq!(config.polling.default_interval(), Duration::from_secs(3));
            assert_eq!(config.file_sync.port, 30000);
            assert!(!config.file_sync.enabled);
            assert_eq!(config.batch.pdu_size, 480);
            assert_eq!(config.batch.read.max_items, 19);
            Ok(())
        });
    }

    #[test]
    fn test_shipped_sample_matches_defaults() {
        Jail::expect_with(|_jail| {
            let path = concat!(env!("CARGO_MANIFEST_DIR"), "/config/s7gw.yaml");
            let config = GatewayConfig::from_file(path).expect("sample loads");
            let defaults = GatewayConfig::default();
            assert_eq!(config.batch.read, defaults.batch.read);
            assert_eq!(config.batch.write, defaults.batch.write);
            assert_eq!(config.plc.local_tsap, defaults.plc.local_tsap);
            assert_eq!(config.file_sync.user_file, defaults.file_sync.user_file);
            Ok(())
        });
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = GatewayConfig::default();
        config.batch.pdu_size = 0;
        assert!(matches!(config.validate(), Err(GatewayError::Config(_))));

        let mut config = GatewayConfig::default();
        config.plc.local_tsap = "zz".into();
        assert!(config.validate().is_err());

        let mut config = GatewayConfig::default();
        config.batch.write.max_items = 0;
        assert!(config.validate().is_err());

        let mut config = GatewayConfig::default();
        config.logging.level = "loud".into();
        assert!(config.validate().is_err());
    }
}
