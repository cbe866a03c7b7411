//! Runtime configuration model (`schemaVersion: 1`).
//!
//! Constraints:
//! - every key is optional; missing keys take the defaults below
//! - `scan.periodMs` and `plant.ioTimeoutMs` must be non-zero

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const SCHEMA_VERSION_V1: u32 = 1;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unsupported schemaVersion: {0}")]
    UnsupportedSchemaVersion(u32),

    #[error("invalid {field}: {message}")]
    Invalid { field: &'static str, message: String },
}

fn default_schema_version() -> u32 {
    SCHEMA_VERSION_V1
}

fn default_program_path() -> PathBuf {
    PathBuf::from("plc_programs/hvac_control.st")
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub unit_id: u8,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:502".to_string(),
            unit_id: 1,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct PlantConfig {
    pub host: String,
    pub port: u16,
    pub unit_id: u8,
    pub io_timeout_ms: u32,
    /// Wait before the first connection attempt.
    pub startup_delay_ms: u32,
}

impl Default for PlantConfig {
    fn default() -> Self {
        Self {
            host: "physical-model".to_string(),
            port: 503,
            unit_id: 1,
            io_timeout_ms: 1000,
            startup_delay_ms: 2000,
        }
    }
}

impl PlantConfig {
    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(u64::from(self.io_timeout_ms))
    }

    pub fn startup_delay(&self) -> Duration {
        Duration::from_millis(u64::from(self.startup_delay_ms))
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ScanConfig {
    pub period_ms: u32,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self { period_ms: 100 }
    }
}

impl ScanConfig {
    pub fn period(&self) -> Duration {
        Duration::from_millis(u64::from(self.period_ms))
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlcConfigV1 {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    #[serde(default = "default_program_path")]
    pub program_path: PathBuf,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub plant: PlantConfig,
    #[serde(default)]
    pub scan: ScanConfig,
}

impl Default for PlcConfigV1 {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION_V1,
            program_path: default_program_path(),
            server: ServerConfig::default(),
            plant: PlantConfig::default(),
            scan: ScanConfig::default(),
        }
    }
}

impl PlcConfigV1 {
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let config: PlcConfigV1 = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.schema_version != SCHEMA_VERSION_V1 {
            return Err(ConfigError::UnsupportedSchemaVersion(self.schema_version));
        }
        if self.scan.period_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "scan.periodMs",
                message: "must be greater than 0".to_string(),
            });
        }
        if self.plant.io_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "plant.ioTimeoutMs",
                message: "must be greater than 0".to_string(),
            });
        }
        if self.plant.host.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "plant.host",
                message: "must not be empty".to_string(),
            });
        }
        Ok(())
    }
}
