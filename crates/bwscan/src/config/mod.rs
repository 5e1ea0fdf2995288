//! Scan configuration: layered so a TOML file supplies the base,
//! environment variables (wired through clap's `env = "..."` under the
//! `cli` feature) override it, and explicit CLI flags override both.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    #[serde(default = "default_partitions")]
    pub partitions: usize,
    #[serde(default = "default_this_partition")]
    pub this_partition: usize,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_circuit_launch_delay_ms")]
    pub circuit_launch_delay_ms: u64,
    #[serde(default = "default_request_limit")]
    pub request_limit: usize,
    #[serde(default)]
    pub scan_continuous: bool,
    #[serde(default = "default_circuit_build_timeout_secs")]
    pub circuit_build_timeout_secs: u64,
    #[serde(default = "default_circuit_idle_timeout_secs")]
    pub circuit_idle_timeout_secs: u64,
    #[serde(default = "default_slice_width")]
    pub slice_width: usize,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    /// Host of the calibrated-payload HTTP server; required to issue any
    /// fetch at all.
    #[serde(default = "default_payload_host")]
    pub payload_host: String,
    #[serde(default = "default_payload_port")]
    pub payload_port: u16,
}

fn default_partitions() -> usize {
    1
}
fn default_this_partition() -> usize {
    1
}
fn default_request_timeout_secs() -> u64 {
    60
}
fn default_circuit_launch_delay_ms() -> u64 {
    1000
}
fn default_request_limit() -> usize {
    10
}
fn default_circuit_build_timeout_secs() -> u64 {
    60
}
fn default_circuit_idle_timeout_secs() -> u64 {
    60
}
fn default_slice_width() -> usize {
    crate::path::DEFAULT_SLICE_WIDTH
}
fn default_data_dir() -> String {
    "./data".into()
}
fn default_payload_host() -> String {
    "127.0.0.1".into()
}
fn default_payload_port() -> u16 {
    8080
}

impl ScanConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content =
            std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io(e.to_string()))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.partitions == 0 {
            return Err(ConfigError::Validation("partitions must be >= 1".into()));
        }
        if !(1..=self.partitions).contains(&self.this_partition) {
            return Err(ConfigError::Validation(
                "this_partition must be in 1..=partitions".into(),
            ));
        }
        if self.request_limit == 0 {
            return Err(ConfigError::Validation("request_limit must be >= 1".into()));
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Validation("request_timeout_secs must be >= 1".into()));
        }
        Ok(())
    }

    pub fn minimal() -> Self {
        Self {
            partitions: default_partitions(),
            this_partition: default_this_partition(),
            request_timeout_secs: default_request_timeout_secs(),
            circuit_launch_delay_ms: default_circuit_launch_delay_ms(),
            request_limit: default_request_limit(),
            scan_continuous: false,
            circuit_build_timeout_secs: default_circuit_build_timeout_secs(),
            circuit_idle_timeout_secs: default_circuit_idle_timeout_secs(),
            slice_width: default_slice_width(),
            data_dir: default_data_dir(),
            payload_host: default_payload_host(),
            payload_port: default_payload_port(),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn circuit_launch_delay(&self) -> Duration {
        Duration::from_millis(self.circuit_launch_delay_ms)
    }

    pub fn circuit_build_timeout(&self) -> Duration {
        Duration::from_secs(self.circuit_build_timeout_secs)
    }

    pub fn circuit_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.circuit_idle_timeout_secs)
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self::minimal()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(String),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("validation error: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_validates() {
        assert!(ScanConfig::minimal().validate().is_ok());
    }

    #[test]
    fn rejects_this_partition_out_of_range() {
        let mut config = ScanConfig::minimal();
        config.partitions = 3;
        config.this_partition = 4;
        assert!(config.validate().is_err());
    }

    #[test]
    fn parses_toml_overrides() {
        let toml = r#"
            partitions = 4
            this_partition = 2
            request_limit = 20
        "#;
        let config = ScanConfig::from_toml(toml).unwrap();
        assert_eq!(config.partitions, 4);
        assert_eq!(config.this_partition, 2);
        assert_eq!(config.request_limit, 20);
        assert_eq!(config.request_timeout_secs, default_request_timeout_secs());
    }
}
