//! Link configuration
//!
//! Priority (highest to lowest):
//! 1. Explicit overrides applied by the caller (command line)
//! 2. Environment variables (`ELSTER_` prefix, e.g. `ELSTER_REQUEST_TIMEOUT_MS`)
//! 3. Config file (toml, yaml or json)
//! 4. Default values

use std::path::Path;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Json, Serialized, Toml, Yaml},
    Figment,
};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{ElsterError, Result};
use crate::frame::MAX_STANDARD_ID;
use crate::matcher::DEFAULT_REQUEST_TIMEOUT;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "ELSTER_";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ElsterConfig {
    /// CAN interface name (`can0`, `slcan0`, or `virtual`)
    pub interface: String,
    /// Our own bus id, used as the arbitration id of requests.
    /// Strings are read as hex (`"680"`, `"0x680"`), numbers as given.
    #[serde(deserialize_with = "deserialize_bus_id")]
    pub sender_id: u16,
    /// Reply deadline per register request
    pub request_timeout_ms: u64,
    /// Report raw frames instead of decoded register lines
    pub raw_log: bool,
}

impl Default for ElsterConfig {
    fn default() -> Self {
        Self {
            interface: "can0".to_string(),
            sender_id: 0x680,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT.as_millis() as u64,
            raw_log: false,
        }
    }
}

impl ElsterConfig {
    /// Load defaults, then an optional file, then `ELSTER_*` environment variables
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(ElsterConfig::default()));

        if let Some(path) = path {
            if !path.exists() {
                return Err(ElsterError::config(format!(
                    "Config file not found: {}",
                    path.display()
                )));
            }
            figment = merge_file(figment, path)?;
        }

        let config: ElsterConfig = figment.merge(Env::prefixed(ENV_PREFIX)).extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.interface.trim().is_empty() {
            return Err(ElsterError::config("interface must not be empty"));
        }
        if self.sender_id > MAX_STANDARD_ID {
            return Err(ElsterError::config(format!(
                "sender_id 0x{:X} exceeds the 11-bit range",
                self.sender_id
            )));
        }
        if self.request_timeout_ms == 0 {
            return Err(ElsterError::config("request_timeout_ms must be positive"));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Parse a hex number with or without `0x` prefix
pub fn parse_hex_u16(s: &str) -> Result<u16> {
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    u16::from_str_radix(digits, 16)
        .map_err(|e| ElsterError::invalid_value(format!("invalid hex number '{s}': {e}")))
}

fn deserialize_bus_id<'de, D>(deserializer: D) -> std::result::Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum BusId {
        Number(u16),
        Hex(String),
    }

    match BusId::deserialize(deserializer)? {
        BusId::Number(id) => Ok(id),
        BusId::Hex(text) => parse_hex_u16(text.trim()).map_err(serde::de::Error::custom),
    }
}

fn merge_file(figment: Figment, path: &Path) -> Result<Figment> {
    let extension = path
        .extension()
        .and_then(|s| s.to_str())
        .ok_or_else(|| ElsterError::config("Config file must have an extension"))?;

    match extension {
        "toml" => Ok(figment.merge(Toml::file(path))),
        "yaml" | "yml" => Ok(figment.merge(Yaml::file(path))),
        "json" => Ok(figment.merge(Json::file(path))),
        other => Err(ElsterError::config(format!(
            "Unsupported config file format: {other}"
        ))),
    }
}
