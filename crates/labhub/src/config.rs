//! Configuration for the labhub binary.
//!
//! Configuration is loaded from environment variables with sensible defaults.

use labhub_core::HubConfig;
use std::path::PathBuf;

/// Subnet prefix used by the dry-run network when none is configured.
pub const DEFAULT_NETWORK_PREFIX: &str = "172.16.5";

/// Configuration for the labhub binary.
#[derive(Debug, Clone)]
pub struct CliConfig {
    /// Path to the JSON blueprint served by the hub.
    pub blueprint_path: PathBuf,

    /// First three octets of the dry-run lab network.
    pub network_prefix: String,

    /// Warm size, hard cap and throttles of the hub.
    pub hub: HubConfig,
}

/// Configuration validation error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("LABHUB_BLUEPRINT is not set")]
    MissingBlueprint,

    #[error("blueprint file not found: {0}")]
    BlueprintNotFound(PathBuf),

    #[error("invalid network prefix: {0} (expected three octets, e.g. 172.16.5)")]
    InvalidPrefix(String),
}

impl CliConfig {
    /// Load configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `LABHUB_BLUEPRINT` | required |
    /// | `LABHUB_NETWORK_PREFIX` | `172.16.5` |
    /// | `LABHUB_WARM_SIZE` | `5` |
    /// | `LABHUB_CAPACITY` | `10` |
    /// | `LABHUB_CREATE_LIMIT` | `3` |
    /// | `LABHUB_LOW_WATER_MARK` | `4` |
    pub fn from_env() -> Result<Self, ConfigError> {
        let blueprint_path = std::env::var("LABHUB_BLUEPRINT")
            .map(PathBuf::from)
            .map_err(|_| ConfigError::MissingBlueprint)?;

        Ok(Self {
            blueprint_path,
            network_prefix: std::env::var("LABHUB_NETWORK_PREFIX")
                .unwrap_or_else(|_| DEFAULT_NETWORK_PREFIX.to_string()),
            hub: HubConfig::from_env(),
        })
    }

    /// Check that the blueprint exists and the prefix is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.blueprint_path.exists() {
            return Err(ConfigError::BlueprintNotFound(self.blueprint_path.clone()));
        }

        if !is_valid_prefix(&self.network_prefix) {
            return Err(ConfigError::InvalidPrefix(self.network_prefix.clone()));
        }

        Ok(())
    }
}

fn is_valid_prefix(prefix: &str) -> bool {
    let octets: Vec<_> = prefix.split('.').collect();
    octets.len() == 3 && octets.iter().all(|o| o.parse::<u8>().is_ok())
}
