//! Hub configuration.
//!
//! Sizes can be set in code or loaded from environment variables.

use crate::error::{HubError, Result};

/// Default number of labs allowed under construction at once.
pub const DEFAULT_CREATE_LIMIT: usize = 3;

/// Default low-water mark: a dispense that leaves this many labs or fewer in
/// the warm buffer schedules a replacement.
pub const DEFAULT_LOW_WATER_MARK: usize = 4;

/// Sizing of a [`Hub`](crate::Hub).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubConfig {
    /// Labs to keep started and ready in the warm buffer.
    pub warm_size: usize,
    /// Hard cap on labs outstanding at once (buffered, dispensed or being built).
    pub capacity: usize,
    /// Maximum labs under construction at once (default: 3).
    pub create_limit: usize,
    /// Replenish when the buffered count drops to this value or below (default: 4).
    pub low_water_mark: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            warm_size: 5,
            capacity: 10,
            create_limit: DEFAULT_CREATE_LIMIT,
            low_water_mark: DEFAULT_LOW_WATER_MARK,
        }
    }
}

impl HubConfig {
    /// Config with the given warm size and hard cap, other values defaulted.
    pub fn new(warm_size: usize, capacity: usize) -> Self {
        Self {
            warm_size,
            capacity,
            ..Default::default()
        }
    }

    /// Set the construction throttle.
    pub fn create_limit(mut self, n: usize) -> Self {
        self.create_limit = n;
        self
    }

    /// Set the replenishment threshold.
    pub fn low_water_mark(mut self, n: usize) -> Self {
        self.low_water_mark = n;
        self
    }

    /// Load configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `LABHUB_WARM_SIZE` | `5` |
    /// | `LABHUB_CAPACITY` | `10` |
    /// | `LABHUB_CREATE_LIMIT` | `3` |
    /// | `LABHUB_LOW_WATER_MARK` | `4` |
    ///
    /// Unparseable values fall back to the default.
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            warm_size: env_usize("LABHUB_WARM_SIZE").unwrap_or(default.warm_size),
            capacity: env_usize("LABHUB_CAPACITY").unwrap_or(default.capacity),
            create_limit: env_usize("LABHUB_CREATE_LIMIT").unwrap_or(default.create_limit),
            low_water_mark: env_usize("LABHUB_LOW_WATER_MARK").unwrap_or(default.low_water_mark),
        }
    }

    /// Check that the sizes can be used to build a hub.
    pub fn validate(&self) -> Result<()> {
        if self.warm_size > self.capacity {
            return Err(HubError::AvailableSize {
                warm_size: self.warm_size,
                capacity: self.capacity,
            });
        }
        if self.create_limit == 0 {
            return Err(HubError::InvalidConfig("create_limit must be > 0".into()));
        }
        Ok(())
    }
}

fn env_usize(key: &str) -> Option<usize> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}
