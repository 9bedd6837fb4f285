//! Router configuration.

use crate::{RouterError, RouterResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for one node-local router instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Human-readable name reported to the server at bind time and
    /// recorded with the placement engine alongside the node identity.
    pub display_name: String,

    /// Interval between scheduler tick events (milliseconds).
    pub tick_interval_ms: u64,
}

/// Default scheduler tick period.
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 3_000;

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            display_name: "weft-node".to_string(),
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
        }
    }
}

impl RouterConfig {
    pub fn with_display_name(name: impl Into<String>) -> Self {
        Self {
            display_name: name.into(),
            ..Self::default()
        }
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Validate configuration parameters
    pub fn validate(&self) -> RouterResult<()> {
        if self.display_name.is_empty() {
            return Err(RouterError::Config(
                "display_name must not be empty".to_string(),
            ));
        }

        if self.tick_interval_ms < 100 {
            return Err(RouterError::Config(
                "tick_interval_ms must be >= 100".to_string(),
            ));
        }

        Ok(())
    }
}
