//! Engine configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Per-machine engine settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Milliseconds between turns when a machine is driven by a polling loop.
    pub tick_rate_ms: u64,
    /// Upper bound on cycles in a recursive turn. `None` never gives up.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_cycles: Option<u32>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_rate_ms: 1000,
            max_cycles: None,
        }
    }
}

impl EngineConfig {
    /// Applies `TICKFSM_TICK_RATE_MS` and `TICKFSM_MAX_CYCLES` overrides.
    ///
    /// `TICKFSM_MAX_CYCLES=0` (or `none`) removes the bound.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(rate) = std::env::var("TICKFSM_TICK_RATE_MS") {
            if let Ok(ms) = rate.parse() {
                self.tick_rate_ms = ms;
            }
        }

        if let Ok(max) = std::env::var("TICKFSM_MAX_CYCLES") {
            match max.to_lowercase().as_str() {
                "0" | "none" => self.max_cycles = None,
                s => {
                    if let Ok(n) = s.parse() {
                        self.max_cycles = Some(n);
                    }
                }
            }
        }
    }

    /// Returns the tick rate as a Duration.
    pub fn tick_rate(&self) -> Duration {
        Duration::from_millis(self.tick_rate_ms)
    }

    pub fn with_tick_rate(mut self, rate: Duration) -> Self {
        self.tick_rate_ms = rate.as_millis() as u64;
        self
    }

    pub fn with_max_cycles(mut self, limit: u32) -> Self {
        self.max_cycles = Some(limit);
        self
    }
}
