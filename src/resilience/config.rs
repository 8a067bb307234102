//! # Circuit Breaker Configuration
//!
//! Runtime form of the receive circuit breaker settings. The file-facing
//! form lives in `crate::config::CircuitBreakerSettings`.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a single circuit breaker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before opening circuit
    pub failure_threshold: u32,

    /// Time to wait in open state before the first probe
    pub open_duration: Duration,

    /// Upper bound for the open period while probes keep failing
    pub max_open_duration: Duration,
}

impl CircuitBreakerConfig {
    /// Open period to use after `reopen_count` consecutive failed probes
    pub fn backoff(&self, reopen_count: u32) -> Duration {
        let factor = 2u32.saturating_pow(reopen_count.min(16));
        self.open_duration
            .checked_mul(factor)
            .unwrap_or(self.max_open_duration)
            .min(self.max_open_duration)
    }

    /// Validate configuration parameters
    pub fn validate(&self) -> Result<(), String> {
        if self.failure_threshold == 0 {
            return Err("failure_threshold must be greater than 0".to_string());
        }

        if self.failure_threshold > 100 {
            return Err("failure_threshold should not exceed 100".to_string());
        }

        if self.open_duration.is_zero() {
            return Err("open_duration must be greater than 0".to_string());
        }

        if self.max_open_duration < self.open_duration {
            return Err("max_open_duration must not be shorter than open_duration".to_string());
        }

        if self.max_open_duration > Duration::from_secs(300) {
            return Err("max_open_duration should not exceed 300 seconds".to_string());
        }

        Ok(())
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_duration: Duration::from_secs(1),
            max_open_duration: Duration::from_secs(30),
        }
    }
}
