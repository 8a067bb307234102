//! # Circuit Breaker Metrics
//!
//! Counters kept by a receive circuit breaker. The message pump publishes
//! them after every receive attempt as `PumpStats::circuit`.

use crate::resilience::CircuitState;
use serde::{Deserialize, Serialize};

/// Metrics for a single circuit breaker instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerMetrics {
    /// Total number of calls attempted
    pub total_calls: u64,

    /// Number of successful calls
    pub success_count: u64,

    /// Number of failed calls
    pub failure_count: u64,

    /// Current consecutive failure count
    pub consecutive_failures: u32,

    /// Calls rejected without executing because the circuit was open
    pub rejected_calls: u64,

    /// Number of times the circuit opened from closed
    pub times_opened: u64,

    /// Current circuit breaker state
    pub current_state: CircuitState,
}

impl CircuitBreakerMetrics {
    /// Create new metrics instance with zero values
    pub fn new() -> Self {
        Self {
            total_calls: 0,
            success_count: 0,
            failure_count: 0,
            consecutive_failures: 0,
            rejected_calls: 0,
            times_opened: 0,
            current_state: CircuitState::Closed,
        }
    }
}

impl Default for CircuitBreakerMetrics {
    fn default() -> Self {
        Self::new()
    }
}
