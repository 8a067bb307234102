//! Pump lifecycle state and counters.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};

use crate::resilience::CircuitBreakerMetrics;

/// Lifecycle of a message pump
///
/// `Stopped → Starting → Running ⇄ CircuitOpen → Stopping → Stopped`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PumpState {
    Stopped,
    Starting,
    Running,
    /// Receiving suspended after sustained receive failures
    CircuitOpen,
    Stopping,
}

impl PumpState {
    pub fn is_active(&self) -> bool {
        matches!(self, PumpState::Running | PumpState::CircuitOpen)
    }
}

impl fmt::Display for PumpState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PumpState::Stopped => "stopped",
            PumpState::Starting => "starting",
            PumpState::Running => "running",
            PumpState::CircuitOpen => "circuit_open",
            PumpState::Stopping => "stopping",
        };
        f.write_str(name)
    }
}

/// Point-in-time pump statistics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PumpStats {
    pub state: PumpState,
    pub concurrency: usize,
    pub prefetch_count: u32,
    pub messages_received: u64,
    pub messages_completed: u64,
    pub messages_abandoned: u64,
    pub handler_failures: u64,
    pub receive_failures: u64,
    pub consecutive_receive_failures: u32,
    pub in_flight: usize,
    pub critical_errors_raised: u64,
    /// Receive circuit breaker counters as of the last receive attempt
    pub circuit: CircuitBreakerMetrics,
}

/// Counters shared between the pump, its receive loop and message tasks
#[derive(Debug, Default)]
pub(crate) struct PumpCounters {
    pub messages_received: AtomicU64,
    pub messages_completed: AtomicU64,
    pub messages_abandoned: AtomicU64,
    pub handler_failures: AtomicU64,
    pub receive_failures: AtomicU64,
    pub consecutive_receive_failures: AtomicU32,
    pub in_flight: AtomicUsize,
    pub critical_errors_raised: AtomicU64,
    pub circuit: Mutex<CircuitBreakerMetrics>,
}

impl PumpCounters {
    pub fn increment(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Publish the receive loop's breaker counters
    pub fn record_circuit(&self, metrics: CircuitBreakerMetrics) {
        self.consecutive_receive_failures
            .store(metrics.consecutive_failures, Ordering::Relaxed);
        *self.circuit.lock() = metrics;
    }

    pub fn snapshot(&self, state: PumpState, concurrency: usize, prefetch_count: u32) -> PumpStats {
        PumpStats {
            state,
            concurrency,
            prefetch_count,
            messages_received: self.messages_received.load(Ordering::Relaxed),
            messages_completed: self.messages_completed.load(Ordering::Relaxed),
            messages_abandoned: self.messages_abandoned.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
            receive_failures: self.receive_failures.load(Ordering::Relaxed),
            consecutive_receive_failures: self.consecutive_receive_failures.load(Ordering::Relaxed),
            in_flight: self.in_flight.load(Ordering::Relaxed),
            critical_errors_raised: self.critical_errors_raised.load(Ordering::Relaxed),
            circuit: self.circuit.lock().clone(),
        }
    }
}
