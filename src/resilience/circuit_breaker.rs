//! # Circuit Breaker Implementation
//!
//! Classic three-state breaker: Closed (normal operation), Open (calls are
//! rejected until a retry instant) and Half-Open (one probe call decides).
//! A failed probe reopens the circuit for a longer period, doubling up to the
//! configured maximum, so a dead entity is never polled in a tight loop.
//!
//! The breaker is owned by exactly one receive loop and is mutated through
//! `&mut self`; it carries no locks.

use crate::resilience::{CircuitBreakerConfig, CircuitBreakerMetrics};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Circuit breaker states representing the current operational mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CircuitState {
    /// Normal operation - all calls are allowed through
    Closed,
    /// Failure mode - calls are rejected until the retry instant
    Open,
    /// Testing recovery - a single probe call is allowed
    HalfOpen,
}

/// Errors that can occur during circuit breaker operation
#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    /// Circuit is open, rejecting calls
    #[error("Circuit breaker is open for {component}, retry in {retry_in:?}")]
    CircuitOpen {
        component: String,
        retry_in: Duration,
    },

    /// Operation failed and was recorded
    #[error("Operation failed: {0}")]
    OperationFailed(E),
}

/// Core circuit breaker implementation
#[derive(Debug)]
pub struct CircuitBreaker {
    /// Component name for logging and metrics
    name: String,

    config: CircuitBreakerConfig,

    state: CircuitState,

    metrics: CircuitBreakerMetrics,

    /// When the current open episode started (survives failed probes)
    opened_at: Option<Instant>,

    /// Earliest instant at which a probe is allowed
    retry_at: Option<Instant>,

    /// Failed probes in the current open episode
    reopen_count: u32,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given name and configuration
    pub fn new(name: String, config: CircuitBreakerConfig) -> Self {
        info!(
            component = %name,
            failure_threshold = config.failure_threshold,
            open_duration_ms = config.open_duration.as_millis() as u64,
            max_open_duration_ms = config.max_open_duration.as_millis() as u64,
            "🛡️ Circuit breaker initialized"
        );

        Self {
            name,
            config,
            state: CircuitState::Closed,
            metrics: CircuitBreakerMetrics::new(),
            opened_at: None,
            retry_at: None,
            reopen_count: 0,
        }
    }

    /// Get current circuit state
    pub fn state(&self) -> CircuitState {
        self.state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.metrics.consecutive_failures
    }

    /// How long the current open episode has lasted, if the circuit is not closed
    pub fn open_for(&self) -> Option<Duration> {
        self.opened_at.map(|opened_at| opened_at.elapsed())
    }

    /// Time left until a probe is allowed; `None` when calls are allowed now
    pub fn retry_in(&self) -> Option<Duration> {
        match (self.state, self.retry_at) {
            (CircuitState::Open, Some(retry_at)) => {
                let now = Instant::now();
                (retry_at > now).then(|| retry_at - now)
            }
            _ => None,
        }
    }

    /// Execute an operation with circuit breaker protection
    pub async fn call<F, T, E, Fut>(&mut self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(retry_in) = self.check_permission() {
            self.metrics.rejected_calls += 1;
            return Err(CircuitBreakerError::CircuitOpen {
                component: self.name.clone(),
                retry_in,
            });
        }

        let result = operation().await;

        match &result {
            Ok(_) => self.record_success(),
            Err(_) => self.record_failure(),
        }

        result.map_err(CircuitBreakerError::OperationFailed)
    }

    /// Returns the remaining wait if the call must be rejected
    fn check_permission(&mut self) -> Option<Duration> {
        match self.state {
            CircuitState::Closed | CircuitState::HalfOpen => None,
            CircuitState::Open => match self.retry_in() {
                Some(remaining) => Some(remaining),
                None => {
                    self.transition_to_half_open();
                    None
                }
            },
        }
    }

    /// Record a successful operation
    pub fn record_success(&mut self) {
        self.metrics.total_calls += 1;
        self.metrics.success_count += 1;

        match self.state {
            CircuitState::HalfOpen => self.transition_to_closed(),
            CircuitState::Closed => {
                self.metrics.consecutive_failures = 0;
            }
            CircuitState::Open => {
                warn!(component = %self.name, "Success recorded while circuit is open");
            }
        }
    }

    /// Record a failed operation
    pub fn record_failure(&mut self) {
        self.metrics.total_calls += 1;
        self.metrics.failure_count += 1;
        self.metrics.consecutive_failures = self.metrics.consecutive_failures.saturating_add(1);

        debug!(
            component = %self.name,
            consecutive_failures = self.metrics.consecutive_failures,
            "🔴 Operation failed"
        );

        match self.state {
            CircuitState::Closed => {
                if self.metrics.consecutive_failures >= self.config.failure_threshold {
                    self.metrics.times_opened += 1;
                    self.opened_at = Some(Instant::now());
                    self.reopen_count = 0;
                    self.transition_to_open();
                }
            }
            CircuitState::HalfOpen => {
                // Failed probe: back off further
                self.reopen_count = self.reopen_count.saturating_add(1);
                self.transition_to_open();
            }
            CircuitState::Open => {}
        }
    }

    fn transition_to_closed(&mut self) {
        let open_for = self.open_for();

        self.state = CircuitState::Closed;
        self.metrics.consecutive_failures = 0;
        self.opened_at = None;
        self.retry_at = None;
        self.reopen_count = 0;

        info!(
            component = %self.name,
            open_for_ms = open_for.map(|d| d.as_millis() as u64),
            "🟢 Circuit breaker closed (recovered)"
        );
    }

    fn transition_to_open(&mut self) {
        let open_duration = self.config.backoff(self.reopen_count);

        self.state = CircuitState::Open;
        self.retry_at = Some(Instant::now() + open_duration);

        error!(
            component = %self.name,
            consecutive_failures = self.metrics.consecutive_failures,
            failure_threshold = self.config.failure_threshold,
            open_duration_ms = open_duration.as_millis() as u64,
            failed_probes = self.reopen_count,
            "🔴 Circuit breaker opened (receiving suspended)"
        );
    }

    fn transition_to_half_open(&mut self) {
        self.state = CircuitState::HalfOpen;

        info!(
            component = %self.name,
            "🟡 Circuit breaker half-open (probing)"
        );
    }

    /// Get current metrics snapshot
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        let mut snapshot = self.metrics.clone();
        snapshot.current_state = self.state;
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(threshold: u32) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: threshold,
            open_duration: Duration::from_millis(100),
            max_open_duration: Duration::from_millis(400),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_circuit_breaker_normal_operation() {
        let mut circuit = CircuitBreaker::new("test".to_string(), config(3));

        assert_eq!(circuit.state(), CircuitState::Closed);

        let result = circuit.call(|| async { Ok::<_, String>("success") }).await;
        assert!(result.is_ok());

        let metrics = circuit.metrics();
        assert_eq!(metrics.total_calls, 1);
        assert_eq!(metrics.success_count, 1);
        assert_eq!(metrics.failure_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_circuit_breaker_opens_on_failures() {
        let mut circuit = CircuitBreaker::new("test".to_string(), config(2));

        let _ = circuit.call(|| async { Err::<String, _>("error") }).await;
        assert_eq!(circuit.state(), CircuitState::Closed);

        let _ = circuit.call(|| async { Err::<String, _>("error") }).await;
        assert_eq!(circuit.state(), CircuitState::Open);

        let mut executed = false;
        let result = circuit
            .call(|| {
                executed = true;
                async { Ok::<_, String>("should not execute") }
            })
            .await;
        assert!(matches!(result, Err(CircuitBreakerError::CircuitOpen { .. })));
        assert!(!executed);
        assert_eq!(circuit.metrics().rejected_calls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_consecutive_failures() {
        let mut circuit = CircuitBreaker::new("test".to_string(), config(3));

        let _ = circuit.call(|| async { Err::<(), _>("error") }).await;
        let _ = circuit.call(|| async { Err::<(), _>("error") }).await;
        assert_eq!(circuit.consecutive_failures(), 2);

        let _ = circuit.call(|| async { Ok::<_, &str>(()) }).await;
        assert_eq!(circuit.consecutive_failures(), 0);
        assert_eq!(circuit.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_circuit_breaker_recovery() {
        let mut circuit = CircuitBreaker::new("test".to_string(), config(1));

        let _ = circuit.call(|| async { Err::<String, _>("error") }).await;
        assert_eq!(circuit.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_millis(100)).await;

        let result = circuit.call(|| async { Ok::<_, String>("success") }).await;
        assert!(result.is_ok());
        assert_eq!(circuit.state(), CircuitState::Closed);
        assert_eq!(circuit.consecutive_failures(), 0);
        assert!(circuit.open_for().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_probe_extends_open_period() {
        let mut circuit = CircuitBreaker::new("test".to_string(), config(1));

        let _ = circuit.call(|| async { Err::<(), _>("error") }).await;
        assert_eq!(circuit.retry_in(), Some(Duration::from_millis(100)));

        tokio::time::advance(Duration::from_millis(100)).await;
        let _ = circuit.call(|| async { Err::<(), _>("still down") }).await;
        assert_eq!(circuit.state(), CircuitState::Open);
        assert_eq!(circuit.retry_in(), Some(Duration::from_millis(200)));

        tokio::time::advance(Duration::from_millis(200)).await;
        let _ = circuit.call(|| async { Err::<(), _>("still down") }).await;
        assert_eq!(circuit.retry_in(), Some(Duration::from_millis(400)));

        tokio::time::advance(Duration::from_millis(400)).await;
        let _ = circuit.call(|| async { Err::<(), _>("still down") }).await;
        assert_eq!(circuit.retry_in(), Some(Duration::from_millis(400)));

        assert_eq!(circuit.open_for(), Some(Duration::from_millis(700)));
        assert_eq!(circuit.metrics().times_opened, 1);
    }
}
