//! # Resilience Module
//!
//! Circuit breaking for the receive path. A message pump owns one breaker and
//! feeds it the outcome of every receive call; failures to reach the entity
//! (not handler failures) trip it.
//!
//! ## Usage
//!
//! ```rust
//! use servicebus_transport::resilience::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
//! use std::time::Duration;
//!
//! # async fn example() {
//! let config = CircuitBreakerConfig {
//!     failure_threshold: 5,
//!     open_duration: Duration::from_secs(1),
//!     max_open_duration: Duration::from_secs(30),
//! };
//!
//! let mut breaker = CircuitBreaker::new("Sales".to_string(), config);
//!
//! let result = breaker
//!     .call(|| async { Ok::<_, std::io::Error>(vec![1, 2, 3]) })
//!     .await;
//! assert!(result.is_ok());
//! assert_eq!(breaker.state(), CircuitState::Closed);
//! # }
//! ```

pub mod circuit_breaker;
pub mod config;
pub mod metrics;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerError, CircuitState};
pub use config::CircuitBreakerConfig;
pub use metrics::CircuitBreakerMetrics;
