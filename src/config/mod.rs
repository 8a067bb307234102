//! # Transport Configuration
//!
//! Typed configuration for the transport. Every optional setting is defaulted
//! when the struct is built, so components read plain fields instead of
//! looking values up at use time.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use servicebus_transport::config::TransportConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Defaults, then an optional file, then SERVICEBUS_TRANSPORT__* variables
//! let config = TransportConfig::load(Some("config/transport.toml".as_ref()))?;
//!
//! let prefetch = config.prefetch_count_for(8);
//! let topic = &config.topology.topic_to_publish_to;
//! # let _ = (prefetch, topic);
//! # Ok(())
//! # }
//! ```

pub mod loader;
pub mod settings;

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{TransportError, TransportResult};
use crate::resilience;
use crate::topology::Topology;

pub use settings::{CriticalErrorAction, HostSettings, ReceiveSettings};

/// Largest entity size quota accepted by the namespace, in gigabytes
pub const MAX_ENTITY_SIZE_GB: u32 = 80;

/// Transport-wide settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Topics used for publish/subscribe
    pub topology: Topology,

    /// Size quota for created queues and topics, in gigabytes
    pub entity_maximum_size_gb: u32,

    /// Create queues and topics partitioned
    pub enable_partitioning: bool,

    /// Prefetch = multiplier × concurrency unless `prefetch_count` is set
    pub prefetch_multiplier: u32,

    /// Explicit prefetch count override
    pub prefetch_count: Option<u32>,

    /// Tunnel AMQP over web sockets (handed to the client)
    pub use_web_sockets: bool,

    /// How long a receive circuit may stay open before the host's critical
    /// error action is raised
    pub time_to_wait_before_triggering_circuit_breaker_seconds: u64,

    /// Receive circuit breaker thresholds
    pub circuit_breaker: CircuitBreakerSettings,

    /// Client retry policy; `None` keeps the client's default policy
    pub retry_policy: Option<RetryPolicyOptions>,

    /// Name of a custom token credential, reported in diagnostics only
    pub token_credential: Option<String>,

    /// Deliveries after which the entity dead-letters a message
    pub max_delivery_count: u32,

    /// Peek-lock duration configured on created queues
    pub lock_duration_seconds: u64,

    /// How long `stop` waits for in-flight handlers
    pub shutdown_grace_period_seconds: u64,

    /// Longest a single receive call waits for messages
    pub receive_batch_wait_ms: u64,

    /// Concurrency used when a receiver does not override it
    pub default_max_concurrency: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        let parallelism = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(2);

        Self {
            topology: Topology::default_bundle(),
            entity_maximum_size_gb: 5,
            enable_partitioning: false,
            prefetch_multiplier: 10,
            prefetch_count: None,
            use_web_sockets: false,
            time_to_wait_before_triggering_circuit_breaker_seconds: 120,
            circuit_breaker: CircuitBreakerSettings::default(),
            retry_policy: None,
            token_credential: None,
            max_delivery_count: 10,
            lock_duration_seconds: 60,
            shutdown_grace_period_seconds: 30,
            receive_batch_wait_ms: 1_000,
            default_max_concurrency: parallelism.max(2),
        }
    }
}

impl TransportConfig {
    /// Load configuration from defaults, an optional file and the environment
    pub fn load(path: Option<&std::path::Path>) -> TransportResult<Self> {
        loader::load(path)
    }

    /// Effective prefetch count for a receiver running `concurrency` handlers
    pub fn prefetch_count_for(&self, concurrency: usize) -> u32 {
        self.prefetch_count.unwrap_or_else(|| {
            let concurrency = u32::try_from(concurrency).unwrap_or(u32::MAX);
            self.prefetch_multiplier.saturating_mul(concurrency)
        })
    }

    /// Size quota for created entities, in megabytes
    pub fn entity_maximum_size_mb(&self) -> u64 {
        u64::from(self.entity_maximum_size_gb) * 1024
    }

    pub fn time_to_wait_before_triggering_circuit_breaker(&self) -> Duration {
        Duration::from_secs(self.time_to_wait_before_triggering_circuit_breaker_seconds)
    }

    pub fn lock_duration(&self) -> Duration {
        Duration::from_secs(self.lock_duration_seconds)
    }

    pub fn shutdown_grace_period(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_period_seconds)
    }

    pub fn receive_batch_wait(&self) -> Duration {
        Duration::from_millis(self.receive_batch_wait_ms)
    }

    /// Validate configuration parameters
    pub fn validate(&self) -> TransportResult<()> {
        if self.topology.topic_to_publish_to.trim().is_empty() {
            return Err(TransportError::configuration(
                "topology",
                "topic_to_publish_to must not be empty",
            ));
        }

        if self.topology.topic_to_subscribe_on.trim().is_empty() {
            return Err(TransportError::configuration(
                "topology",
                "topic_to_subscribe_on must not be empty",
            ));
        }

        if self.entity_maximum_size_gb == 0 || self.entity_maximum_size_gb > MAX_ENTITY_SIZE_GB {
            return Err(TransportError::configuration(
                "entity_maximum_size_gb",
                format!(
                    "must be between 1 and {MAX_ENTITY_SIZE_GB}, got {}",
                    self.entity_maximum_size_gb
                ),
            ));
        }

        if self.prefetch_multiplier == 0 {
            return Err(TransportError::configuration(
                "prefetch_multiplier",
                "must be greater than 0",
            ));
        }

        if self.max_delivery_count == 0 {
            return Err(TransportError::configuration(
                "max_delivery_count",
                "must be greater than 0",
            ));
        }

        if self.lock_duration_seconds == 0 {
            return Err(TransportError::configuration(
                "lock_duration_seconds",
                "must be greater than 0",
            ));
        }

        if self.default_max_concurrency == 0 {
            return Err(TransportError::configuration(
                "default_max_concurrency",
                "must be greater than 0",
            ));
        }

        self.circuit_breaker
            .to_resilience_config()
            .validate()
            .map_err(|message| TransportError::configuration("circuit_breaker", message))?;

        if let Some(retry_policy) = &self.retry_policy {
            retry_policy
                .validate()
                .map_err(|message| TransportError::configuration("retry_policy", message))?;
        }

        Ok(())
    }
}

/// Receive circuit breaker thresholds as they appear in configuration files
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerSettings {
    /// Consecutive receive failures before the circuit opens
    pub failure_threshold: u32,
    /// Initial time the circuit stays open before a probe receive
    pub open_duration_ms: u64,
    /// Cap for the open period while probes keep failing
    pub max_open_duration_ms: u64,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_duration_ms: 1_000,
            max_open_duration_ms: 30_000,
        }
    }
}

impl CircuitBreakerSettings {
    /// Convert to the resilience module's format
    pub fn to_resilience_config(&self) -> resilience::CircuitBreakerConfig {
        resilience::CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            open_duration: Duration::from_millis(self.open_duration_ms),
            max_open_duration: Duration::from_millis(self.max_open_duration_ms),
        }
    }
}

/// Back-off shape of the client retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryMode {
    Fixed,
    Exponential,
}

/// Retry policy handed to the transport client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicyOptions {
    pub mode: RetryMode,
    pub max_retries: u32,
    pub delay_ms: u64,
    pub max_delay_ms: u64,
    pub try_timeout_ms: u64,
}

impl Default for RetryPolicyOptions {
    fn default() -> Self {
        Self {
            mode: RetryMode::Exponential,
            max_retries: 3,
            delay_ms: 800,
            max_delay_ms: 60_000,
            try_timeout_ms: 60_000,
        }
    }
}

impl RetryPolicyOptions {
    pub fn validate(&self) -> Result<(), String> {
        if self.delay_ms > self.max_delay_ms {
            return Err("delay_ms must not exceed max_delay_ms".to_string());
        }

        if self.try_timeout_ms == 0 {
            return Err("try_timeout_ms must be greater than 0".to_string());
        }

        Ok(())
    }
}

impl std::fmt::Display for RetryPolicyOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Mode = {:?}, MaxRetries = {}, Delay = {}ms, MaxDelay = {}ms, TryTimeout = {}ms",
            self.mode, self.max_retries, self.delay_ms, self.max_delay_ms, self.try_timeout_ms
        )
    }
}
