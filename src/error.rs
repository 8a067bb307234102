//! # Transport Error Types
//!
//! Structured error handling for the transport using thiserror. The variants
//! follow the failure classes the transport has to tell apart at runtime:
//! configuration problems are fatal, authorization problems are skipped where
//! possible, transient transport problems are retried by the client (and by the
//! pump's circuit breaker when they persist), and anything attempted after
//! shutdown fails fast.

use thiserror::Error;

/// Comprehensive transport error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("Configuration error: {component}: {message}")]
    Configuration { component: String, message: String },

    #[error("Configuration conflict on entity {entity_path}: {message}")]
    ConfigurationConflict {
        entity_path: String,
        message: String,
    },

    #[error("Not authorized to {operation} on {entity_path}")]
    Unauthorized {
        entity_path: String,
        operation: String,
    },

    #[error("Messaging entity not found: {entity_path}")]
    EntityNotFound { entity_path: String },

    #[error("Messaging entity already exists: {entity_path}")]
    EntityAlreadyExists { entity_path: String },

    #[error("Transport operation failed: {entity_path}: {operation}: {message}")]
    Transport {
        entity_path: String,
        operation: String,
        message: String,
    },

    #[error("Operation {operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("Message lock lost for lock token {lock_token}")]
    MessageLockLost { lock_token: String },

    #[error("{component} has already been stopped")]
    AlreadyStopped { component: String },

    #[error("Internal transport error: {message}")]
    Internal { message: String },
}

impl TransportError {
    /// Create a configuration error
    pub fn configuration(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Configuration {
            component: component.into(),
            message: message.into(),
        }
    }

    /// Create a configuration conflict error for an existing entity
    pub fn configuration_conflict(
        entity_path: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::ConfigurationConflict {
            entity_path: entity_path.into(),
            message: message.into(),
        }
    }

    /// Create an authorization error
    pub fn unauthorized(entity_path: impl Into<String>, operation: impl Into<String>) -> Self {
        Self::Unauthorized {
            entity_path: entity_path.into(),
            operation: operation.into(),
        }
    }

    /// Create an entity not found error
    pub fn entity_not_found(entity_path: impl Into<String>) -> Self {
        Self::EntityNotFound {
            entity_path: entity_path.into(),
        }
    }

    /// Create an entity already exists error
    pub fn entity_already_exists(entity_path: impl Into<String>) -> Self {
        Self::EntityAlreadyExists {
            entity_path: entity_path.into(),
        }
    }

    /// Create a transient transport error
    pub fn transport(
        entity_path: impl Into<String>,
        operation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Transport {
            entity_path: entity_path.into(),
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Create a lock lost error
    pub fn message_lock_lost(lock_token: impl Into<String>) -> Self {
        Self::MessageLockLost {
            lock_token: lock_token.into(),
        }
    }

    /// Create an already-stopped error
    pub fn already_stopped(component: impl Into<String>) -> Self {
        Self::AlreadyStopped {
            component: component.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether the client's retry policy (or the pump's circuit breaker) may
    /// recover from this error without operator intervention
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TransportError::Transport { .. } | TransportError::Timeout { .. }
        )
    }

    /// Whether the namespace rejected the operation for lack of rights
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, TransportError::Unauthorized { .. })
    }
}

/// Conversion from configuration loading errors
impl From<config::ConfigError> for TransportError {
    fn from(err: config::ConfigError) -> Self {
        TransportError::configuration("config_loader", err.to_string())
    }
}

/// Result type alias for transport operations
pub type TransportResult<T> = Result<T, TransportError>;
