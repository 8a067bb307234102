//! Host and receiver settings supplied by the application framework at startup.

use std::fmt;
use std::sync::Arc;

use crate::addressing::LogicalAddress;
use crate::error::TransportError;

/// Callback raised when the transport cannot recover on its own
pub type CriticalErrorAction = Arc<dyn Fn(&str, &TransportError) + Send + Sync>;

/// Settings of the hosting endpoint
#[derive(Clone)]
pub struct HostSettings {
    /// Endpoint name, used for logging and diagnostics
    pub name: String,
    /// Create queues, topics and subscriptions at startup
    pub setup_infrastructure: bool,
    /// Invoked when a receiver's circuit stays open too long
    pub critical_error_action: Option<CriticalErrorAction>,
}

impl HostSettings {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            setup_infrastructure: false,
            critical_error_action: None,
        }
    }

    pub fn with_setup_infrastructure(mut self, setup: bool) -> Self {
        self.setup_infrastructure = setup;
        self
    }

    pub fn with_critical_error_action<F>(mut self, action: F) -> Self
    where
        F: Fn(&str, &TransportError) + Send + Sync + 'static,
    {
        self.critical_error_action = Some(Arc::new(action));
        self
    }

    /// Raise a critical error, or log it when no action is registered
    pub fn raise_critical_error(&self, message: &str, error: &TransportError) {
        match &self.critical_error_action {
            Some(action) => action(message, error),
            None => tracing::error!(
                endpoint = %self.name,
                error = %error,
                "🚨 Critical error with no handler registered: {message}"
            ),
        }
    }
}

impl fmt::Debug for HostSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostSettings")
            .field("name", &self.name)
            .field("setup_infrastructure", &self.setup_infrastructure)
            .field(
                "has_critical_error_action",
                &self.critical_error_action.is_some(),
            )
            .finish()
    }
}

/// Settings for one receive endpoint; immutable once the transport starts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiveSettings {
    /// Identifier the receiver is registered under
    pub id: String,
    pub receive_address: LogicalAddress,
    /// Whether this receiver takes part in publish/subscribe
    pub use_publish_subscribe: bool,
    /// Queue failed messages are moved to by the framework
    pub error_queue: Option<String>,
    pub max_concurrency: Option<usize>,
    pub prefetch_count: Option<u32>,
}

impl ReceiveSettings {
    pub fn new(id: impl Into<String>, receive_address: LogicalAddress) -> Self {
        Self {
            id: id.into(),
            receive_address,
            use_publish_subscribe: false,
            error_queue: None,
            max_concurrency: None,
            prefetch_count: None,
        }
    }

    pub fn with_publish_subscribe(mut self, enabled: bool) -> Self {
        self.use_publish_subscribe = enabled;
        self
    }

    pub fn with_error_queue(mut self, error_queue: impl Into<String>) -> Self {
        self.error_queue = Some(error_queue.into());
        self
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = Some(max_concurrency);
        self
    }

    pub fn with_prefetch_count(mut self, prefetch_count: u32) -> Self {
        self.prefetch_count = Some(prefetch_count);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_critical_error_action_invoked() {
        let raised = Arc::new(AtomicUsize::new(0));
        let counter = raised.clone();
        let host = HostSettings::new("Sales").with_critical_error_action(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        host.raise_critical_error("receive failing", &TransportError::internal("boom"));
        assert_eq!(raised.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_receive_settings_builder() {
        let settings = ReceiveSettings::new("main", LogicalAddress::new("Sales"))
            .with_publish_subscribe(true)
            .with_error_queue("error")
            .with_max_concurrency(4);

        assert!(settings.use_publish_subscribe);
        assert_eq!(settings.error_queue.as_deref(), Some("error"));
        assert_eq!(settings.max_concurrency, Some(4));
        assert_eq!(settings.prefetch_count, None);
    }
}
