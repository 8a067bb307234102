//! # Message Sender Registry
//!
//! Owns one long-lived sender per destination entity. Handles are created on
//! first use and reused until the registry is closed.
//!
//! Reads of an existing handle go through a sharded map without a global
//! lock. First creation for a key is serialized by a per-key `OnceCell`, so
//! concurrent first users of the same destination wait for a single
//! creation instead of racing to open links of their own.
//!
//! ```rust
//! use std::sync::Arc;
//! use servicebus_transport::client::InMemoryNamespace;
//! use servicebus_transport::sending::MessageSenderRegistry;
//!
//! # tokio_test::block_on(async {
//! let registry = MessageSenderRegistry::new(Arc::new(InMemoryNamespace::new()));
//! let first = registry.get_sender("Sales").await?;
//! let second = registry.get_sender("Sales").await?;
//! assert!(Arc::ptr_eq(&first, &second));
//!
//! registry.close().await?;
//! assert!(registry.get_sender("Sales").await.is_err());
//! # Ok::<(), servicebus_transport::TransportError>(())
//! # }).unwrap();
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use futures::future::join_all;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::client::{MessageSender, TransportClient};
use crate::error::{TransportError, TransportResult};

const COMPONENT: &str = "message sender registry";

type SenderSlot = Arc<OnceCell<Arc<dyn MessageSender>>>;

/// Pool of senders keyed by physical entity path
pub struct MessageSenderRegistry {
    client: Arc<dyn TransportClient>,
    senders: DashMap<String, SenderSlot>,
    closed: AtomicBool,
}

impl std::fmt::Debug for MessageSenderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageSenderRegistry")
            .field("provider", &self.client.provider_name())
            .field("senders", &self.senders.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl MessageSenderRegistry {
    pub fn new(client: Arc<dyn TransportClient>) -> Self {
        Self {
            client,
            senders: DashMap::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Get the sender for `entity_path`, creating it on first use
    ///
    /// Fails with `AlreadyStopped` once the registry has been closed. A
    /// failed creation is not cached; the next call tries again.
    pub async fn get_sender(&self, entity_path: &str) -> TransportResult<Arc<dyn MessageSender>> {
        self.ensure_open()?;

        let existing = self.senders.get(entity_path).map(|entry| entry.value().clone());
        let slot = match existing {
            Some(slot) => slot,
            None => self
                .senders
                .entry(entity_path.to_string())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .value()
                .clone(),
        };

        let sender = slot
            .get_or_try_init(|| async {
                self.ensure_open()?;
                let sender = self.client.create_sender(entity_path).await?;
                info!(entity_path = %entity_path, "🔗 Sender created");
                Ok::<_, TransportError>(sender)
            })
            .await?
            .clone();

        // close() may have swept the map before this handle was stored
        if self.is_closed() {
            if let Err(e) = sender.close().await {
                debug!(entity_path = %entity_path, error = %e, "Closing late sender failed");
            }
            return Err(TransportError::already_stopped(COMPONENT));
        }

        Ok(sender)
    }

    /// Close every sender; later `get_sender` calls fail with `AlreadyStopped`
    pub async fn close(&self) -> TransportResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(TransportError::already_stopped(COMPONENT));
        }

        let senders: Vec<Arc<dyn MessageSender>> = self
            .senders
            .iter()
            .filter_map(|entry| entry.value().get().cloned())
            .collect();
        self.senders.clear();

        let results = join_all(senders.iter().map(|sender| sender.close())).await;
        let failures = results.iter().filter(|result| result.is_err()).count();
        for (sender, result) in senders.iter().zip(&results) {
            if let Err(e) = result {
                warn!(entity_path = %sender.entity_path(), error = %e, "Failed to close sender");
            }
        }

        info!(
            closed = senders.len() - failures,
            failed = failures,
            "🛑 Message sender registry closed"
        );
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Destinations with an open sender
    pub fn len(&self) -> usize {
        self.senders
            .iter()
            .filter(|entry| entry.value().initialized())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn ensure_open(&self) -> TransportResult<()> {
        if self.is_closed() {
            return Err(TransportError::already_stopped(COMPONENT));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::InMemoryNamespace;

    fn registry() -> (InMemoryNamespace, MessageSenderRegistry) {
        let namespace = InMemoryNamespace::new();
        let registry = MessageSenderRegistry::new(Arc::new(namespace.clone()));
        (namespace, registry)
    }

    #[tokio::test]
    async fn test_sender_is_reused_per_destination() {
        let (namespace, registry) = registry();

        let first = registry.get_sender("Sales").await.unwrap();
        let second = registry.get_sender("Sales").await.unwrap();
        let other = registry.get_sender("Billing").await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert!(!Arc::ptr_eq(&first, &other));
        assert_eq!(other.entity_path(), "Billing");
        assert_eq!(namespace.senders_created("Sales"), 1);
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn test_close_closes_senders_and_rejects_new_requests() {
        let (namespace, registry) = registry();
        let sender = registry.get_sender("Sales").await.unwrap();

        registry.close().await.unwrap();

        assert!(sender.is_closed());
        assert_eq!(namespace.senders_closed(), 1);
        assert!(registry.is_empty());
        assert!(matches!(
            registry.get_sender("Sales").await,
            Err(TransportError::AlreadyStopped { .. })
        ));
        assert!(matches!(
            registry.close().await,
            Err(TransportError::AlreadyStopped { .. })
        ));
    }

    #[tokio::test]
    async fn test_failed_creation_is_not_cached() {
        let (namespace, registry) = registry();
        TransportClient::close(&namespace).await.unwrap();

        assert!(registry.get_sender("Sales").await.is_err());
        assert_eq!(registry.len(), 0);
    }
}
