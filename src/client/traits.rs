//! # Transport Client Traits
//!
//! The single internal interface the rest of the transport is written
//! against. A concrete SDK binding implements these once; nothing outside
//! `client` knows which one is in use.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::types::{
    AccessDirection, QueueProperties, ReceiverOptions, RuleProperties, SubscriptionProperties,
    TopicProperties,
};
use crate::error::TransportResult;
use crate::message::{NativeMessage, ReceivedMessage};

/// Long-lived link that sends to one entity
#[async_trait]
pub trait MessageSender: Send + Sync + 'static {
    /// Entity this sender is bound to
    fn entity_path(&self) -> &str;

    /// Send a batch of messages to the entity
    async fn send_messages(&self, messages: Vec<NativeMessage>) -> TransportResult<()>;

    /// Close the link; later sends fail with `AlreadyStopped`
    async fn close(&self) -> TransportResult<()>;

    fn is_closed(&self) -> bool;
}

/// Peek-lock receive link on one entity
#[async_trait]
pub trait MessageReceiver: Send + Sync + 'static {
    fn entity_path(&self) -> &str;

    /// Receive up to `max_messages`, waiting at most `max_wait` for the first one.
    /// An empty batch is a normal outcome, not an error.
    async fn receive_messages(
        &self,
        max_messages: usize,
        max_wait: Duration,
    ) -> TransportResult<Vec<ReceivedMessage>>;

    /// Settle a message as processed
    async fn complete_message(&self, message: &ReceivedMessage) -> TransportResult<()>;

    /// Release the lock so the message is redelivered
    async fn abandon_message(&self, message: &ReceivedMessage) -> TransportResult<()>;

    async fn close(&self) -> TransportResult<()>;
}

/// Namespace management operations
///
/// `create_*` fail with `EntityAlreadyExists` when the entity exists;
/// `get_*` return `None` when it does not.
#[async_trait]
pub trait AdministrationClient: Send + Sync + 'static {
    /// Succeeds when the credentials may manage entities for the given direction
    async fn check_manage_rights(&self, direction: AccessDirection) -> TransportResult<()>;

    async fn get_queue(&self, name: &str) -> TransportResult<Option<QueueProperties>>;

    async fn create_queue(&self, properties: &QueueProperties) -> TransportResult<()>;

    async fn get_topic(&self, name: &str) -> TransportResult<Option<TopicProperties>>;

    async fn create_topic(&self, properties: &TopicProperties) -> TransportResult<()>;

    async fn get_subscription(
        &self,
        topic: &str,
        subscription: &str,
    ) -> TransportResult<Option<SubscriptionProperties>>;

    /// Create a subscription whose only rule is `default_rule`
    async fn create_subscription(
        &self,
        properties: &SubscriptionProperties,
        default_rule: &RuleProperties,
    ) -> TransportResult<()>;

    async fn get_rule(
        &self,
        topic: &str,
        subscription: &str,
        rule: &str,
    ) -> TransportResult<Option<RuleProperties>>;

    async fn create_rule(
        &self,
        topic: &str,
        subscription: &str,
        rule: &RuleProperties,
    ) -> TransportResult<()>;

    /// Fails with `EntityNotFound` when the rule does not exist
    async fn delete_rule(&self, topic: &str, subscription: &str, rule: &str) -> TransportResult<()>;

    async fn list_rules(&self, topic: &str, subscription: &str)
        -> TransportResult<Vec<RuleProperties>>;
}

/// Data-plane client: opens send and receive links
#[async_trait]
pub trait TransportClient: Send + Sync + 'static {
    async fn create_sender(&self, entity_path: &str) -> TransportResult<Arc<dyn MessageSender>>;

    async fn create_receiver(
        &self,
        entity_path: &str,
        options: ReceiverOptions,
    ) -> TransportResult<Arc<dyn MessageReceiver>>;

    /// Close the client and its connection
    async fn close(&self) -> TransportResult<()>;

    /// Provider name for logging
    fn provider_name(&self) -> &'static str;
}
