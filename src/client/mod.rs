//! # Transport Client
//!
//! Provider-agnostic interface to the messaging namespace. The transport is
//! written only against these traits:
//!
//! - [`TransportClient`]: opens sender and receiver links
//! - [`MessageSender`] / [`MessageReceiver`]: data-plane links on one entity
//! - [`AdministrationClient`]: queue, topic, subscription and rule management
//!
//! [`in_memory::InMemoryNamespace`] implements all of them for tests and
//! local development.

pub mod in_memory;
pub mod traits;
pub mod types;

pub use in_memory::{AccessRight, InMemoryNamespace};
pub use traits::{AdministrationClient, MessageReceiver, MessageSender, TransportClient};
pub use types::{
    subscription_path, AccessDirection, ClientOptions, QueueProperties, ReceiverOptions,
    RuleFilter, RuleProperties, SubscriptionProperties, TopicProperties, DEFAULT_RULE_NAME,
    MAX_RULE_NAME_LENGTH,
};
