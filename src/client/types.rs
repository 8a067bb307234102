//! # Client Types
//!
//! Entity descriptions and options exchanged with the transport client.

use std::collections::HashMap;
use std::time::Duration;

use crate::config::{RetryPolicyOptions, TransportConfig};
use crate::message::{headers, MessageType};

/// Name of the rule a subscription is created with
pub const DEFAULT_RULE_NAME: &str = "$Default";

/// Longest rule name the namespace accepts
pub const MAX_RULE_NAME_LENGTH: usize = 50;

/// Longest subscription name the namespace accepts
pub const MAX_SUBSCRIPTION_NAME_LENGTH: usize = 50;

/// Entity path for receiving from a subscription
pub fn subscription_path(topic: &str, subscription: &str) -> String {
    format!("{topic}/Subscriptions/{subscription}")
}

/// Direction a management-rights probe is made for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessDirection {
    Send,
    Receive,
}

impl std::fmt::Display for AccessDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AccessDirection::Send => f.write_str("send"),
            AccessDirection::Receive => f.write_str("receive"),
        }
    }
}

/// Options the client is created with
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientOptions {
    pub use_web_sockets: bool,
    pub retry_policy: Option<RetryPolicyOptions>,
    pub token_credential: Option<String>,
}

impl ClientOptions {
    pub fn from_config(config: &TransportConfig) -> Self {
        Self {
            use_web_sockets: config.use_web_sockets,
            retry_policy: config.retry_policy.clone(),
            token_credential: config.token_credential.clone(),
        }
    }
}

/// Options for opening a receive link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiverOptions {
    /// Receiver identifier, used in logs
    pub identifier: String,
    /// Messages buffered client-side ahead of processing
    pub prefetch_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueProperties {
    pub name: String,
    pub max_size_in_megabytes: u64,
    pub enable_partitioning: bool,
    pub max_delivery_count: u32,
    pub lock_duration: Duration,
}

impl QueueProperties {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            max_size_in_megabytes: 5 * 1024,
            enable_partitioning: false,
            max_delivery_count: 10,
            lock_duration: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicProperties {
    pub name: String,
    pub max_size_in_megabytes: u64,
    pub enable_partitioning: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionProperties {
    pub topic_name: String,
    pub subscription_name: String,
    /// Queue that matched messages are forwarded to
    pub forward_to: Option<String>,
    pub max_delivery_count: u32,
    pub lock_duration: Duration,
}

/// Filter deciding whether a published message enters a subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleFilter {
    /// Matches every message
    True,
    /// Matches nothing
    False,
    /// Matches when the enclosed message types header lists the type
    EnclosedMessageType(MessageType),
    /// Matches when an application property equals the value
    Correlation { property: String, value: String },
}

impl RuleFilter {
    pub fn matches(&self, application_properties: &HashMap<String, String>) -> bool {
        match self {
            RuleFilter::True => true,
            RuleFilter::False => false,
            RuleFilter::EnclosedMessageType(message_type) => application_properties
                .get(headers::ENCLOSED_MESSAGE_TYPES)
                .is_some_and(|enclosed| message_type.is_enclosed_in(enclosed)),
            RuleFilter::Correlation { property, value } => {
                application_properties.get(property) == Some(value)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleProperties {
    pub name: String,
    pub filter: RuleFilter,
}

impl RuleProperties {
    pub fn new(name: impl Into<String>, filter: RuleFilter) -> Self {
        Self {
            name: name.into(),
            filter,
        }
    }

    pub fn match_all(name: impl Into<String>) -> Self {
        Self::new(name, RuleFilter::True)
    }

    pub fn match_none(name: impl Into<String>) -> Self {
        Self::new(name, RuleFilter::False)
    }
}
