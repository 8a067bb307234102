//! # Topology
//!
//! Which topics carry published events and how subscription and rule names
//! are derived from endpoints and message types.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::message::MessageType;

/// Default name of the shared topic in the bundle topology
pub const DEFAULT_BUNDLE_TOPIC: &str = "bundle-1";

/// Publish/subscribe topic layout
///
/// In the default bundle layout every endpoint publishes to and subscribes on
/// one shared topic. A hierarchy layout publishes to one topic and subscribes
/// on another (the subscribe topic is fed by a forwarding subscription on the
/// publish topic that the deployer owns).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Topology {
    pub topic_to_publish_to: String,
    pub topic_to_subscribe_on: String,
}

impl Topology {
    /// Shared `bundle-1` topic for both directions
    pub fn default_bundle() -> Self {
        Self::single(DEFAULT_BUNDLE_TOPIC)
    }

    /// One named topic for both directions
    pub fn single(topic: impl Into<String>) -> Self {
        let topic = topic.into();
        Self {
            topic_to_publish_to: topic.clone(),
            topic_to_subscribe_on: topic,
        }
    }

    /// Publish to one topic, subscribe on another
    pub fn hierarchy(
        topic_to_publish_to: impl Into<String>,
        topic_to_subscribe_on: impl Into<String>,
    ) -> Self {
        Self {
            topic_to_publish_to: topic_to_publish_to.into(),
            topic_to_subscribe_on: topic_to_subscribe_on.into(),
        }
    }

    pub fn is_hierarchy(&self) -> bool {
        self.topic_to_publish_to != self.topic_to_subscribe_on
    }
}

impl Default for Topology {
    fn default() -> Self {
        Self::default_bundle()
    }
}

impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_hierarchy() {
            write!(
                f,
                "TopicToPublishTo = {}, TopicToSubscribeOn = {}",
                self.topic_to_publish_to, self.topic_to_subscribe_on
            )
        } else {
            write!(f, "Topic = {}", self.topic_to_publish_to)
        }
    }
}

/// Derives a subscription name from an endpoint's receive address
pub type SubscriptionNamingConvention = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Derives a filter rule name from a message type
pub type RuleNamingConvention = Arc<dyn Fn(&MessageType) -> String + Send + Sync>;

/// Naming conventions applied when provisioning subscriptions
#[derive(Clone)]
pub struct NamingConventions {
    pub subscription_name: SubscriptionNamingConvention,
    pub rule_name: RuleNamingConvention,
    custom_subscription_name: bool,
    custom_rule_name: bool,
}

impl NamingConventions {
    pub fn with_subscription_naming<F>(mut self, convention: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        self.subscription_name = Arc::new(convention);
        self.custom_subscription_name = true;
        self
    }

    pub fn with_rule_naming<F>(mut self, convention: F) -> Self
    where
        F: Fn(&MessageType) -> String + Send + Sync + 'static,
    {
        self.rule_name = Arc::new(convention);
        self.custom_rule_name = true;
        self
    }

    pub fn subscription_name_for(&self, endpoint: &str) -> String {
        (self.subscription_name)(endpoint)
    }

    pub fn rule_name_for(&self, message_type: &MessageType) -> String {
        (self.rule_name)(message_type)
    }

    pub fn has_custom_subscription_naming(&self) -> bool {
        self.custom_subscription_name
    }

    pub fn has_custom_rule_naming(&self) -> bool {
        self.custom_rule_name
    }
}

impl Default for NamingConventions {
    fn default() -> Self {
        Self {
            subscription_name: Arc::new(|endpoint: &str| endpoint.to_string()),
            rule_name: Arc::new(|message_type: &MessageType| message_type.full_name().to_string()),
            custom_subscription_name: false,
            custom_rule_name: false,
        }
    }
}

impl fmt::Debug for NamingConventions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NamingConventions")
            .field("custom_subscription_name", &self.custom_subscription_name)
            .field("custom_rule_name", &self.custom_rule_name)
            .finish()
    }
}
