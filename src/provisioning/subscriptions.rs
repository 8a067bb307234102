//! # Subscription Manager
//!
//! Maintains the endpoint's subscription on the subscribe topic and one
//! filter rule per subscribed message type.
//!
//! The endpoint subscription forwards to the endpoint's input queue and is
//! created with a default rule that matches nothing, so only the per-type
//! rules deliver. Rule and subscription names come from the configured
//! naming conventions.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::creator::{EntityProvisioner, ProvisionOutcome};
use super::permissions::NamespacePermissions;
use crate::client::{
    subscription_path, AdministrationClient, RuleFilter, RuleProperties, DEFAULT_RULE_NAME,
    MAX_RULE_NAME_LENGTH,
};
use crate::error::{TransportError, TransportResult};
use crate::message::MessageType;
use crate::topology::{NamingConventions, Topology};

pub struct SubscriptionManager {
    admin: Arc<dyn AdministrationClient>,
    provisioner: EntityProvisioner,
    permissions: Arc<NamespacePermissions>,
    topic: String,
    subscription_name: String,
    forward_to: String,
    conventions: NamingConventions,
}

impl std::fmt::Debug for SubscriptionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionManager")
            .field("topic", &self.topic)
            .field("subscription_name", &self.subscription_name)
            .field("forward_to", &self.forward_to)
            .field("conventions", &self.conventions)
            .finish()
    }
}

impl SubscriptionManager {
    /// Manager for the endpoint whose input queue is `receive_address`
    pub fn new(
        receive_address: &str,
        topology: &Topology,
        conventions: NamingConventions,
        admin: Arc<dyn AdministrationClient>,
        provisioner: EntityProvisioner,
        permissions: Arc<NamespacePermissions>,
    ) -> Self {
        Self {
            admin,
            provisioner,
            permissions,
            topic: topology.topic_to_subscribe_on.clone(),
            subscription_name: conventions.subscription_name_for(receive_address),
            forward_to: receive_address.to_string(),
            conventions,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn subscription_name(&self) -> &str {
        &self.subscription_name
    }

    /// Rule name derived from the rule-naming convention
    pub fn rule_name(&self, message_type: &MessageType) -> TransportResult<String> {
        let name = self.conventions.rule_name_for(message_type);
        if name.is_empty() || name.chars().count() > MAX_RULE_NAME_LENGTH {
            return Err(TransportError::configuration(
                "subscription manager",
                format!(
                    "rule name '{name}' for {message_type} must be 1 to {MAX_RULE_NAME_LENGTH} characters; \
                     register a rule naming convention that shortens it"
                ),
            ));
        }
        Ok(name)
    }

    /// Ensure the subscribe topic and the forwarding endpoint subscription exist
    pub async fn setup_infrastructure(&self) -> TransportResult<()> {
        if !self.permissions.can_receive().await? {
            warn!(
                subscription = %subscription_path(&self.topic, &self.subscription_name),
                "Skipping subscription setup without manage rights"
            );
            return Ok(());
        }

        self.provisioner
            .ensure_topic(&self.provisioner.topic_properties(&self.topic))
            .await?;

        let properties = self.provisioner.subscription_properties(
            &self.topic,
            &self.subscription_name,
            Some(&self.forward_to),
        );
        let outcome = self
            .provisioner
            .ensure_subscription(&properties, &RuleProperties::match_none(DEFAULT_RULE_NAME))
            .await?;

        if outcome == ProvisionOutcome::Created {
            info!(
                subscription = %subscription_path(&self.topic, &self.subscription_name),
                forward_to = %self.forward_to,
                "📬 Endpoint subscription ready"
            );
        }
        Ok(())
    }

    /// Add the filter rule for `message_type`; re-subscribing is a no-op
    pub async fn subscribe(&self, message_type: &MessageType) -> TransportResult<()> {
        let rule_name = self.rule_name(message_type)?;

        if !self.permissions.can_receive().await? {
            warn!(
                message_type = %message_type,
                rule = %rule_name,
                "Skipping subscribe without manage rights"
            );
            return Ok(());
        }

        let rule = RuleProperties::new(
            rule_name.clone(),
            RuleFilter::EnclosedMessageType(message_type.clone()),
        );

        if let Some(existing) = self
            .admin
            .get_rule(&self.topic, &self.subscription_name, &rule_name)
            .await?
        {
            return self.check_existing_rule(&existing, &rule);
        }

        match self
            .admin
            .create_rule(&self.topic, &self.subscription_name, &rule)
            .await
        {
            Ok(()) => {
                info!(message_type = %message_type, rule = %rule_name, "➕ Subscribed");
                Ok(())
            }
            Err(TransportError::EntityAlreadyExists { .. }) => {
                debug!(rule = %rule_name, "Rule created concurrently");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Remove the filter rule for `message_type`; a missing rule is a no-op
    pub async fn unsubscribe(&self, message_type: &MessageType) -> TransportResult<()> {
        let rule_name = self.rule_name(message_type)?;

        if !self.permissions.can_receive().await? {
            warn!(
                message_type = %message_type,
                rule = %rule_name,
                "Skipping unsubscribe without manage rights"
            );
            return Ok(());
        }

        match self
            .admin
            .delete_rule(&self.topic, &self.subscription_name, &rule_name)
            .await
        {
            Ok(()) => {
                info!(message_type = %message_type, rule = %rule_name, "➖ Unsubscribed");
                Ok(())
            }
            Err(TransportError::EntityNotFound { .. }) => {
                debug!(rule = %rule_name, "Rule not present, nothing to unsubscribe");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Subscribe to each type in turn, stopping at the first failure
    pub async fn subscribe_all(&self, message_types: &[MessageType]) -> TransportResult<()> {
        for message_type in message_types {
            self.subscribe(message_type).await?;
        }
        Ok(())
    }

    fn check_existing_rule(&self, existing: &RuleProperties, wanted: &RuleProperties) -> TransportResult<()> {
        if existing.filter != wanted.filter {
            return Err(TransportError::configuration_conflict(
                format!(
                    "{}/Rules/{}",
                    subscription_path(&self.topic, &self.subscription_name),
                    wanted.name
                ),
                format!("rule exists with filter {:?}", existing.filter),
            ));
        }
        debug!(rule = %wanted.name, "Already subscribed");
        Ok(())
    }
}
