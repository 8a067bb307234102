//! # Entity Provisioner
//!
//! Idempotently ensures queues, topics and subscriptions exist. An entity
//! that already exists with compatible settings is left alone; one whose
//! settings cannot be reconciled fails with `ConfigurationConflict`.
//! Creation races with another process are absorbed: `EntityAlreadyExists`
//! triggers a re-read and the same compatibility check.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::client::{
    subscription_path, AdministrationClient, QueueProperties, RuleProperties,
    SubscriptionProperties, TopicProperties,
};
use crate::config::TransportConfig;
use crate::error::{TransportError, TransportResult};

/// What an `ensure_*` call did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionOutcome {
    Created,
    AlreadyExisted,
}

/// Settings applied to every entity the provisioner creates
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntitySettings {
    pub max_size_in_megabytes: u64,
    pub enable_partitioning: bool,
    pub max_delivery_count: u32,
    pub lock_duration: Duration,
}

impl EntitySettings {
    pub fn from_config(config: &TransportConfig) -> Self {
        Self {
            max_size_in_megabytes: config.entity_maximum_size_mb(),
            enable_partitioning: config.enable_partitioning,
            max_delivery_count: config.max_delivery_count,
            lock_duration: config.lock_duration(),
        }
    }
}

#[derive(Clone)]
pub struct EntityProvisioner {
    admin: Arc<dyn AdministrationClient>,
    settings: EntitySettings,
}

impl std::fmt::Debug for EntityProvisioner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityProvisioner")
            .field("settings", &self.settings)
            .finish()
    }
}

impl EntityProvisioner {
    pub fn new(admin: Arc<dyn AdministrationClient>, settings: EntitySettings) -> Self {
        Self { admin, settings }
    }

    pub fn settings(&self) -> &EntitySettings {
        &self.settings
    }

    /// Queue description using the configured size, partitioning and delivery settings
    pub fn queue_properties(&self, name: &str) -> QueueProperties {
        QueueProperties {
            name: name.to_string(),
            max_size_in_megabytes: self.settings.max_size_in_megabytes,
            enable_partitioning: self.settings.enable_partitioning,
            max_delivery_count: self.settings.max_delivery_count,
            lock_duration: self.settings.lock_duration,
        }
    }

    pub fn topic_properties(&self, name: &str) -> TopicProperties {
        TopicProperties {
            name: name.to_string(),
            max_size_in_megabytes: self.settings.max_size_in_megabytes,
            enable_partitioning: self.settings.enable_partitioning,
        }
    }

    pub fn subscription_properties(
        &self,
        topic: &str,
        subscription: &str,
        forward_to: Option<&str>,
    ) -> SubscriptionProperties {
        SubscriptionProperties {
            topic_name: topic.to_string(),
            subscription_name: subscription.to_string(),
            forward_to: forward_to.map(str::to_string),
            max_delivery_count: self.settings.max_delivery_count,
            lock_duration: self.settings.lock_duration,
        }
    }

    pub async fn ensure_queue(&self, properties: &QueueProperties) -> TransportResult<ProvisionOutcome> {
        if let Some(existing) = self.admin.get_queue(&properties.name).await? {
            check_queue(&existing, properties)?;
            debug!(queue = %properties.name, "Queue already exists");
            return Ok(ProvisionOutcome::AlreadyExisted);
        }

        match self.admin.create_queue(properties).await {
            Ok(()) => {
                info!(
                    queue = %properties.name,
                    max_size_mb = properties.max_size_in_megabytes,
                    partitioned = properties.enable_partitioning,
                    "📦 Queue created"
                );
                Ok(ProvisionOutcome::Created)
            }
            Err(TransportError::EntityAlreadyExists { .. }) => {
                let existing = self
                    .admin
                    .get_queue(&properties.name)
                    .await?
                    .ok_or_else(|| TransportError::entity_not_found(&properties.name))?;
                check_queue(&existing, properties)?;
                Ok(ProvisionOutcome::AlreadyExisted)
            }
            Err(e) => Err(e),
        }
    }

    pub async fn ensure_topic(&self, properties: &TopicProperties) -> TransportResult<ProvisionOutcome> {
        if let Some(existing) = self.admin.get_topic(&properties.name).await? {
            check_topic(&existing, properties)?;
            debug!(topic = %properties.name, "Topic already exists");
            return Ok(ProvisionOutcome::AlreadyExisted);
        }

        match self.admin.create_topic(properties).await {
            Ok(()) => {
                info!(
                    topic = %properties.name,
                    max_size_mb = properties.max_size_in_megabytes,
                    partitioned = properties.enable_partitioning,
                    "📦 Topic created"
                );
                Ok(ProvisionOutcome::Created)
            }
            Err(TransportError::EntityAlreadyExists { .. }) => {
                let existing = self
                    .admin
                    .get_topic(&properties.name)
                    .await?
                    .ok_or_else(|| TransportError::entity_not_found(&properties.name))?;
                check_topic(&existing, properties)?;
                Ok(ProvisionOutcome::AlreadyExisted)
            }
            Err(e) => Err(e),
        }
    }

    /// Ensure a subscription exists; `default_rule` is only applied on creation
    pub async fn ensure_subscription(
        &self,
        properties: &SubscriptionProperties,
        default_rule: &RuleProperties,
    ) -> TransportResult<ProvisionOutcome> {
        let topic = &properties.topic_name;
        let name = &properties.subscription_name;

        if let Some(existing) = self.admin.get_subscription(topic, name).await? {
            check_subscription(&existing, properties)?;
            debug!(subscription = %subscription_path(topic, name), "Subscription already exists");
            return Ok(ProvisionOutcome::AlreadyExisted);
        }

        match self.admin.create_subscription(properties, default_rule).await {
            Ok(()) => {
                info!(
                    subscription = %subscription_path(topic, name),
                    forward_to = ?properties.forward_to,
                    "📦 Subscription created"
                );
                Ok(ProvisionOutcome::Created)
            }
            Err(TransportError::EntityAlreadyExists { .. }) => {
                let existing = self
                    .admin
                    .get_subscription(topic, name)
                    .await?
                    .ok_or_else(|| TransportError::entity_not_found(subscription_path(topic, name)))?;
                check_subscription(&existing, properties)?;
                Ok(ProvisionOutcome::AlreadyExisted)
            }
            Err(e) => Err(e),
        }
    }
}

fn partitioning_conflict(entity_path: &str, existing: bool, requested: bool) -> TransportResult<()> {
    if existing != requested {
        return Err(TransportError::configuration_conflict(
            entity_path,
            format!("entity exists with enable_partitioning={existing}, configured {requested}"),
        ));
    }
    Ok(())
}

fn warn_on_size_mismatch(entity_path: &str, existing: u64, requested: u64) {
    if existing != requested {
        warn!(
            entity_path = %entity_path,
            existing_mb = existing,
            configured_mb = requested,
            "Existing entity has a different size quota, keeping it"
        );
    }
}

fn check_queue(existing: &QueueProperties, requested: &QueueProperties) -> TransportResult<()> {
    partitioning_conflict(
        &requested.name,
        existing.enable_partitioning,
        requested.enable_partitioning,
    )?;
    warn_on_size_mismatch(
        &requested.name,
        existing.max_size_in_megabytes,
        requested.max_size_in_megabytes,
    );
    Ok(())
}

fn check_topic(existing: &TopicProperties, requested: &TopicProperties) -> TransportResult<()> {
    partitioning_conflict(
        &requested.name,
        existing.enable_partitioning,
        requested.enable_partitioning,
    )?;
    warn_on_size_mismatch(
        &requested.name,
        existing.max_size_in_megabytes,
        requested.max_size_in_megabytes,
    );
    Ok(())
}

fn check_subscription(
    existing: &SubscriptionProperties,
    requested: &SubscriptionProperties,
) -> TransportResult<()> {
    if existing.forward_to != requested.forward_to {
        return Err(TransportError::configuration_conflict(
            subscription_path(&requested.topic_name, &requested.subscription_name),
            format!(
                "subscription forwards to {:?}, configured {:?}",
                existing.forward_to, requested.forward_to
            ),
        ));
    }
    Ok(())
}
