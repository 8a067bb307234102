//! # Transport Infrastructure
//!
//! Entry point the hosting framework talks to. Built once at startup from
//! the transport configuration, the host settings and the receive
//! endpoints, it owns:
//!
//! - the shared sender registry and the dispatcher on top of it
//! - one [`MessagePump`] per receive endpoint, keyed by receiver id
//! - the namespace permission probe shared by every component
//! - entity provisioning for `setup_infrastructure`
//!
//! Shutdown order is receivers first, then senders, then clients, so no
//! handler is left dispatching into a closed registry.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_json::json;
use tracing::{debug, info, warn};

use crate::addressing::{translate_address, LogicalAddress};
use crate::client::{AdministrationClient, TransportClient};
use crate::config::{HostSettings, ReceiveSettings, TransportConfig};
use crate::error::{TransportError, TransportResult};
use crate::provisioning::{EntityProvisioner, EntitySettings, NamespacePermissions, SubscriptionManager};
use crate::receiving::{MessagePump, PumpState};
use crate::sending::{MessageDispatcher, MessageSenderRegistry};
use crate::topology::NamingConventions;

/// A receive endpoint and the client it receives with
pub struct ReceiverDefinition {
    pub settings: ReceiveSettings,
    pub client: Arc<dyn TransportClient>,
}

impl ReceiverDefinition {
    pub fn new(settings: ReceiveSettings, client: Arc<dyn TransportClient>) -> Self {
        Self { settings, client }
    }
}

pub struct TransportInfrastructure {
    config: TransportConfig,
    host: HostSettings,
    conventions: NamingConventions,
    client: Arc<dyn TransportClient>,
    registry: Arc<MessageSenderRegistry>,
    dispatcher: MessageDispatcher,
    permissions: Arc<NamespacePermissions>,
    provisioner: EntityProvisioner,
    receivers: HashMap<String, Arc<MessagePump>>,
    receiver_clients: Vec<Arc<dyn TransportClient>>,
    diagnostics: serde_json::Value,
}

impl std::fmt::Debug for TransportInfrastructure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportInfrastructure")
            .field("host", &self.host)
            .field("provider", &self.client.provider_name())
            .field("topology", &self.config.topology)
            .field("receivers", &self.receivers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl TransportInfrastructure {
    /// Validate the configuration and wire every component
    ///
    /// Receiver ids must be unique. Nothing touches the namespace here;
    /// entity creation happens in [`setup_infrastructure`](Self::setup_infrastructure).
    pub fn initialize(
        config: TransportConfig,
        host: HostSettings,
        conventions: NamingConventions,
        client: Arc<dyn TransportClient>,
        admin: Arc<dyn AdministrationClient>,
        receivers: Vec<ReceiverDefinition>,
    ) -> TransportResult<Self> {
        config.validate()?;

        let registry = Arc::new(MessageSenderRegistry::new(client.clone()));
        let dispatcher = MessageDispatcher::new(registry.clone(), config.topology.clone());
        let permissions = Arc::new(NamespacePermissions::new(admin.clone()));
        let provisioner = EntityProvisioner::new(admin.clone(), EntitySettings::from_config(&config));

        let mut pumps = HashMap::with_capacity(receivers.len());
        let mut receiver_clients = Vec::with_capacity(receivers.len());

        for ReceiverDefinition { settings, client: receiver_client } in receivers {
            if pumps.contains_key(&settings.id) {
                return Err(TransportError::configuration(
                    "receivers",
                    format!("duplicate receiver id '{}'", settings.id),
                ));
            }
            if let Some(0) = settings.max_concurrency {
                return Err(TransportError::configuration(
                    format!("receivers.{}.max_concurrency", settings.id),
                    "must be greater than 0",
                ));
            }

            let receive_address = translate_address(&settings.receive_address);
            let subscriptions = settings.use_publish_subscribe.then(|| {
                SubscriptionManager::new(
                    &receive_address,
                    &config.topology,
                    conventions.clone(),
                    admin.clone(),
                    provisioner.clone(),
                    permissions.clone(),
                )
            });

            let pump = MessagePump::new(
                settings.clone(),
                receive_address,
                receiver_client.clone(),
                permissions.clone(),
                config.clone(),
                host.clone(),
                subscriptions,
            );
            pumps.insert(settings.id.clone(), Arc::new(pump));

            if !receiver_clients
                .iter()
                .any(|existing| Arc::ptr_eq(existing, &receiver_client))
                && !Arc::ptr_eq(&receiver_client, &client)
            {
                receiver_clients.push(receiver_client);
            }
        }

        let diagnostics = build_diagnostics(&config, &conventions);
        info!(
            endpoint = %host.name,
            provider = client.provider_name(),
            receivers = pumps.len(),
            diagnostics = %diagnostics,
            "🔧 Transport infrastructure initialized"
        );

        Ok(Self {
            config,
            host,
            conventions,
            client,
            registry,
            dispatcher,
            permissions,
            provisioner,
            receivers: pumps,
            receiver_clients,
            diagnostics,
        })
    }

    /// Effective configuration reported at startup
    pub fn diagnostics(&self) -> &serde_json::Value {
        &self.diagnostics
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    pub fn conventions(&self) -> &NamingConventions {
        &self.conventions
    }

    pub fn dispatcher(&self) -> &MessageDispatcher {
        &self.dispatcher
    }

    pub fn permissions(&self) -> &Arc<NamespacePermissions> {
        &self.permissions
    }

    pub fn receivers(&self) -> impl Iterator<Item = &Arc<MessagePump>> {
        self.receivers.values()
    }

    pub fn receiver(&self, id: &str) -> Option<&Arc<MessagePump>> {
        self.receivers.get(id)
    }

    /// Physical entity name for a logical address
    pub fn to_transport_address(&self, address: &LogicalAddress) -> String {
        translate_address(address)
    }

    /// Create the queues, topics and subscriptions this endpoint needs
    ///
    /// Does nothing unless the host asked for it. Each direction is skipped
    /// when the namespace reports no manage rights for it, leaving the
    /// entities to the deployer.
    pub async fn setup_infrastructure(&self) -> TransportResult<()> {
        if !self.host.setup_infrastructure {
            debug!(endpoint = %self.host.name, "Infrastructure setup disabled");
            return Ok(());
        }

        if self.permissions.can_receive().await? {
            let mut queues = Vec::new();
            let mut seen = HashSet::new();
            for pump in self.receivers.values() {
                let error_queue = pump.settings().error_queue.clone();
                for queue in std::iter::once(pump.receive_address().to_string()).chain(error_queue) {
                    if seen.insert(queue.clone()) {
                        queues.push(queue);
                    }
                }
            }

            for queue in &queues {
                self.provisioner
                    .ensure_queue(&self.provisioner.queue_properties(queue))
                    .await?;
            }

            for pump in self.receivers.values() {
                if let Some(subscriptions) = pump.subscriptions() {
                    subscriptions.setup_infrastructure().await?;
                }
            }
        } else {
            warn!(
                endpoint = %self.host.name,
                "Skipping receive-side infrastructure setup without manage rights"
            );
        }

        if self.permissions.can_send().await? {
            let topic = &self.config.topology.topic_to_publish_to;
            self.provisioner
                .ensure_topic(&self.provisioner.topic_properties(topic))
                .await?;
        } else {
            warn!(
                endpoint = %self.host.name,
                "Skipping publish topic setup without manage rights"
            );
        }

        info!(endpoint = %self.host.name, "✅ Transport infrastructure ready");
        Ok(())
    }

    /// Stop every receiver, then close senders and clients
    pub async fn shutdown(&self) -> TransportResult<()> {
        info!(endpoint = %self.host.name, "🛑 Shutting down transport infrastructure");

        let stops = self
            .receivers
            .values()
            .filter(|pump| pump.state() != PumpState::Stopped)
            .map(|pump| async move {
                match pump.stop().await {
                    Ok(()) | Err(TransportError::AlreadyStopped { .. }) => {}
                    Err(e) => warn!(receiver_id = %pump.id(), error = %e, "Failed to stop receiver"),
                }
            });
        futures::future::join_all(stops).await;

        self.registry.close().await?;

        for client in &self.receiver_clients {
            if let Err(e) = client.close().await {
                warn!(provider = client.provider_name(), error = %e, "Failed to close receiver client");
            }
        }
        self.client.close().await?;

        info!(endpoint = %self.host.name, "Transport infrastructure shut down");
        Ok(())
    }
}

fn build_diagnostics(config: &TransportConfig, conventions: &NamingConventions) -> serde_json::Value {
    let convention = |custom: bool| if custom { "custom" } else { "default" };
    let subscription_naming = convention(conventions.has_custom_subscription_naming());
    let rule_naming = convention(conventions.has_custom_rule_naming());

    json!({
        "Topology": config.topology.to_string(),
        "EntityMaximumSize": config.entity_maximum_size_gb,
        "EnablePartitioning": config.enable_partitioning,
        "PrefetchMultiplier": config.prefetch_multiplier,
        "PrefetchCount": config
            .prefetch_count
            .map_or_else(|| "default".to_string(), |count| count.to_string()),
        "UseWebSockets": config.use_web_sockets,
        "TimeToWaitBeforeTriggeringCircuitBreaker": format!(
            "{}s",
            config.time_to_wait_before_triggering_circuit_breaker_seconds
        ),
        "CustomTokenProvider": config.token_credential.as_deref().unwrap_or("default"),
        "CustomRetryPolicy": config
            .retry_policy
            .as_ref()
            .map_or_else(|| "default".to_string(), ToString::to_string),
        "SubscriptionNamingConvention": subscription_naming,
        "RuleNamingConvention": rule_naming,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{AccessRight, InMemoryNamespace};
    use crate::topology::Topology;

    fn infrastructure(namespace: &InMemoryNamespace, host: HostSettings) -> TransportInfrastructure {
        TransportInfrastructure::initialize(
            TransportConfig::default(),
            host,
            NamingConventions::default(),
            Arc::new(namespace.clone()),
            Arc::new(namespace.clone()),
            vec![ReceiverDefinition::new(
                ReceiveSettings::new("main", LogicalAddress::new("Sales"))
                    .with_publish_subscribe(true)
                    .with_error_queue("error"),
                Arc::new(namespace.clone()),
            )],
        )
        .unwrap()
    }

    #[test]
    fn test_diagnostics_report_defaults() {
        let namespace = InMemoryNamespace::new();
        let infrastructure = infrastructure(&namespace, HostSettings::new("Sales"));

        let diagnostics = infrastructure.diagnostics();
        assert_eq!(diagnostics["Topology"], "Topic = bundle-1");
        assert_eq!(diagnostics["PrefetchCount"], "default");
        assert_eq!(diagnostics["CustomRetryPolicy"], "default");
        assert_eq!(diagnostics["CustomTokenProvider"], "default");
        assert_eq!(diagnostics["EntityMaximumSize"], 5);
    }

    #[test]
    fn test_duplicate_receiver_ids_are_rejected() {
        let namespace = InMemoryNamespace::new();
        let client: Arc<dyn TransportClient> = Arc::new(namespace.clone());
        let result = TransportInfrastructure::initialize(
            TransportConfig {
                topology: Topology::single("events"),
                ..Default::default()
            },
            HostSettings::new("Sales"),
            NamingConventions::default(),
            client.clone(),
            Arc::new(namespace.clone()),
            vec![
                ReceiverDefinition::new(ReceiveSettings::new("main", LogicalAddress::new("Sales")), client.clone()),
                ReceiverDefinition::new(ReceiveSettings::new("main", LogicalAddress::new("Billing")), client),
            ],
        );

        assert!(matches!(result, Err(TransportError::Configuration { .. })));
    }

    #[tokio::test]
    async fn test_setup_creates_queues_topic_and_subscription() {
        let namespace = InMemoryNamespace::new();
        let infrastructure =
            infrastructure(&namespace, HostSettings::new("Sales").with_setup_infrastructure(true));

        infrastructure.setup_infrastructure().await.unwrap();

        assert!(namespace.get_queue("Sales").await.unwrap().is_some());
        assert!(namespace.get_queue("error").await.unwrap().is_some());
        assert!(namespace.get_topic("bundle-1").await.unwrap().is_some());
        assert!(namespace
            .get_subscription("bundle-1", "Sales")
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_setup_is_skipped_without_manage_rights_or_when_disabled() {
        let namespace = InMemoryNamespace::new();
        infrastructure(&namespace, HostSettings::new("Sales"))
            .setup_infrastructure()
            .await
            .unwrap();
        assert!(namespace.get_queue("Sales").await.unwrap().is_none());

        let restricted = InMemoryNamespace::new();
        restricted.deny(AccessRight::Manage);
        infrastructure(&restricted, HostSettings::new("Sales").with_setup_infrastructure(true))
            .setup_infrastructure()
            .await
            .unwrap();
        restricted.allow(AccessRight::Manage);
        assert!(restricted.get_queue("Sales").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_shutdown_closes_registry_and_client() {
        let namespace = InMemoryNamespace::new();
        let infrastructure = infrastructure(&namespace, HostSettings::new("Sales"));

        infrastructure.shutdown().await.unwrap();

        assert!(namespace.is_closed());
        assert!(matches!(
            infrastructure.shutdown().await,
            Err(TransportError::AlreadyStopped { .. })
        ));
    }
}
