//! Builders for namespaces, pumps and configuration used across integration tests.

use std::sync::Arc;
use std::time::Duration;

use servicebus_transport::client::{
    AdministrationClient, InMemoryNamespace, QueueProperties, TransportClient,
};
use servicebus_transport::config::CircuitBreakerSettings;
use servicebus_transport::message::NativeMessage;
use servicebus_transport::provisioning::{EntityProvisioner, EntitySettings, NamespacePermissions};
use servicebus_transport::{HostSettings, MessagePump, ReceiveSettings, TransportConfig};

/// Configuration with short receive waits so tests do not idle
pub fn fast_config() -> TransportConfig {
    TransportConfig {
        receive_batch_wait_ms: 100,
        shutdown_grace_period_seconds: 5,
        default_max_concurrency: 4,
        ..Default::default()
    }
}

pub fn breaker(failure_threshold: u32, open_duration: Duration) -> CircuitBreakerSettings {
    CircuitBreakerSettings {
        failure_threshold,
        open_duration_ms: open_duration.as_millis() as u64,
        max_open_duration_ms: open_duration.as_millis() as u64,
    }
}

pub fn entity_settings() -> EntitySettings {
    EntitySettings::from_config(&TransportConfig::default())
}

pub fn provisioner(namespace: &InMemoryNamespace) -> EntityProvisioner {
    EntityProvisioner::new(Arc::new(namespace.clone()), entity_settings())
}

pub fn permissions(namespace: &InMemoryNamespace) -> Arc<NamespacePermissions> {
    let admin: Arc<dyn AdministrationClient> = Arc::new(namespace.clone());
    Arc::new(NamespacePermissions::new(admin))
}

pub async fn create_queue(namespace: &InMemoryNamespace, name: &str) {
    namespace
        .create_queue(&QueueProperties::new(name))
        .await
        .expect("queue creation");
}

pub async fn send_raw(namespace: &InMemoryNamespace, entity_path: &str, messages: Vec<NativeMessage>) {
    let sender = namespace
        .create_sender(entity_path)
        .await
        .expect("sender creation");
    sender.send_messages(messages).await.expect("send");
}

pub fn numbered_messages(count: usize) -> Vec<NativeMessage> {
    (0..count)
        .map(|n| NativeMessage::new(format!("m{n}"), format!("payload {n}").into_bytes()))
        .collect()
}

/// Pump on an existing queue named `queue`, receiver id `main`
pub fn pump(
    namespace: &InMemoryNamespace,
    queue: &str,
    settings: ReceiveSettings,
    config: TransportConfig,
    host: HostSettings,
) -> MessagePump {
    MessagePump::new(
        settings,
        queue.to_string(),
        Arc::new(namespace.clone()),
        permissions(namespace),
        config,
        host,
        None,
    )
}

pub fn receive_settings(queue: &str) -> ReceiveSettings {
    ReceiveSettings::new("main", queue.into())
}

/// Poll `condition` every 10ms until it holds or `timeout` passes
pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    tokio::time::timeout(timeout, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .is_ok()
}
