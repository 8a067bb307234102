//! # ServiceBus Transport Demo
//!
//! Runs the transport against an in-memory namespace: provisions a
//! publish/subscribe endpoint, subscribes to one event, publishes it and
//! sends a command, waits for both to be handled and shuts down.
//!
//! ```bash
//! cargo run --bin servicebus-demo -- config/transport.toml
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use servicebus_transport::client::InMemoryNamespace;
use servicebus_transport::logging::init_structured_logging;
use servicebus_transport::receiving::handler_fn;
use servicebus_transport::{
    HostSettings, LogicalAddress, MessageType, NamingConventions, OutgoingMessage, ReceiveSettings,
    ReceiverDefinition, RoutingIntent, TransportConfig, TransportInfrastructure, TransportOperation,
};
use tokio::sync::mpsc;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_structured_logging();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = TransportConfig::load(config_path.as_deref()).context("loading transport configuration")?;

    let namespace = InMemoryNamespace::new();
    let infrastructure = TransportInfrastructure::initialize(
        config,
        HostSettings::new("Sales").with_setup_infrastructure(true),
        NamingConventions::default(),
        Arc::new(namespace.clone()),
        Arc::new(namespace.clone()),
        vec![ReceiverDefinition::new(
            ReceiveSettings::new("main", LogicalAddress::new("Sales"))
                .with_publish_subscribe(true)
                .with_error_queue("error"),
            Arc::new(namespace.clone()),
        )],
    )?;

    infrastructure.setup_infrastructure().await?;

    let pump = infrastructure
        .receiver("main")
        .context("receiver 'main' is not configured")?
        .clone();
    let order_placed = MessageType::new("Sales.Events.OrderPlaced");
    if let Some(subscriptions) = pump.subscriptions() {
        subscriptions.subscribe(&order_placed).await?;
    }

    let (handled_tx, mut handled_rx) = mpsc::unbounded_channel();
    pump.start(handler_fn(move |context| {
        let handled_tx = handled_tx.clone();
        async move {
            info!(
                message_id = %context.message_id,
                delivery_count = context.delivery_count,
                body = %String::from_utf8_lossy(&context.body),
                "📨 Handled message"
            );
            handled_tx.send(context.message_id)?;
            Ok(())
        }
    }))
    .await?;

    infrastructure
        .dispatcher()
        .dispatch(vec![
            TransportOperation::new(
                OutgoingMessage::new("event-1", b"order 42 placed".to_vec()),
                RoutingIntent::multicast(order_placed.clone()),
            ),
            TransportOperation::new(
                OutgoingMessage::new("command-1", b"bill order 42".to_vec()),
                RoutingIntent::unicast("Sales"),
            ),
        ])
        .await?;

    for _ in 0..2 {
        let message_id = tokio::time::timeout(Duration::from_secs(10), handled_rx.recv())
            .await
            .context("timed out waiting for a message")?
            .context("handler channel closed")?;
        info!(message_id = %message_id, "✅ Round trip complete");
    }

    info!(stats = ?pump.stats(), "Receiver statistics");
    infrastructure.shutdown().await?;
    Ok(())
}
