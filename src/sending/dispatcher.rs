//! # Message Dispatcher
//!
//! Resolves the destination of each outgoing operation, converts it to the
//! client's native message shape and sends it through the sender registry.
//! Operations for the same destination are sent as one batch; batches for
//! different destinations go out concurrently.
//!
//! The dispatcher never retries. Send failures propagate to the caller and
//! any retry policy belongs to the client.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use tracing::debug;

use super::registry::MessageSenderRegistry;
use crate::addressing::translate_address;
use crate::error::TransportResult;
use crate::message::{
    headers, NativeMessage, RoutingIntent, TransportOperation, ENCLOSED_MESSAGE_TYPES_SEPARATOR,
};
use crate::topology::Topology;

#[derive(Debug, Clone)]
pub struct MessageDispatcher {
    registry: Arc<MessageSenderRegistry>,
    topology: Topology,
}

impl MessageDispatcher {
    pub fn new(registry: Arc<MessageSenderRegistry>, topology: Topology) -> Self {
        Self { registry, topology }
    }

    /// Physical entity an operation with this routing is sent to
    pub fn resolve_destination(&self, routing: &RoutingIntent) -> String {
        match routing {
            RoutingIntent::Unicast { destination } => translate_address(destination),
            RoutingIntent::Multicast { .. } => self.topology.topic_to_publish_to.clone(),
        }
    }

    /// Send all operations, grouped by destination
    pub async fn dispatch(&self, operations: Vec<TransportOperation>) -> TransportResult<()> {
        if operations.is_empty() {
            return Ok(());
        }

        let now = Utc::now();
        let mut batches: BTreeMap<String, Vec<NativeMessage>> = BTreeMap::new();
        for operation in operations {
            let destination = self.resolve_destination(&operation.routing);
            batches
                .entry(destination)
                .or_default()
                .push(to_native_message(operation, now));
        }

        let sends = batches.into_iter().map(|(destination, messages)| async move {
            let sender = self.registry.get_sender(&destination).await?;
            debug!(
                destination = %destination,
                count = messages.len(),
                "📤 Dispatching batch"
            );
            sender.send_messages(messages).await
        });

        try_join_all(sends).await?;
        Ok(())
    }
}

/// Map an operation to the client's message shape
///
/// Delay constraints become the scheduled enqueue time and
/// discard-if-not-received-before becomes the time-to-live.
fn to_native_message(operation: TransportOperation, now: DateTime<Utc>) -> NativeMessage {
    let TransportOperation {
        message,
        routing,
        constraints,
    } = operation;

    let mut application_properties = message.headers;
    application_properties.insert(headers::MESSAGE_ID.to_string(), message.message_id.clone());

    if let RoutingIntent::Multicast { message_types } = &routing {
        if !message_types.is_empty() {
            let enclosed = message_types
                .iter()
                .map(|message_type| message_type.full_name())
                .collect::<Vec<_>>()
                .join(&ENCLOSED_MESSAGE_TYPES_SEPARATOR.to_string());
            application_properties.insert(headers::ENCLOSED_MESSAGE_TYPES.to_string(), enclosed);
        }
    }

    NativeMessage {
        message_id: message.message_id,
        body: message.body,
        application_properties,
        scheduled_enqueue_time: constraints.scheduled_enqueue_time(now),
        time_to_live: constraints.discard_if_not_received_before,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addressing::LogicalAddress;
    use crate::message::{DeliveryConstraints, MessageType, OutgoingMessage};
    use std::time::Duration;

    #[test]
    fn test_unicast_and_multicast_resolution() {
        let registry = Arc::new(MessageSenderRegistry::new(Arc::new(
            crate::client::InMemoryNamespace::new(),
        )));
        let dispatcher =
            MessageDispatcher::new(registry, Topology::hierarchy("events", "events-sales"));

        let unicast =
            RoutingIntent::unicast(LogicalAddress::new("Orders").with_qualifier("retries"));
        assert_eq!(dispatcher.resolve_destination(&unicast), "Orders.retries");

        let multicast = RoutingIntent::multicast(MessageType::new("Sales.OrderPlaced"));
        assert_eq!(dispatcher.resolve_destination(&multicast), "events");
    }

    #[test]
    fn test_native_message_carries_constraints_and_types() {
        let now = Utc::now();
        let operation = TransportOperation::new(
            OutgoingMessage::new("m1", b"body".to_vec()).with_header("Custom", "1"),
            RoutingIntent::Multicast {
                message_types: vec![
                    MessageType::new("Sales.OrderPlaced"),
                    MessageType::new("Sales.IOrderEvent"),
                ],
            },
        )
        .with_constraints(
            DeliveryConstraints::default()
                .delay_for(Duration::from_secs(30))
                .discard_if_not_received_before(Duration::from_secs(300)),
        );

        let native = to_native_message(operation, now);

        assert_eq!(native.message_id, "m1");
        assert_eq!(
            native.application_properties.get(headers::ENCLOSED_MESSAGE_TYPES).map(String::as_str),
            Some("Sales.OrderPlaced;Sales.IOrderEvent")
        );
        assert_eq!(native.application_properties.get("Custom").map(String::as_str), Some("1"));
        assert_eq!(
            native.application_properties.get(headers::MESSAGE_ID).map(String::as_str),
            Some("m1")
        );
        assert_eq!(native.scheduled_enqueue_time, Some(now + chrono::Duration::seconds(30)));
        assert_eq!(native.time_to_live, Some(Duration::from_secs(300)));
    }

    #[test]
    fn test_unicast_has_no_enclosed_types() {
        let operation = TransportOperation::new(
            OutgoingMessage::new("m1", Vec::new()),
            RoutingIntent::unicast("Orders"),
        );
        let native = to_native_message(operation, Utc::now());

        assert!(!native
            .application_properties
            .contains_key(headers::ENCLOSED_MESSAGE_TYPES));
        assert_eq!(native.scheduled_enqueue_time, None);
        assert_eq!(native.time_to_live, None);
    }
}
