//! # Message Types
//!
//! Outgoing and received message shapes, delivery constraints and routing
//! intent. These are the values that cross the boundary between the
//! application framework and the transport client.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use crate::addressing::LogicalAddress;

/// Well-known header names
pub mod headers {
    /// Message identifier assigned by the sending application
    pub const MESSAGE_ID: &str = "MessageId";
    /// Semicolon-separated list of fully-qualified message types carried by a
    /// published message. Subscription rules filter on this header.
    pub const ENCLOSED_MESSAGE_TYPES: &str = "EnclosedMessageTypes";
}

/// Separator used in the enclosed message types header
pub const ENCLOSED_MESSAGE_TYPES_SEPARATOR: char = ';';

/// Identifier for a message type (used for publish/subscribe routing)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageType {
    full_name: String,
}

impl MessageType {
    pub fn new(full_name: impl Into<String>) -> Self {
        Self {
            full_name: full_name.into(),
        }
    }

    /// Fully-qualified type name, e.g. `Sales.Events.OrderPlaced`
    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    /// Whether the given enclosed-types header value lists this type
    pub fn is_enclosed_in(&self, enclosed_types: &str) -> bool {
        enclosed_types
            .split(ENCLOSED_MESSAGE_TYPES_SEPARATOR)
            .map(str::trim)
            .any(|t| t == self.full_name)
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full_name)
    }
}

/// Delay requested for a message before it becomes visible
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelayedDelivery {
    /// Deliver after the given delay, measured from dispatch
    DelayFor(Duration),
    /// Deliver no earlier than the given instant
    DoNotDeliverBefore(DateTime<Utc>),
}

/// Delivery hints attached to an outgoing message by the application
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryConstraints {
    pub delayed_delivery: Option<DelayedDelivery>,
    /// Discard the message if it is not received within this window
    pub discard_if_not_received_before: Option<Duration>,
}

impl DeliveryConstraints {
    pub fn delay_for(mut self, delay: Duration) -> Self {
        self.delayed_delivery = Some(DelayedDelivery::DelayFor(delay));
        self
    }

    pub fn do_not_deliver_before(mut self, at: DateTime<Utc>) -> Self {
        self.delayed_delivery = Some(DelayedDelivery::DoNotDeliverBefore(at));
        self
    }

    pub fn discard_if_not_received_before(mut self, time_to_be_received: Duration) -> Self {
        self.discard_if_not_received_before = Some(time_to_be_received);
        self
    }

    /// Native scheduled enqueue time, relative to `now`
    pub fn scheduled_enqueue_time(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self.delayed_delivery? {
            DelayedDelivery::DelayFor(delay) => Some(
                chrono::Duration::from_std(delay)
                    .ok()
                    .and_then(|delay| now.checked_add_signed(delay))
                    .unwrap_or(DateTime::<Utc>::MAX_UTC),
            ),
            DelayedDelivery::DoNotDeliverBefore(at) => Some(at),
        }
    }
}

/// Application message handed to the dispatcher
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingMessage {
    pub message_id: String,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl OutgoingMessage {
    pub fn new(message_id: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            message_id: message_id.into(),
            headers: HashMap::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }
}

/// How an outgoing message is routed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutingIntent {
    /// Exactly one physical entity, resolved from the logical address
    Unicast { destination: LogicalAddress },
    /// Fanned out through the shared publish topic
    Multicast { message_types: Vec<MessageType> },
}

impl RoutingIntent {
    pub fn unicast(destination: impl Into<LogicalAddress>) -> Self {
        Self::Unicast {
            destination: destination.into(),
        }
    }

    pub fn multicast(message_type: MessageType) -> Self {
        Self::Multicast {
            message_types: vec![message_type],
        }
    }
}

/// One message plus where and how it should go
#[derive(Debug, Clone)]
pub struct TransportOperation {
    pub message: OutgoingMessage,
    pub routing: RoutingIntent,
    pub constraints: DeliveryConstraints,
}

impl TransportOperation {
    pub fn new(message: OutgoingMessage, routing: RoutingIntent) -> Self {
        Self {
            message,
            routing,
            constraints: DeliveryConstraints::default(),
        }
    }

    pub fn with_constraints(mut self, constraints: DeliveryConstraints) -> Self {
        self.constraints = constraints;
        self
    }
}

/// Message in the shape the transport client sends it
#[derive(Debug, Clone, PartialEq)]
pub struct NativeMessage {
    pub message_id: String,
    pub body: Vec<u8>,
    pub application_properties: HashMap<String, String>,
    pub scheduled_enqueue_time: Option<DateTime<Utc>>,
    pub time_to_live: Option<Duration>,
}

impl NativeMessage {
    pub fn new(message_id: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            message_id: message_id.into(),
            body: body.into(),
            application_properties: HashMap::new(),
            scheduled_enqueue_time: None,
            time_to_live: None,
        }
    }
}

/// Message received in peek-lock mode
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedMessage {
    pub message_id: String,
    pub body: Vec<u8>,
    pub headers: HashMap<String, String>,
    /// Token identifying the lock held on this delivery
    pub lock_token: String,
    /// Number of deliveries including this one
    pub delivery_count: u32,
    pub enqueued_at: DateTime<Utc>,
    /// Entity the message was received from
    pub entity_path: String,
}
