#![allow(clippy::doc_markdown)] // Allow technical terms like ServiceBus, AMQP in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # ServiceBus Transport
//!
//! Transport adapter between a message-driven application framework and a
//! cloud queue/topic namespace.
//!
//! ## Overview
//!
//! The framework speaks in logical addresses, outgoing operations and
//! message handlers. This crate turns those into physical entity names,
//! pooled senders, peek-lock receive pumps and topic subscriptions with
//! per-message-type filter rules.
//!
//! ## Architecture
//!
//! ```text
//! TransportInfrastructure
//!   ├── MessageDispatcher ──→ MessageSenderRegistry ──→ TransportClient
//!   ├── MessagePump (per receiver) ──→ MessageReceiver
//!   │     └── SubscriptionManager (publish/subscribe endpoints)
//!   └── EntityProvisioner + NamespacePermissions ──→ AdministrationClient
//! ```
//!
//! Everything above the `client` traits is written against those traits
//! only. [`client::InMemoryNamespace`] implements all of them for tests,
//! demos and local development.
//!
//! ## Module Organization
//!
//! - [`addressing`] - logical address to physical entity name
//! - [`topology`] - publish/subscribe topics and naming conventions
//! - [`message`] - outgoing operations, routing and received messages
//! - [`client`] - transport client interface and in-memory namespace
//! - [`sending`] - sender registry and dispatcher
//! - [`provisioning`] - permission probe, entity creation, subscriptions
//! - [`receiving`] - message pump and handler contract
//! - [`resilience`] - receive circuit breaker
//! - [`infrastructure`] - wiring, setup, diagnostics and shutdown
//! - [`config`] - typed configuration and layered loading
//! - [`error`] - error taxonomy
//! - [`logging`] - structured logging initialization
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use servicebus_transport::{
//!     client::InMemoryNamespace, config::{HostSettings, ReceiveSettings, TransportConfig},
//!     infrastructure::{ReceiverDefinition, TransportInfrastructure},
//!     receiving::handler_fn, LogicalAddress, NamingConventions,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let namespace = InMemoryNamespace::new();
//! let infrastructure = TransportInfrastructure::initialize(
//!     TransportConfig::default(),
//!     HostSettings::new("Sales").with_setup_infrastructure(true),
//!     NamingConventions::default(),
//!     Arc::new(namespace.clone()),
//!     Arc::new(namespace.clone()),
//!     vec![ReceiverDefinition::new(
//!         ReceiveSettings::new("main", LogicalAddress::new("Sales")),
//!         Arc::new(namespace.clone()),
//!     )],
//! )?;
//!
//! infrastructure.setup_infrastructure().await?;
//! if let Some(pump) = infrastructure.receiver("main") {
//!     pump.start(handler_fn(|context| async move {
//!         println!("received {}", context.message_id);
//!         Ok(())
//!     }))
//!     .await?;
//! }
//!
//! infrastructure.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod addressing;
pub mod client;
pub mod config;
pub mod error;
pub mod infrastructure;
pub mod logging;
pub mod message;
pub mod provisioning;
pub mod receiving;
pub mod resilience;
pub mod sending;
pub mod topology;

pub use addressing::{translate_address, LogicalAddress};
pub use config::{HostSettings, ReceiveSettings, TransportConfig};
pub use error::{TransportError, TransportResult};
pub use infrastructure::{ReceiverDefinition, TransportInfrastructure};
pub use message::{
    DeliveryConstraints, MessageType, OutgoingMessage, ReceivedMessage, RoutingIntent,
    TransportOperation,
};
pub use receiving::{
    handler_fn, ErrorHandleResult, MessageContext, MessageHandler, MessagePump, PumpState,
};
pub use sending::{MessageDispatcher, MessageSenderRegistry};
pub use topology::{NamingConventions, Topology};
