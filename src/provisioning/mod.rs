//! # Provisioning
//!
//! Namespace permission probing, idempotent entity creation and
//! publish/subscribe rule management. Everything here is gated on the
//! permission probe; without manage rights the deployer owns the entities.

pub mod creator;
pub mod permissions;
pub mod subscriptions;

pub use creator::{EntityProvisioner, EntitySettings, ProvisionOutcome};
pub use permissions::NamespacePermissions;
pub use subscriptions::SubscriptionManager;
