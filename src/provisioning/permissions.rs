//! # Namespace Permissions
//!
//! Probes once per direction whether the credentials may manage entities,
//! and caches the answer for the life of the process.
//!
//! Authorization failures and transient transport failures answer `false`.
//! Any other error propagates as a configuration error and is not cached,
//! so the next call probes again.

use std::sync::Arc;

use tokio::sync::OnceCell;
use tracing::{error, info, warn};

use crate::client::{AccessDirection, AdministrationClient};
use crate::error::{TransportError, TransportResult};

pub struct NamespacePermissions {
    admin: Arc<dyn AdministrationClient>,
    can_send: OnceCell<bool>,
    can_receive: OnceCell<bool>,
}

impl std::fmt::Debug for NamespacePermissions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NamespacePermissions")
            .field("can_send", &self.can_send.get())
            .field("can_receive", &self.can_receive.get())
            .finish()
    }
}

impl NamespacePermissions {
    pub fn new(admin: Arc<dyn AdministrationClient>) -> Self {
        Self {
            admin,
            can_send: OnceCell::new(),
            can_receive: OnceCell::new(),
        }
    }

    /// Whether send-side entities (topics) may be managed
    pub async fn can_send(&self) -> TransportResult<bool> {
        self.probe(AccessDirection::Send, &self.can_send).await
    }

    /// Whether receive-side entities (queues, subscriptions, rules) may be managed
    pub async fn can_receive(&self) -> TransportResult<bool> {
        self.probe(AccessDirection::Receive, &self.can_receive).await
    }

    async fn probe(&self, direction: AccessDirection, cached: &OnceCell<bool>) -> TransportResult<bool> {
        cached
            .get_or_try_init(|| async {
                match self.admin.check_manage_rights(direction).await {
                    Ok(()) => {
                        info!(direction = %direction, "🔐 Namespace manage rights confirmed");
                        Ok(true)
                    }
                    Err(e) if e.is_unauthorized() || e.is_transient() => {
                        warn!(
                            direction = %direction,
                            error = %e,
                            "🔐 Namespace manage rights unavailable, entities must be created by the deployer"
                        );
                        Ok(false)
                    }
                    Err(e) => {
                        error!(direction = %direction, error = %e, "Namespace permission probe failed");
                        Err(TransportError::configuration(
                            "namespace permissions",
                            format!("probing {direction} manage rights failed: {e}"),
                        ))
                    }
                }
            })
            .await
            .copied()
    }
}
