//! # Address Translation
//!
//! Maps logical application-level addresses onto physical entity names.
//!
//! The physical name format `base[-discriminator][.qualifier]` is the only
//! contract shared across processes: a sender and the provisioning step that
//! created the entity must agree on it byte for byte. No escaping is applied;
//! callers supply names that are already valid for the target entity.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Application-level name for a destination, independent of physical naming
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LogicalAddress {
    /// Endpoint name
    pub base_address: String,
    /// Instance qualifier (e.g. a scale-out instance id)
    pub discriminator: Option<String>,
    /// Address qualifier (e.g. "retries", "timeouts")
    pub qualifier: Option<String>,
}

impl LogicalAddress {
    pub fn new(base_address: impl Into<String>) -> Self {
        Self {
            base_address: base_address.into(),
            discriminator: None,
            qualifier: None,
        }
    }

    pub fn with_discriminator(mut self, discriminator: impl Into<String>) -> Self {
        self.discriminator = Some(discriminator.into());
        self
    }

    pub fn with_qualifier(mut self, qualifier: impl Into<String>) -> Self {
        self.qualifier = Some(qualifier.into());
        self
    }

    /// Physical entity name for this address
    pub fn to_physical_name(&self) -> String {
        translate_address(self)
    }
}

impl fmt::Display for LogicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&translate_address(self))
    }
}

impl From<&str> for LogicalAddress {
    fn from(base_address: &str) -> Self {
        Self::new(base_address)
    }
}

impl From<String> for LogicalAddress {
    fn from(base_address: String) -> Self {
        Self::new(base_address)
    }
}

/// Translate a logical address into a physical entity name.
///
/// Pure and total: the same address always yields the same name.
pub fn translate_address(address: &LogicalAddress) -> String {
    let extra = address.discriminator.as_ref().map_or(0, |d| d.len() + 1)
        + address.qualifier.as_ref().map_or(0, |q| q.len() + 1);

    let mut physical = String::with_capacity(address.base_address.len() + extra);
    physical.push_str(&address.base_address);

    if let Some(discriminator) = &address.discriminator {
        physical.push('-');
        physical.push_str(discriminator);
    }

    if let Some(qualifier) = &address.qualifier {
        physical.push('.');
        physical.push_str(qualifier);
    }

    physical
}
