//! Configuration Loader
//!
//! Layered loading: built-in defaults, then an optional file (TOML, YAML or
//! JSON, chosen by extension), then `SERVICEBUS_TRANSPORT__*` environment
//! variables. The merged result is validated before it is returned.

use std::path::Path;
use tracing::{debug, info};

use super::TransportConfig;
use crate::error::{TransportError, TransportResult};

/// Prefix for environment overrides, e.g. `SERVICEBUS_TRANSPORT__PREFETCH_MULTIPLIER=20`
pub const ENV_PREFIX: &str = "SERVICEBUS_TRANSPORT";

/// Separator between nested keys in environment overrides
pub const ENV_SEPARATOR: &str = "__";

/// Load configuration using the default environment prefix
pub fn load(path: Option<&Path>) -> TransportResult<TransportConfig> {
    load_with_env_prefix(path, ENV_PREFIX)
}

/// Load configuration with an explicit environment prefix
pub fn load_with_env_prefix(path: Option<&Path>, env_prefix: &str) -> TransportResult<TransportConfig> {
    let defaults = config::Config::try_from(&TransportConfig::default())?;

    let mut builder = config::Config::builder().add_source(defaults);

    if let Some(path) = path {
        if !path.exists() {
            return Err(TransportError::configuration(
                "config_loader",
                format!("configuration file not found: {}", path.display()),
            ));
        }

        debug!(path = %path.display(), "Loading transport configuration file");
        builder = builder.add_source(config::File::from(path));
    }

    builder = builder.add_source(
        config::Environment::with_prefix(env_prefix)
            .prefix_separator(ENV_SEPARATOR)
            .separator(ENV_SEPARATOR)
            .try_parsing(true),
    );

    let config: TransportConfig = builder.build()?.try_deserialize()?;
    config.validate()?;

    info!(
        topology = %config.topology,
        entity_maximum_size_gb = config.entity_maximum_size_gb,
        enable_partitioning = config.enable_partitioning,
        prefetch_multiplier = config.prefetch_multiplier,
        "Transport configuration loaded"
    );

    Ok(config)
}
