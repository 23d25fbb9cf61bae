//! Command implementations.

mod send;
mod status;
mod validate;

pub use send::run_send;
pub use status::run_status;
pub use validate::run_validate;

use config_loader::ConfigLoader;
use contracts::ChannelConfig;
use tracing::info;

use crate::cli::ConfigArgs;
use crate::error::{CliError, Result};

/// Load the configuration file (or defaults) and apply CLI overrides
pub fn load_config(args: &ConfigArgs) -> Result<ChannelConfig> {
    let mut config = match &args.config {
        Some(path) => {
            if !path.exists() {
                return Err(CliError::config_not_found(path));
            }
            info!(config = %path.display(), "Loading configuration");
            ConfigLoader::load_from_path(path).map_err(|e| CliError::config_load(path, e))?
        }
        None => ChannelConfig::default(),
    };

    if let Some(endpoint) = &args.endpoint {
        info!(endpoint = %endpoint, "Overriding endpoint from CLI");
        config.network.endpoint_url = endpoint.clone();
    }
    if let Some(directory) = &args.storage_dir {
        info!(directory = %directory.display(), "Overriding storage directory from CLI");
        config.storage.directory = Some(directory.clone());
    }

    ConfigLoader::validate(&config).map_err(|source| CliError::ConfigValidation { source })?;
    Ok(config)
}
