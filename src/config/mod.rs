//! Locating and loading the application config and service definitions.

use anyhow::{Context, Result};
use ff_core::config::Config;
use ff_pipeline::ServiceDefinition;
use std::path::{Path, PathBuf};

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config = Config::from_toml(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    for warning in config.validate() {
        tracing::warn!("{}", warning);
    }

    Ok(config)
}

/// Load config from default locations or return default config
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    let default_paths = [
        "./fileforge.toml",
        "~/.config/fileforge/config.toml",
        "/etc/fileforge/config.toml",
    ];

    for path_str in default_paths {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if path.exists() {
            return load_config(path);
        }
    }

    Ok(Config::default())
}

/// The service definition to use: the explicit path, else `service_file`
/// from config.
pub fn service_path(explicit: Option<PathBuf>, config: &Config) -> Result<PathBuf> {
    explicit
        .or_else(|| config.service_file.clone())
        .map(|p| PathBuf::from(shellexpand::tilde(&p.to_string_lossy()).as_ref()))
        .context("No service definition given (use --service or set service_file in config)")
}

/// Load and validate a service definition file
pub fn load_service(path: &Path) -> Result<ServiceDefinition> {
    let definition = ServiceDefinition::load(path)
        .with_context(|| format!("Failed to load service definition: {:?}", path))?;
    definition
        .validate()
        .with_context(|| format!("Invalid service definition: {:?}", path))?;
    Ok(definition)
}
