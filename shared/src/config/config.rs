use std::fs;

use serde::de::DeserializeOwned;
use tracing::{debug, error, info};

use crate::types::server_config::{AppConfig, ClientConfig, ConfigError};

pub fn load_config(path: &str) -> Result<AppConfig, ConfigError> {
    let config: AppConfig = read_toml(path)?;
    validate_config(&config)?;
    info!("Config validated");
    Ok(config)
}

pub fn load_client_config(path: &str) -> Result<ClientConfig, ConfigError> {
    let config: ClientConfig = read_toml(path)?;
    validate_client_config(&config)?;
    info!("Client config validated");
    Ok(config)
}

fn read_toml<T: DeserializeOwned + std::fmt::Debug>(path: &str) -> Result<T, ConfigError> {
    info!("Loading configuration from: {}", path);

    let contents = fs::read_to_string(path)?;
    debug!("Processing file: {}", path);

    if contents.trim().is_empty() {
        error!("Configuration file is empty");
        return Err(ConfigError::InvalidConfig("empty file".into()));
    }

    let config: T = toml::from_str(&contents)?;

    info!("Configuration loaded successfully");
    debug!("Config: {:?}", config);

    Ok(config)
}

fn validate_config(config: &AppConfig) -> Result<(), ConfigError> {
    if config.server.bind.trim().is_empty() {
        return Err(ConfigError::InvalidConfig("bind cannot be empty".into()));
    }

    if config.server.max_connections == 0 {
        return Err(ConfigError::InvalidConfig(
            "max_connections must be greater than 0".into(),
        ));
    }

    if config.server.request_timeout_secs == 0 {
        return Err(ConfigError::InvalidConfig(
            "request_timeout_secs must be greater than 0".into(),
        ));
    }

    if config.server.port_admin == config.server.port_client {
        return Err(ConfigError::InvalidConfig(
            "port_admin and port_client must differ".into(),
        ));
    }

    if config.realtime.channel_capacity == 0 {
        return Err(ConfigError::InvalidConfig(
            "channel_capacity must be greater than 0".into(),
        ));
    }

    if config.realtime.keepalive_secs == 0 {
        return Err(ConfigError::InvalidConfig(
            "keepalive_secs must be greater than 0".into(),
        ));
    }

    // Without a token every admin request would be rejected; fail at load
    // time (including SIGHUP reloads) instead.
    match config.auth.resolved_admin_token() {
        None => {
            return Err(ConfigError::InvalidConfig(
                "admin_token must be set via the ADMIN_TOKEN env var or auth.admin_token".into(),
            ));
        }
        Some(token) if token.len() < 12 => {
            return Err(ConfigError::InvalidConfig(
                "admin_token must be at least 12 characters long".into(),
            ));
        }
        _ => {}
    }

    Ok(())
}

fn validate_client_config(config: &ClientConfig) -> Result<(), ConfigError> {
    for (name, url) in [
        ("base_url", Some(config.api.base_url.as_str())),
        ("admin_url", config.api.admin_url.as_deref()),
    ] {
        if let Some(url) = url {
            if !url.starts_with("http://") {
                return Err(ConfigError::InvalidConfig(format!(
                    "{} must be an http:// URL, got {}",
                    name, url
                )));
            }
        }
    }

    if config.refresh.timeout_ms == 0 {
        return Err(ConfigError::InvalidConfig(
            "refresh.timeout_ms must be greater than 0".into(),
        ));
    }

    Ok(())
}
