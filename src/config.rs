use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info};

use crate::ws::HubConfig;

/// Application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Environment (dev, staging, prod)
    #[serde(default = "default_environment")]
    pub environment: String,

    /// CORS allowed origins, comma separated. Any origin is allowed when unset.
    pub cors_origins: Option<String>,

    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Frames a connection may have queued before it is evicted from its session
    #[serde(default = "default_send_queue_capacity")]
    pub send_queue_capacity: usize,

    /// Broadcasts the router may have pending before readers are slowed down
    #[serde(default = "default_hub_inbox_capacity")]
    pub hub_inbox_capacity: usize,

    /// Largest inbound WebSocket message accepted, in bytes
    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,
}

impl Config {
    /// Load configuration from environment variables or app.env file
    pub fn load() -> Result<Self, ConfigError> {
        // Try to load from app.env file first
        if std::path::Path::new("app.env").exists() {
            dotenvy::from_filename("app.env").ok();
        } else {
            // Fallback to .env file
            dotenvy::dotenv().ok();
        }

        let config = envy::from_env::<Config>().map_err(|e| {
            error!("Failed to load configuration: {}", e);
            ConfigError::EnvError(e)
        })?;
        config.validate()?;
        info!("Configuration loaded successfully");
        Ok(config)
    }

    /// Reject values the relay cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.send_queue_capacity == 0 {
            return Err(ConfigError::Invalid("SEND_QUEUE_CAPACITY must be greater than 0"));
        }
        if self.hub_inbox_capacity == 0 {
            return Err(ConfigError::Invalid("HUB_INBOX_CAPACITY must be greater than 0"));
        }
        if self.max_message_bytes == 0 {
            return Err(ConfigError::Invalid("MAX_MESSAGE_BYTES must be greater than 0"));
        }
        Ok(())
    }

    /// Get the full server address
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Settings for the session hub
    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            inbox_capacity: self.hub_inbox_capacity,
        }
    }

    /// Parsed list of allowed CORS origins, if restricted
    pub fn allowed_origins(&self) -> Option<Vec<String>> {
        self.cors_origins.as_ref().map(|origins| {
            origins
                .split(',')
                .map(|o| o.trim().to_string())
                .filter(|o| !o.is_empty())
                .collect()
        })
    }

    /// Check if running in development mode
    pub fn is_development(&self) -> bool {
        self.environment.to_lowercase() == "dev" || self.environment.to_lowercase() == "development"
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            environment: default_environment(),
            log_level: default_log_level(),
            cors_origins: None,
            send_queue_capacity: default_send_queue_capacity(),
            hub_inbox_capacity: default_hub_inbox_capacity(),
            max_message_bytes: default_max_message_bytes(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Environment variable error: {0}")]
    EnvError(#[from] envy::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_environment() -> String {
    "development".to_string()
}

fn default_send_queue_capacity() -> usize {
    256
}

fn default_hub_inbox_capacity() -> usize {
    1024
}

fn default_max_message_bytes() -> usize {
    1024 * 1024
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.send_queue_capacity, 256);
        assert_eq!(config.server_address(), "0.0.0.0:8080");
        assert!(config.is_development());
    }

    #[test]
    fn zero_queue_capacity_is_rejected() {
        let config = Config {
            send_queue_capacity: 0,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn reads_fields_from_env_pairs() {
        let vars = vec![
            ("PORT".to_string(), "9000".to_string()),
            ("SEND_QUEUE_CAPACITY".to_string(), "16".to_string()),
            ("CORS_ORIGINS".to_string(), "http://a.test, ,http://b.test".to_string()),
        ];
        let config: Config = envy::from_iter(vars).unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.send_queue_capacity, 16);
        assert_eq!(config.hub_inbox_capacity, 1024);
        assert_eq!(
            config.allowed_origins(),
            Some(vec!["http://a.test".to_string(), "http://b.test".to_string()])
        );
    }
}
