use secrecy::{ExposeSecret, SecretBox};
use std::env;
use thiserror::Error;

/// Address of the public Sense endpoint
pub const DEFAULT_HOST: &str = "35.236.162.35:50051";

pub const API_KEY_VAR: &str = "COCHLEAR_SENSE_API_KEY";
pub const HOST_VAR: &str = "COCHLEAR_SENSE_HOST";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid host '{host}': {reason}")]
    InvalidHost { host: String, reason: String },
}

/// Connection settings for the Sense service
#[derive(Debug)]
pub struct SenseConfig {
    /// `host:port` of the gRPC server
    pub host: String,
    api_key: SecretBox<String>,
}

impl SenseConfig {
    pub fn new(host: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            api_key: SecretBox::new(Box::new(api_key.into())),
        }
    }

    /// Load configuration from environment variables
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if it exists (for development)
        dotenvy::dotenv().ok();

        let api_key =
            env::var(API_KEY_VAR).map_err(|_| ConfigError::MissingEnvVar(API_KEY_VAR.into()))?;
        let host = env::var(HOST_VAR).unwrap_or_else(|_| DEFAULT_HOST.to_string());

        Ok(Self::new(host, api_key))
    }

    /// Replace the host and/or key loaded from the environment
    pub fn with_overrides(mut self, host: Option<String>, api_key: Option<String>) -> Self {
        if let Some(host) = host {
            self.host = host;
        }
        if let Some(key) = api_key {
            self.api_key = SecretBox::new(Box::new(key));
        }
        self
    }

    /// Endpoint URI for tonic; plain `host:port` gets an `http://` scheme
    pub fn endpoint_uri(&self) -> Result<String, ConfigError> {
        let host = self.host.trim();
        if host.is_empty() {
            return Err(ConfigError::InvalidHost {
                host: self.host.clone(),
                reason: "host cannot be empty".to_string(),
            });
        }
        if host.contains("://") {
            Ok(host.to_string())
        } else {
            Ok(format!("http://{}", host))
        }
    }

    /// Get the API key (use only when building requests)
    pub fn api_key(&self) -> &str {
        self.api_key.expose_secret()
    }
}

/// Load configuration with helpful error messages for development
pub fn load_config() -> Result<SenseConfig, ConfigError> {
    match SenseConfig::load() {
        Ok(config) => {
            log::info!("Loaded Sense configuration (host {})", config.host);
            Ok(config)
        }
        Err(ConfigError::MissingEnvVar(var)) => {
            log::error!("Missing required environment variable: {}", var);
            log::error!("Create a .env file in the project root with:");
            log::error!("{}=your_api_key_here", var);
            Err(ConfigError::MissingEnvVar(var))
        }
        Err(e) => {
            log::error!("Configuration error: {}", e);
            Err(e)
        }
    }
}
