use axum::http::HeaderValue;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, error, warn};

use crate::ws::DocumentDefaults;

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

    /// CORS allowed origins, comma separated
    pub cors_origins: Option<String>,

    /// Events queued per connection before backpressure kicks in
    #[serde(default = "default_outbox_capacity")]
    pub outbox_capacity: usize,

    /// Largest websocket frame accepted from a client
    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,

    /// Language tag of a freshly created session
    #[serde(default = "default_language")]
    pub default_language: String,

    /// Code of a freshly created session
    #[serde(default = "default_code")]
    pub default_code: String,
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

        // Load from environment variables using envy
        match envy::from_env::<Config>() {
            Ok(config) => {
                info!("✅ Configuration loaded successfully");
                Ok(config)
            }
            Err(e) => {
                error!("❌ Failed to load configuration: {}", e);
                Err(ConfigError::EnvError(e))
            }
        }
    }

    /// Get the full server address
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check if running in development mode
    pub fn is_development(&self) -> bool {
        self.environment.to_lowercase() == "dev" || self.environment.to_lowercase() == "development"
    }

    pub fn document_defaults(&self) -> DocumentDefaults {
        DocumentDefaults {
            code: self.default_code.clone(),
            language: self.default_language.clone(),
        }
    }

    /// Build the CORS layer. Without explicit origins, development allows
    /// any origin and every other environment allows none.
    pub fn cors_layer(&self) -> CorsLayer {
        let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);

        match &self.cors_origins {
            Some(origins) => {
                let origins: Vec<HeaderValue> = origins
                    .split(',')
                    .map(str::trim)
                    .filter(|o| !o.is_empty())
                    .filter_map(|o| match o.parse::<HeaderValue>() {
                        Ok(v) => Some(v),
                        Err(_) => {
                            warn!("Ignoring invalid CORS origin '{}'", o);
                            None
                        }
                    })
                    .collect();
                layer.allow_origin(origins)
            }
            None if self.is_development() => layer.allow_origin(Any),
            None => layer,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            environment: default_environment(),
            cors_origins: None,
            outbox_capacity: default_outbox_capacity(),
            max_message_bytes: default_max_message_bytes(),
            default_language: default_language(),
            default_code: default_code(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Environment variable error: {0}")]
    EnvError(#[from] envy::Error),
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3001
}

fn default_environment() -> String {
    "development".to_string()
}

fn default_outbox_capacity() -> usize {
    256
}

fn default_max_message_bytes() -> usize {
    1024 * 1024
}

fn default_language() -> String {
    DocumentDefaults::default().language
}

fn default_code() -> String {
    DocumentDefaults::default().code
}
