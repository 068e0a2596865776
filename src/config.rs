//! Configuration for the AVS client
//!
//! Loaded from TOML. Credentials never live in the file: the `[auth]`
//! section names the environment variables that hold them, and those are
//! read when the token provider is built.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Complete client configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AvsConfig {
    #[serde(default)]
    pub avs: AvsSection,
    #[serde(default)]
    pub auth: AuthSection,
    #[serde(default)]
    pub connection: ConnectionSection,
}

/// Service endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AvsSection {
    /// Base URL of the regional AVS endpoint
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Version prefix for the directives and events paths
    #[serde(default = "default_api_version")]
    pub api_version: String,
}

impl Default for AvsSection {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            api_version: default_api_version(),
        }
    }
}

fn default_endpoint() -> String {
    "https://avs-alexa-na.amazon.com".to_string()
}

fn default_api_version() -> String {
    "v20160207".to_string()
}

/// OAuth2 refresh-token grant settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthSection {
    #[serde(default = "default_token_url")]
    pub token_url: String,
    /// Environment variable containing the client id
    #[serde(default = "default_client_id_env")]
    pub client_id_env: String,
    /// Environment variable containing the client secret
    #[serde(default = "default_client_secret_env")]
    pub client_secret_env: String,
    /// Environment variable containing the refresh token
    #[serde(default = "default_refresh_token_env")]
    pub refresh_token_env: String,
    /// Assumed token lifetime when the server does not send `expires_in`
    #[serde(default = "default_token_lifetime")]
    pub token_lifetime_secs: u64,
    /// A token is refreshed this long before it expires
    #[serde(default = "default_refresh_margin")]
    pub refresh_margin_secs: u64,
}

impl Default for AuthSection {
    fn default() -> Self {
        Self {
            token_url: default_token_url(),
            client_id_env: default_client_id_env(),
            client_secret_env: default_client_secret_env(),
            refresh_token_env: default_refresh_token_env(),
            token_lifetime_secs: default_token_lifetime(),
            refresh_margin_secs: default_refresh_margin(),
        }
    }
}

fn default_token_url() -> String {
    "https://api.amazon.com/auth/o2/token".to_string()
}

fn default_client_id_env() -> String {
    "AVS_CLIENT_ID".to_string()
}

fn default_client_secret_env() -> String {
    "AVS_CLIENT_SECRET".to_string()
}

fn default_refresh_token_env() -> String {
    "AVS_REFRESH_TOKEN".to_string()
}

fn default_token_lifetime() -> u64 {
    3600
}

fn default_refresh_margin() -> u64 {
    30
}

/// Connection lifecycle tuning
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectionSection {
    /// Interval between keep-alive pings (default: 240 = four minutes)
    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,
    /// Pause between close and open inside a reconnect
    #[serde(default = "default_reconnect_pause")]
    pub reconnect_pause_ms: u64,
    /// Connect timeout of the HTTP client
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub reconnect: ReconnectSection,
}

impl Default for ConnectionSection {
    fn default() -> Self {
        Self {
            ping_interval_secs: default_ping_interval(),
            reconnect_pause_ms: default_reconnect_pause(),
            request_timeout_secs: default_request_timeout(),
            reconnect: ReconnectSection::default(),
        }
    }
}

fn default_ping_interval() -> u64 {
    240
}

fn default_reconnect_pause() -> u64 {
    1200
}

fn default_request_timeout() -> u64 {
    30
}

/// Retry schedule used when a reconnect fails to open the connection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReconnectSection {
    /// 0 means retry forever
    #[serde(default)]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_pattern")]
    pub backoff_pattern_ms: Vec<u64>,
    /// Delay once the backoff pattern is exhausted
    #[serde(default = "default_sustained_delay")]
    pub sustained_delay_ms: u64,
}

impl Default for ReconnectSection {
    fn default() -> Self {
        Self {
            max_attempts: 0,
            backoff_pattern_ms: default_backoff_pattern(),
            sustained_delay_ms: default_sustained_delay(),
        }
    }
}

fn default_backoff_pattern() -> Vec<u64> {
    vec![1000, 2000, 5000, 10000]
}

fn default_sustained_delay() -> u64 {
    30000
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl AvsConfig {
    /// Load and validate configuration from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: AvsConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        Url::parse(&self.avs.endpoint).map_err(|e| {
            ConfigError::InvalidConfig(format!("avs.endpoint '{}': {e}", self.avs.endpoint))
        })?;
        Url::parse(&self.auth.token_url).map_err(|e| {
            ConfigError::InvalidConfig(format!("auth.token_url '{}': {e}", self.auth.token_url))
        })?;

        if self.auth.refresh_margin_secs >= self.auth.token_lifetime_secs {
            return Err(ConfigError::InvalidConfig(format!(
                "auth.refresh_margin_secs ({}) must be smaller than auth.token_lifetime_secs ({})",
                self.auth.refresh_margin_secs, self.auth.token_lifetime_secs
            )));
        }

        if self.connection.ping_interval_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "connection.ping_interval_secs must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    /// Helper method to get environment variable with error propagation
    fn get_env_var_required(env_var_name: &str) -> Result<String, ConfigError> {
        std::env::var(env_var_name)
            .map_err(|_| ConfigError::EnvVarNotFound(env_var_name.to_string()))
    }

    /// Get the OAuth client id from its environment variable
    pub fn get_client_id(&self) -> Result<String, ConfigError> {
        Self::get_env_var_required(&self.auth.client_id_env)
    }

    /// Get the OAuth client secret from its environment variable
    pub fn get_client_secret(&self) -> Result<String, ConfigError> {
        Self::get_env_var_required(&self.auth.client_secret_env)
    }

    /// Get the refresh token from its environment variable
    pub fn get_refresh_token(&self) -> Result<String, ConfigError> {
        Self::get_env_var_required(&self.auth.refresh_token_env)
    }
}

impl ConnectionSection {
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    pub fn reconnect_pause(&self) -> Duration {
        Duration::from_millis(self.reconnect_pause_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
