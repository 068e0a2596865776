//! Error types for the AVS client
//!
//! Each layer owns a focused error enum (multipart parsing, authentication,
//! transport, event bus, configuration). [`AvsError`] folds them together for
//! the public connection API.

use crate::auth::AuthError;
use crate::config::ConfigError;
use crate::connection::ConnectionState;
use crate::events::EventBusError;
use crate::multipart::MultipartError;
use crate::transport::TransportError;
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

/// Main error type for AVS client operations
#[derive(Debug, Error)]
pub enum AvsError {
    #[error("Multipart parse fault: {0}")]
    Multipart(#[from] MultipartError),

    #[error("Authentication failed: {0}")]
    Auth(#[from] AuthError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Event bus error: {0}")]
    EventBus(#[from] EventBusError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Not connected - current state: {state:?}")]
    NotConnected { state: ConnectionState },
}

impl AvsError {
    /// Error text safe to put in logs or show to a user
    pub fn sanitized_message(&self) -> String {
        sanitize_error_message(&self.to_string())
    }

    /// True when the failure came from the network or the server rather than local state
    pub fn is_transport(&self) -> bool {
        matches!(self, AvsError::Transport(_))
    }
}

static SECRET_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(access_token|refresh_token|client_secret|password|token|secret|bearer)([=:]\s*|\s+)[^\s,&]+")
        .expect("secret pattern is valid")
});

static SECRET_JSON_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)"(access_token|refresh_token|client_secret)"\s*:\s*"[^"]*""#)
        .expect("secret json pattern is valid")
});

/// Redact credentials from error text and cap its length
pub fn sanitize_error_message(message: &str) -> String {
    let mut sanitized = message.to_string();

    sanitized = SECRET_JSON_PATTERN
        .replace_all(&sanitized, "\"${1}\":\"***\"")
        .to_string();
    sanitized = SECRET_PATTERN.replace_all(&sanitized, "${1}=***").to_string();

    // Truncate very long messages - ensure total length is <= 500
    if sanitized.len() > 500 {
        let truncate_suffix = "...[truncated]";
        let mut cut = 500 - truncate_suffix.len();
        while !sanitized.is_char_boundary(cut) {
            cut -= 1;
        }
        sanitized = format!("{}{}", &sanitized[..cut], truncate_suffix);
    }

    sanitized
}

/// Result type for AVS client operations
pub type AvsResult<T> = Result<T, AvsError>;
