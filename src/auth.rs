//! Bearer token lifecycle
//!
//! AVS requests carry `Authorization: Bearer <access token>`. Access tokens
//! are obtained with an OAuth2 refresh-token grant and cached until they are
//! within a safety margin of expiry.

use crate::config::AvsConfig;
use crate::error::AvsResult;
use reqwest::Client;
use serde::Deserialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Authentication errors
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Missing credential: {0}")]
    MissingCredential(String),

    #[error("Token request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Token endpoint rejected refresh: {status} - {body}")]
    Rejected { status: u16, body: String },

    #[error("Malformed token response: {0}")]
    MalformedResponse(String),
}

/// Source of bearer tokens for AVS requests
#[async_trait::async_trait]
pub trait AccessTokenSource: Send + Sync {
    /// A currently valid access token
    async fn access_token(&self) -> Result<String, AuthError>;

    /// Forget the cached token (e.g. after the server answered 401)
    async fn invalidate(&self) {}
}

/// OAuth2 client credentials plus the long-lived refresh token
#[derive(Clone)]
pub struct Credentials {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
}

impl Credentials {
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        refresh_token: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            refresh_token: refresh_token.into(),
        }
    }

    /// Read credentials from the environment variables named in the config
    pub fn from_config(config: &AvsConfig) -> AvsResult<Self> {
        Ok(Self {
            client_id: config.get_client_id()?,
            client_secret: config.get_client_secret()?,
            refresh_token: config.get_refresh_token()?,
        })
    }

    fn check(&self) -> Result<(), AuthError> {
        for (name, value) in [
            ("client_id", &self.client_id),
            ("client_secret", &self.client_secret),
            ("refresh_token", &self.refresh_token),
        ] {
            if value.trim().is_empty() {
                return Err(AuthError::MissingCredential(name.to_string()));
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"***")
            .field("refresh_token", &"***")
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Debug)]
struct CachedToken {
    value: String,
    acquired_at: Instant,
    lifetime: Duration,
}

impl CachedToken {
    fn is_fresh(&self, margin: Duration) -> bool {
        self.acquired_at.elapsed() < self.lifetime.saturating_sub(margin)
    }
}

/// Lazily refreshing token cache
///
/// The cache sits behind an async mutex that is held across the refresh
/// request, so concurrent callers that all find the token stale trigger a
/// single refresh and then share its result.
pub struct TokenProvider {
    client: Client,
    token_url: String,
    credentials: Credentials,
    default_lifetime: Duration,
    margin: Duration,
    cached: Mutex<Option<CachedToken>>,
    refreshes: AtomicU64,
}

impl TokenProvider {
    pub fn new(
        credentials: Credentials,
        token_url: impl Into<String>,
        default_lifetime: Duration,
        margin: Duration,
    ) -> Result<Self, AuthError> {
        credentials.check()?;
        let client = Client::builder().build()?;

        Ok(Self {
            client,
            token_url: token_url.into(),
            credentials,
            default_lifetime,
            margin,
            cached: Mutex::new(None),
            refreshes: AtomicU64::new(0),
        })
    }

    pub fn from_config(config: &AvsConfig) -> AvsResult<Self> {
        let credentials = Credentials::from_config(config)?;
        Ok(Self::new(
            credentials,
            config.auth.token_url.clone(),
            Duration::from_secs(config.auth.token_lifetime_secs),
            Duration::from_secs(config.auth.refresh_margin_secs),
        )?)
    }

    /// Number of refresh requests issued so far
    pub fn refresh_count(&self) -> u64 {
        self.refreshes.load(Ordering::Relaxed)
    }

    async fn refresh(&self) -> Result<CachedToken, AuthError> {
        self.refreshes.fetch_add(1, Ordering::Relaxed);
        debug!(token_url = %self.token_url, "Refreshing access token");

        let response = self
            .client
            .post(&self.token_url)
            .form(&[
                ("client_id", self.credentials.client_id.as_str()),
                ("client_secret", self.credentials.client_secret.as_str()),
                ("refresh_token", self.credentials.refresh_token.as_str()),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "Token refresh rejected");
            return Err(AuthError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let text = response.text().await?;
        let token: TokenResponse = serde_json::from_str(&text)
            .map_err(|e| AuthError::MalformedResponse(e.to_string()))?;

        let lifetime = token
            .expires_in
            .map(Duration::from_secs)
            .unwrap_or(self.default_lifetime);
        info!(lifetime_secs = lifetime.as_secs(), "Access token refreshed");

        Ok(CachedToken {
            value: token.access_token,
            acquired_at: Instant::now(),
            lifetime,
        })
    }
}

#[async_trait::async_trait]
impl AccessTokenSource for TokenProvider {
    async fn access_token(&self) -> Result<String, AuthError> {
        let mut cached = self.cached.lock().await;

        if let Some(token) = cached.as_ref().filter(|token| token.is_fresh(self.margin)) {
            return Ok(token.value.clone());
        }

        let token = self.refresh().await?;
        let value = token.value.clone();
        *cached = Some(token);
        Ok(value)
    }

    async fn invalidate(&self) {
        *self.cached.lock().await = None;
    }
}

impl fmt::Debug for TokenProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenProvider")
            .field("token_url", &self.token_url)
            .field("credentials", &self.credentials)
            .field("refreshes", &self.refresh_count())
            .finish()
    }
}
