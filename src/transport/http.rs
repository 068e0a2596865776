//! reqwest-backed transport
//!
//! One `reqwest::Client` per connection. With the `http2` feature the client
//! negotiates HTTP/2 over TLS, so the push stream, pings and event posts are
//! multiplexed over a single connection to the AVS endpoint.

use super::{EventResponse, PushStream, Transport, TransportError};
use crate::config::{AvsConfig, ConfigError};
use crate::error::AvsResult;
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Response};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};
use url::Url;

pub struct HttpTransport {
    base_url: String,
    api_version: String,
    connect_timeout: Duration,
    client: Mutex<Option<Client>>,
    connected: AtomicBool,
}

impl HttpTransport {
    pub fn new(endpoint: Url, api_version: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            base_url: endpoint.as_str().trim_end_matches('/').to_string(),
            api_version: api_version.into(),
            connect_timeout,
            client: Mutex::new(None),
            connected: AtomicBool::new(false),
        }
    }

    pub fn from_config(config: &AvsConfig) -> AvsResult<Self> {
        let endpoint = Url::parse(&config.avs.endpoint).map_err(|e| {
            ConfigError::InvalidConfig(format!("avs.endpoint '{}': {e}", config.avs.endpoint))
        })?;
        Ok(Self::new(
            endpoint,
            config.avs.api_version.clone(),
            config.connection.request_timeout(),
        ))
    }

    pub fn directives_url(&self) -> String {
        format!("{}/{}/directives", self.base_url, self.api_version)
    }

    pub fn events_url(&self) -> String {
        format!("{}/{}/events", self.base_url, self.api_version)
    }

    pub fn ping_url(&self) -> String {
        format!("{}/ping", self.base_url)
    }

    async fn client(&self) -> Result<Client, TransportError> {
        self.client
            .lock()
            .await
            .as_ref()
            .cloned()
            .ok_or(TransportError::NotConnected)
    }

    fn content_type_of(response: &Response) -> Option<String> {
        response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    }
}

#[async_trait::async_trait]
impl Transport for HttpTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        let mut client = self.client.lock().await;
        if client.is_some() {
            return Ok(());
        }

        // No overall request timeout: the push stream stays open indefinitely
        let built = Client::builder()
            .connect_timeout(self.connect_timeout)
            .build()?;
        *client = Some(built);
        self.connected.store(true, Ordering::SeqCst);

        info!(endpoint = %self.base_url, "HTTP transport connected");
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        let mut client = self.client.lock().await;
        self.connected.store(false, Ordering::SeqCst);

        match client.take() {
            Some(_) => {
                info!(endpoint = %self.base_url, "HTTP transport disconnected");
                Ok(())
            }
            None => Err(TransportError::NotConnected),
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn open_downstream(&self, bearer: &str) -> Result<PushStream, TransportError> {
        let client = self.client().await?;
        let response = client
            .get(self.directives_url())
            .header(AUTHORIZATION, format!("Bearer {bearer}"))
            .send()
            .await?;

        let status = response.status().as_u16();
        if status != 200 {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::UnexpectedStatus { status, body });
        }

        let content_type = Self::content_type_of(&response);
        debug!(content_type = ?content_type, "Push stream established");

        Ok(PushStream {
            status,
            content_type,
            body: response
                .bytes_stream()
                .map_err(TransportError::Request)
                .boxed(),
        })
    }

    async fn ping(&self, bearer: &str) -> Result<u16, TransportError> {
        let client = self.client().await?;
        let response = client
            .get(self.ping_url())
            .header(AUTHORIZATION, format!("Bearer {bearer}"))
            .send()
            .await?;
        Ok(response.status().as_u16())
    }

    async fn post_event(
        &self,
        bearer: &str,
        content_type: &str,
        body: Bytes,
    ) -> Result<EventResponse, TransportError> {
        let client = self.client().await?;
        let response = client
            .post(self.events_url())
            .header(AUTHORIZATION, format!("Bearer {bearer}"))
            .header(CONTENT_TYPE, content_type)
            .body(body)
            .send()
            .await?;

        let status = response.status().as_u16();
        let content_type = Self::content_type_of(&response);
        let body = response.bytes().await?;

        Ok(EventResponse {
            status,
            content_type,
            body,
        })
    }
}
