//! Transport layer for AVS communication
//!
//! The connection manager only needs four things from the network: open the
//! long-lived push stream, ping, post an event, and tear everything down.
//! [`Transport`] captures exactly that so the manager can be driven by the
//! reqwest-based [`HttpTransport`] in production and by
//! [`crate::testing::MockTransport`] in tests.

use crate::multipart::boundary_from_content_type;
use bytes::Bytes;
use futures::stream::BoxStream;
use std::fmt;
use thiserror::Error;

pub mod http;

pub use http::HttpTransport;

/// Incrementally arriving body bytes
pub type ByteStream = BoxStream<'static, Result<Bytes, TransportError>>;

/// Transport errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Transport is not connected")]
    NotConnected,

    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Unexpected status {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    #[error("Push stream response carries no multipart boundary")]
    MissingBoundary,

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Mock transport failure: {0}")]
    Mock(String),
}

/// Response to the initial push-stream request
pub struct PushStream {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: ByteStream,
}

impl PushStream {
    /// Boundary the server will use for everything on this stream
    pub fn boundary(&self) -> Option<String> {
        self.content_type
            .as_deref()
            .and_then(boundary_from_content_type)
    }
}

impl fmt::Debug for PushStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PushStream")
            .field("status", &self.status)
            .field("content_type", &self.content_type)
            .finish_non_exhaustive()
    }
}

/// Fully read response to an event post
#[derive(Debug, Clone)]
pub struct EventResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Bytes,
}

impl EventResponse {
    /// Boundary of a multipart response, `None` for empty or non-multipart bodies
    pub fn boundary(&self) -> Option<String> {
        self.content_type
            .as_deref()
            .and_then(boundary_from_content_type)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Transport trait for AVS communication
///
/// Implementations serialize access to the underlying connection themselves;
/// every method takes `&self` so the manager, its keep-alive task and
/// concurrent senders can share one instance.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Establish the underlying connection
    async fn connect(&self) -> Result<(), TransportError>;

    /// Tear down the connection; `NotConnected` if there was none
    async fn disconnect(&self) -> Result<(), TransportError>;

    /// Check if transport is currently connected
    fn is_connected(&self) -> bool;

    /// Issue the long-lived GET for the directives push stream
    async fn open_downstream(&self, bearer: &str) -> Result<PushStream, TransportError>;

    /// Issue a keep-alive ping and return its status code
    async fn ping(&self, bearer: &str) -> Result<u16, TransportError>;

    /// Post an event body and read the whole response
    async fn post_event(
        &self,
        bearer: &str,
        content_type: &str,
        body: Bytes,
    ) -> Result<EventResponse, TransportError>;
}
