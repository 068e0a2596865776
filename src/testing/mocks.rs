//! Mock implementations for testing
//!
//! Provides a scripted Transport, a fixed token source, and a reconnect
//! counter so the connection lifecycle can be exercised without a network.

use crate::auth::{AccessTokenSource, AuthError};
use crate::connection::Reconnect;
use crate::transport::{ByteStream, EventResponse, PushStream, Transport, TransportError};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

/// Boundary announced by [`MockTransport`] unless overridden
pub const MOCK_BOUNDARY: &str = "------abcde123";

type Chunk = Result<Bytes, TransportError>;

/// One request seen by [`MockTransport::post_event`]
#[derive(Debug, Clone)]
pub struct PostedEvent {
    pub bearer: String,
    pub content_type: String,
    pub body: Bytes,
}

impl PostedEvent {
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Mock transport for testing
///
/// Every `open_downstream` creates a fresh push stream fed through
/// [`MockTransport::push_chunk`]. Pings answer 204 and event posts answer an
/// empty 204 unless results were queued.
#[derive(Debug)]
pub struct MockTransport {
    pub downstream_content_type: Arc<Mutex<Option<String>>>,
    pub downstream: Arc<Mutex<Option<mpsc::UnboundedSender<Chunk>>>>,
    pub ping_results: Arc<Mutex<VecDeque<Result<u16, TransportError>>>>,
    pub event_responses: Arc<Mutex<VecDeque<EventResponse>>>,
    pub posted: Arc<Mutex<Vec<PostedEvent>>>,
    pub connected: AtomicBool,
    pub fail_connect: AtomicBool,
    pub connect_calls: AtomicUsize,
    pub disconnect_calls: AtomicUsize,
    pub open_calls: AtomicUsize,
    pub ping_calls: AtomicUsize,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            downstream_content_type: Arc::new(Mutex::new(Some(format!(
                "multipart/related; boundary={MOCK_BOUNDARY}; type=application/json"
            )))),
            downstream: Arc::new(Mutex::new(None)),
            ping_results: Arc::new(Mutex::new(VecDeque::new())),
            event_responses: Arc::new(Mutex::new(VecDeque::new())),
            posted: Arc::new(Mutex::new(Vec::new())),
            connected: AtomicBool::new(false),
            fail_connect: AtomicBool::new(false),
            connect_calls: AtomicUsize::new(0),
            disconnect_calls: AtomicUsize::new(0),
            open_calls: AtomicUsize::new(0),
            ping_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_failure() -> Self {
        let transport = Self::new();
        transport.set_fail_connect(true);
        transport
    }

    pub fn set_fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    pub async fn set_downstream_content_type(&self, content_type: Option<&str>) {
        *self.downstream_content_type.lock().await = content_type.map(str::to_string);
    }

    pub async fn queue_ping(&self, result: Result<u16, TransportError>) {
        self.ping_results.lock().await.push_back(result);
    }

    pub async fn queue_event_response(&self, response: EventResponse) {
        self.event_responses.lock().await.push_back(response);
    }

    /// Deliver bytes on the current push stream; false if none is open
    pub async fn push_chunk(&self, chunk: impl Into<Bytes>) -> bool {
        match self.downstream.lock().await.as_ref() {
            Some(sender) => sender.send(Ok(chunk.into())).is_ok(),
            None => false,
        }
    }

    /// Fail the current push stream with a transport error
    pub async fn break_downstream(&self, reason: &str) -> bool {
        match self.downstream.lock().await.take() {
            Some(sender) => sender.send(Err(TransportError::Stream(reason.to_string()))).is_ok(),
            None => false,
        }
    }

    pub async fn posted_events(&self) -> Vec<PostedEvent> {
        self.posted.lock().await.clone()
    }

    pub fn connect_count(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    pub fn disconnect_count(&self) -> usize {
        self.disconnect_calls.load(Ordering::SeqCst)
    }

    pub fn open_downstream_count(&self) -> usize {
        self.open_calls.load(Ordering::SeqCst)
    }

    pub fn ping_count(&self) -> usize {
        self.ping_calls.load(Ordering::SeqCst)
    }

    fn ensure_connected(&self) -> Result<(), TransportError> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(TransportError::NotConnected)
        }
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(TransportError::Mock("Mock connection failure".to_string()));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        self.downstream.lock().await.take();
        if self.connected.swap(false, Ordering::SeqCst) {
            Ok(())
        } else {
            Err(TransportError::NotConnected)
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn open_downstream(&self, _bearer: &str) -> Result<PushStream, TransportError> {
        self.open_calls.fetch_add(1, Ordering::SeqCst);
        self.ensure_connected()?;

        let (sender, receiver) = mpsc::unbounded_channel();
        *self.downstream.lock().await = Some(sender);

        let body: ByteStream = futures::stream::unfold(receiver, |mut receiver| async move {
            receiver.recv().await.map(|chunk| (chunk, receiver))
        })
        .boxed();

        Ok(PushStream {
            status: 200,
            content_type: self.downstream_content_type.lock().await.clone(),
            body,
        })
    }

    async fn ping(&self, _bearer: &str) -> Result<u16, TransportError> {
        self.ping_calls.fetch_add(1, Ordering::SeqCst);
        self.ensure_connected()?;
        self.ping_results.lock().await.pop_front().unwrap_or(Ok(204))
    }

    async fn post_event(
        &self,
        bearer: &str,
        content_type: &str,
        body: Bytes,
    ) -> Result<EventResponse, TransportError> {
        self.ensure_connected()?;
        self.posted.lock().await.push(PostedEvent {
            bearer: bearer.to_string(),
            content_type: content_type.to_string(),
            body,
        });

        let response = self.event_responses.lock().await.pop_front();
        Ok(response.unwrap_or(EventResponse {
            status: 204,
            content_type: None,
            body: Bytes::new(),
        }))
    }
}

/// Token source returning a fixed token (or always failing)
#[derive(Debug, Default)]
pub struct StaticTokenSource {
    pub token: Option<String>,
    pub calls: AtomicUsize,
    pub invalidations: AtomicUsize,
}

impl StaticTokenSource {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
            ..Default::default()
        }
    }

    pub fn failing() -> Self {
        Self::default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn invalidation_count(&self) -> usize {
        self.invalidations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AccessTokenSource for StaticTokenSource {
    async fn access_token(&self) -> Result<String, AuthError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.token.clone().ok_or_else(|| AuthError::Rejected {
            status: 400,
            body: "invalid_grant".to_string(),
        })
    }

    async fn invalidate(&self) {
        self.invalidations.fetch_add(1, Ordering::SeqCst);
    }
}

/// Reconnect action that only counts invocations
#[derive(Debug, Default)]
pub struct CountingReconnector {
    pub calls: AtomicUsize,
}

impl CountingReconnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Reconnect for CountingReconnector {
    async fn reconnect(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_push_stream_delivers_chunks() {
        let transport = MockTransport::new();
        transport.connect().await.unwrap();

        let mut push = transport.open_downstream("token").await.unwrap();
        assert_eq!(push.boundary().as_deref(), Some(MOCK_BOUNDARY));

        assert!(transport.push_chunk(&b"hello"[..]).await);
        let chunk = push.body.next().await.unwrap().unwrap();
        assert_eq!(chunk.as_ref(), b"hello");

        transport.disconnect().await.unwrap();
        assert!(push.body.next().await.is_none());
        assert!(!transport.push_chunk(&b"late"[..]).await);
    }

    #[tokio::test]
    async fn test_mock_requires_connection() {
        let transport = MockTransport::new();
        assert!(matches!(
            transport.ping("token").await,
            Err(TransportError::NotConnected)
        ));
        assert!(matches!(
            transport.disconnect().await,
            Err(TransportError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_static_token_source() {
        let tokens = StaticTokenSource::new("abc");
        assert_eq!(tokens.access_token().await.unwrap(), "abc");
        tokens.invalidate().await;
        assert_eq!(tokens.call_count(), 1);
        assert_eq!(tokens.invalidation_count(), 1);

        assert!(StaticTokenSource::failing().access_token().await.is_err());
    }
}
