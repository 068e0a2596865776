//! Connection manager
//!
//! Drives the Closed → Opening → Open → Closing → Closed lifecycle, owns the
//! background tasks of the open connection, and exposes the send-event path.
//!
//! All log output of one manager is recorded inside its `avs_connection` span,
//! which carries a `connection_id` unique to the manager.

use super::downstream::{DownstreamListener, ListenerExit};
use super::keepalive::{interruptible_sleep, KeepAliveMonitor, Reconnect};
use super::state::{log_state_transition, ConnectionState, ReconnectPolicy, ReconnectionDecision};
use super::ConnectionEvents;
use crate::auth::{AccessTokenSource, TokenProvider};
use crate::config::{AvsConfig, ConnectionSection};
use crate::error::{AvsError, AvsResult};
use crate::events::HandlerId;
use crate::multipart::MultipartParser;
use crate::protocol::{
    encode_event, ContextEntry, ContextProvider, Directive, Event, EventEnvelope, EventHeader,
    IdService, Message,
};
use crate::reassembly::PartReassembler;
use crate::sync::lock;
use crate::transport::{EventResponse, HttpTransport, Transport, TransportError};
use bytes::Bytes;
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument, Span};
use uuid::Uuid;

/// Timing of the connection lifecycle
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionSettings {
    pub ping_interval: Duration,
    /// Pause between close and open inside a reconnect
    pub reconnect_pause: Duration,
    pub reconnect: ReconnectPolicy,
}

impl ConnectionSettings {
    pub fn from_config(section: &ConnectionSection) -> Self {
        Self {
            ping_interval: section.ping_interval(),
            reconnect_pause: section.reconnect_pause(),
            reconnect: ReconnectPolicy::from_config(&section.reconnect),
        }
    }
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self::from_config(&ConnectionSection::default())
    }
}

/// Outcome of a successful [`ConnectionManager::send_event`]
#[derive(Debug, Clone, PartialEq)]
pub struct SendReceipt {
    /// Identifier injected into the event header
    pub message_id: String,
    pub status: u16,
    /// Messages the server returned inline with its acknowledgment
    pub directives: Vec<Message>,
}

struct Inner {
    transport: Arc<dyn Transport>,
    tokens: Arc<dyn AccessTokenSource>,
    settings: ConnectionSettings,
    ids: IdService,
    context: Mutex<Option<Arc<dyn ContextProvider>>>,
    reassembler: Arc<PartReassembler>,
    events: Arc<ConnectionEvents>,
    state: watch::Sender<ConnectionState>,
    /// Stop signal of the currently open connection
    stop: Mutex<Option<watch::Sender<bool>>>,
    /// Serializes open and close
    lifecycle: tokio::sync::Mutex<()>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    /// Set by a user `close()`, cleared by a user `open()`
    close_requested: watch::Sender<bool>,
    /// Set while a supervised reconnect task is running
    reconnecting: AtomicBool,
    connection_id: Uuid,
    span: Span,
    self_ref: Weak<Inner>,
}

/// Persistent connection to the voice service
///
/// Cheap to clone; all clones drive the same connection.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    pub fn new(
        transport: Arc<dyn Transport>,
        tokens: Arc<dyn AccessTokenSource>,
        settings: ConnectionSettings,
    ) -> Self {
        let connection_id = Uuid::new_v4();
        let span = crate::connection_span!(connection_id = %connection_id);
        let (state, _) = watch::channel(ConnectionState::Closed);
        let (close_requested, _) = watch::channel(false);

        let inner = Arc::new_cyclic(|self_ref| Inner {
            transport,
            tokens,
            settings,
            ids: IdService::new(),
            context: Mutex::new(None),
            reassembler: Arc::new(PartReassembler::new()),
            events: Arc::new(ConnectionEvents::new()),
            state,
            stop: Mutex::new(None),
            lifecycle: tokio::sync::Mutex::new(()),
            tasks: Mutex::new(Vec::new()),
            close_requested,
            reconnecting: AtomicBool::new(false),
            connection_id,
            span,
            self_ref: self_ref.clone(),
        });

        Self { inner }
    }

    /// Build the HTTP transport and token provider described by the config
    pub fn from_config(config: &AvsConfig) -> AvsResult<Self> {
        let transport = Arc::new(HttpTransport::from_config(config)?);
        let tokens = Arc::new(TokenProvider::from_config(config)?);
        Ok(Self::new(
            transport,
            tokens,
            ConnectionSettings::from_config(&config.connection),
        ))
    }

    /// Supply state snapshots for events sent with `include_state`
    pub fn with_context_provider(self, provider: impl ContextProvider + 'static) -> Self {
        self.set_context_provider(provider);
        self
    }

    pub fn set_context_provider(&self, provider: impl ContextProvider + 'static) {
        *lock(&self.inner.context) = Some(Arc::new(provider));
    }

    pub fn connection_id(&self) -> Uuid {
        self.inner.connection_id
    }

    pub fn events(&self) -> &ConnectionEvents {
        &self.inner.events
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.transport.is_connected()
    }

    /// Parts waiting in the cache for their Content-ID counterpart
    pub fn pending_parts(&self) -> usize {
        self.inner.reassembler.pending_count()
    }

    /// Fresh dialog request id for events that start a dialog turn
    pub fn next_dialog_request_id(&self) -> String {
        self.inner.ids.next_dialog_id()
    }

    pub fn on_opened<F>(&self, handler: F) -> HandlerId
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.events.opened.subscribe(move |_: &()| handler())
    }

    pub fn on_closed<F>(&self, handler: F) -> HandlerId
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.events.closed.subscribe(move |_: &()| handler())
    }

    pub fn on_message<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        self.inner.events.message_received.subscribe(handler)
    }

    /// Receive every recognized directive in typed form
    ///
    /// Unrecognized directives are logged and dropped.
    pub fn subscribe_directives<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&Directive) + Send + Sync + 'static,
    {
        self.inner
            .events
            .message_received
            .subscribe(move |message: &Message| match Directive::from_message(message) {
                Ok(Directive::Unrecognized { namespace, name }) => {
                    warn!(namespace = %namespace, name = %name, "Dropping unrecognized directive");
                }
                Ok(directive) => handler(&directive),
                Err(e) => warn!(
                    error = %e,
                    name = message.name().unwrap_or_default(),
                    "Dropping directive that failed to decode"
                ),
            })
    }

    /// Establish the transport and the push stream
    ///
    /// A no-op when already open.
    pub async fn open(&self) -> AvsResult<()> {
        self.inner.close_requested.send_replace(false);
        self.inner
            .open()
            .instrument(self.inner.span.clone())
            .await
    }

    /// Stop the background loops and tear down the transport
    ///
    /// Idempotent; also abandons a supervised reconnect in progress.
    pub async fn close(&self) {
        self.inner.close_requested.send_replace(true);
        self.inner
            .close()
            .instrument(self.inner.span.clone())
            .await
    }

    /// `close()`, a short pause, then `open()`
    pub async fn reconnect(&self) -> AvsResult<()> {
        let inner = self.inner.clone();
        async move {
            inner.close_requested.send_replace(false);
            inner.close().await;
            tokio::time::sleep(inner.settings.reconnect_pause).await;
            inner.open().await
        }
        .instrument(self.inner.span.clone())
        .await
    }

    /// Post an event and process the server's inline response
    ///
    /// A fresh message id is injected into `header`. With `include_state`
    /// the current context snapshot is attached. Messages contained in the
    /// response are published on `message_received` and also returned.
    pub async fn send_event(
        &self,
        header: EventHeader,
        include_state: bool,
        payload: Option<Value>,
        audio: Option<Bytes>,
    ) -> AvsResult<SendReceipt> {
        let span = self.inner.span.in_scope(|| {
            crate::event_span!(namespace = %header.namespace, name = %header.name)
        });
        self.inner
            .send_event(header, include_state, payload, audio)
            .instrument(span)
            .await
    }
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("connection_id", &self.inner.connection_id)
            .field("state", &self.state())
            .field("pending_parts", &self.pending_parts())
            .finish_non_exhaustive()
    }
}

impl Inner {
    fn set_state(&self, next: ConnectionState) {
        let previous = self.state.send_replace(next);
        log_state_transition(previous, next);
    }

    fn signal_stop(&self) {
        if let Some(stop) = lock(&self.stop).take() {
            stop.send_replace(true);
        }
    }

    async fn open(&self) -> AvsResult<()> {
        let lifecycle = self.lifecycle.lock().await;
        if self.state.borrow().is_open() {
            debug!("Connection already open");
            return Ok(());
        }

        self.set_state(ConnectionState::Opening);
        if let Err(e) = self.establish().await {
            warn!(error = %e.sanitized_message(), "Failed to open connection");
            self.signal_stop();
            self.disconnect_transport().await;
            self.set_state(ConnectionState::Closed);
            return Err(e);
        }
        drop(lifecycle);

        info!("Connection open");
        self.events.opened.fire(&());
        Ok(())
    }

    async fn establish(&self) -> AvsResult<()> {
        self.transport.connect().await?;

        let bearer = self.tokens.access_token().await?;
        let push = match self.transport.open_downstream(&bearer).await {
            Ok(push) => push,
            Err(e) => {
                self.invalidate_on_auth_status(&e).await;
                return Err(e.into());
            }
        };
        let boundary = push.boundary().ok_or(TransportError::MissingBoundary)?;
        debug!(boundary = %boundary, "Push stream established");

        let (stop_tx, stop_rx) = watch::channel(false);
        let listener = DownstreamListener::new(
            boundary.clone(),
            self.reassembler.clone(),
            self.events.clone(),
            stop_rx.clone(),
        );
        let monitor = KeepAliveMonitor::new(
            self.transport.clone(),
            self.tokens.clone(),
            self.settings.ping_interval,
            stop_rx.clone(),
        );
        let reconnector: Arc<dyn Reconnect> = Arc::new(SupervisedReconnect {
            inner: self.self_ref.clone(),
        });

        *lock(&self.stop) = Some(stop_tx);
        self.set_state(ConnectionState::Open);

        let downstream_span = self
            .span
            .in_scope(|| crate::downstream_span!(boundary = %boundary));
        let body = push.body;
        let listener_reconnector = reconnector.clone();
        let listener_task = tokio::spawn(
            async move {
                let exit = listener.run(body).await;
                // Stream gone while the connection is still meant to be open
                if exit != ListenerExit::Stopped && !*stop_rx.borrow() {
                    warn!(exit = ?exit, "Push stream lost, reconnecting");
                    listener_reconnector.reconnect().await;
                }
            }
            .instrument(downstream_span),
        );
        let monitor_task = tokio::spawn(
            async move {
                monitor.run(reconnector).await;
            }
            .instrument(self.span.clone()),
        );
        lock(&self.tasks).extend([listener_task, monitor_task]);

        Ok(())
    }

    async fn close(&self) {
        let lifecycle = self.lifecycle.lock().await;
        if *self.state.borrow() == ConnectionState::Closed {
            debug!("Connection already closed");
            return;
        }

        self.set_state(ConnectionState::Closing);
        self.signal_stop();
        // Both loops exit on the stop signal; the handles are only kept for Drop
        lock(&self.tasks).clear();
        self.disconnect_transport().await;
        self.set_state(ConnectionState::Closed);
        drop(lifecycle);

        info!("Connection closed");
        self.events.closed.fire(&());
    }

    async fn disconnect_transport(&self) {
        match self.transport.disconnect().await {
            Ok(()) | Err(TransportError::NotConnected) => {}
            Err(e) => warn!(error = %e, "Transport disconnect failed"),
        }
    }

    async fn invalidate_on_auth_status(&self, error: &TransportError) {
        if let TransportError::UnexpectedStatus {
            status: 401 | 403, ..
        } = error
        {
            debug!("Server rejected the access token, invalidating");
            self.tokens.invalidate().await;
        }
    }

    fn current_context(&self) -> Vec<ContextEntry> {
        let provider = lock(&self.context).clone();
        provider.map(|provider| provider.context()).unwrap_or_default()
    }

    async fn send_event(
        &self,
        mut header: EventHeader,
        include_state: bool,
        payload: Option<Value>,
        audio: Option<Bytes>,
    ) -> AvsResult<SendReceipt> {
        if !self.transport.is_connected() {
            return Err(AvsError::NotConnected {
                state: *self.state.borrow(),
            });
        }

        let message_id = self.ids.next_message_id();
        header.message_id = Some(message_id.clone());

        let envelope = EventEnvelope {
            event: Event {
                header,
                payload: payload.unwrap_or_else(|| Value::Object(Default::default())),
            },
            context: include_state.then(|| self.current_context()),
        };
        let encoded = encode_event(&envelope, audio.as_deref())?;
        debug!(
            message_id = %message_id,
            bytes = encoded.body.len(),
            with_audio = audio.is_some(),
            "Sending event"
        );

        let bearer = self.tokens.access_token().await?;
        let response = self
            .transport
            .post_event(&bearer, &encoded.content_type, encoded.body)
            .await?;

        if !response.is_success() {
            let error = TransportError::UnexpectedStatus {
                status: response.status,
                body: String::from_utf8_lossy(&response.body).into_owned(),
            };
            self.invalidate_on_auth_status(&error).await;
            return Err(error.into());
        }

        let directives = self.process_response(&response);
        debug!(
            message_id = %message_id,
            status = response.status,
            directives = directives.len(),
            "Event acknowledged"
        );

        Ok(SendReceipt {
            message_id,
            status: response.status,
            directives,
        })
    }

    fn process_response(&self, response: &EventResponse) -> Vec<Message> {
        let Some(boundary) = response.boundary() else {
            if !response.body.is_empty() {
                debug!(
                    status = response.status,
                    bytes = response.body.len(),
                    "Ignoring non-multipart event response body"
                );
            }
            return Vec::new();
        };

        let mut delivered = Vec::new();
        for result in MultipartParser::parse_all(boundary, &response.body) {
            match result {
                Ok(part) => {
                    for message in self.reassembler.accept(part) {
                        self.events.message_received.fire(&message);
                        delivered.push(message);
                    }
                }
                Err(e) => warn!(error = %e, "Skipping malformed part in event response"),
            }
        }
        delivered
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.signal_stop();
        for task in lock(&self.tasks).drain(..) {
            task.abort();
        }
    }
}

/// Recovery after a failed ping or a lost push stream
///
/// Reconnects, then retries `open()` per the policy. At most one runs at a time.
struct SupervisedReconnect {
    inner: Weak<Inner>,
}

#[async_trait::async_trait]
impl Reconnect for SupervisedReconnect {
    async fn reconnect(&self) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        if inner.reconnecting.swap(true, Ordering::SeqCst) {
            debug!("Reconnect already in progress");
            return;
        }
        let span = inner.span.clone();
        let weak = self.inner.clone();
        // Runs detached: close() stops the task that called us
        tokio::spawn(
            async move {
                supervise_reconnect(weak.clone()).await;
                if let Some(inner) = weak.upgrade() {
                    inner.reconnecting.store(false, Ordering::SeqCst);
                }
            }
            .instrument(span),
        );
    }
}

async fn supervise_reconnect(weak: Weak<Inner>) {
    let Some(inner) = weak.upgrade() else {
        return;
    };
    let close_requested = inner.close_requested.subscribe();
    let policy = inner.settings.reconnect.clone();
    let mut delay = inner.settings.reconnect_pause;

    if *close_requested.borrow() {
        return;
    }
    inner.close().await;
    drop(inner);

    let mut retries = 0;
    loop {
        if !interruptible_sleep(close_requested.clone(), delay).await {
            info!("Reconnect abandoned, connection closed by user");
            return;
        }

        let Some(inner) = weak.upgrade() else {
            return;
        };
        match inner.open().await {
            Ok(()) => {
                info!(retries, "Reconnected");
                return;
            }
            Err(e) => error!(error = %e.sanitized_message(), retries, "Reconnect failed"),
        }
        drop(inner);

        let closed_by_user = *close_requested.borrow();
        match policy.decide(retries, closed_by_user) {
            ReconnectionDecision::Proceed { attempt, delay_ms } => {
                let max_display = policy
                    .max_attempts
                    .map_or("unlimited".to_string(), |max| max.to_string());
                info!(attempt, max = %max_display, delay_ms, "Retrying open");
                retries = attempt;
                delay = Duration::from_millis(delay_ms);
            }
            ReconnectionDecision::AbortCloseRequested => {
                info!("Reconnect abandoned, connection closed by user");
                return;
            }
            ReconnectionDecision::AbortMaxAttemptsExceeded => {
                error!(retries, "Giving up on reconnect, max attempts exceeded");
                return;
            }
        }
    }
}
