//! Connection lifecycle
//!
//! [`ConnectionManager`] owns the transport, the pending-part cache and the
//! token source, and runs two background tasks per open connection: the
//! [`DownstreamListener`] draining the push stream and the
//! [`KeepAliveMonitor`] pinging the service.
//!
//! # Example
//!
//! ```rust
//! use avs_client::connection::{ConnectionManager, ConnectionSettings};
//! use avs_client::testing::{MockTransport, StaticTokenSource};
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let manager = ConnectionManager::new(
//!     Arc::new(MockTransport::new()),
//!     Arc::new(StaticTokenSource::new("Atza|token")),
//!     ConnectionSettings::default(),
//! );
//! manager.on_message(|message| println!("received {:?}", message.name()));
//!
//! manager.open().await.unwrap();
//! assert!(manager.is_connected());
//! manager.close().await;
//! # });
//! ```

pub mod downstream;
pub mod keepalive;
pub mod manager;
pub mod state;

pub use downstream::{DownstreamListener, ListenerExit};
pub use keepalive::{interruptible_sleep, KeepAliveExit, KeepAliveMonitor, PingOutcome, Reconnect};
pub use manager::{ConnectionManager, ConnectionSettings, SendReceipt};
pub use state::{ConnectionState, ReconnectPolicy, ReconnectionDecision};

use crate::events::EventBus;
use crate::protocol::Message;

/// Lifecycle and message events of one connection manager
#[derive(Debug)]
pub struct ConnectionEvents {
    pub opened: EventBus<()>,
    pub closed: EventBus<()>,
    pub message_received: EventBus<Message>,
}

impl ConnectionEvents {
    pub fn new() -> Self {
        Self {
            opened: EventBus::new("opened"),
            closed: EventBus::new("closed"),
            message_received: EventBus::new("message_received"),
        }
    }
}

impl Default for ConnectionEvents {
    fn default() -> Self {
        Self::new()
    }
}
