//! Keep-alive supervision
//!
//! Pings the service once per interval while the connection is open. A failed
//! ping hands recovery to a [`Reconnect`] implementation exactly once and ends
//! this monitor; the next successful open starts a fresh one.

use crate::auth::AccessTokenSource;
use crate::transport::Transport;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Status the ping endpoint answers with
pub const PING_OK_STATUS: u16 = 204;

/// Recovery action invoked when the connection is found dead
#[async_trait::async_trait]
pub trait Reconnect: Send + Sync {
    async fn reconnect(&self);
}

/// Result of a single ping
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PingOutcome {
    Alive,
    /// Transport fault or unexpected status
    Failed(String),
    /// No bearer token could be obtained; the connection itself is not at fault
    AuthUnavailable(String),
}

/// Why a monitor stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepAliveExit {
    Stopped,
    Reconnecting,
}

pub struct KeepAliveMonitor {
    transport: Arc<dyn Transport>,
    tokens: Arc<dyn AccessTokenSource>,
    interval: Duration,
    stop: watch::Receiver<bool>,
}

impl KeepAliveMonitor {
    pub fn new(
        transport: Arc<dyn Transport>,
        tokens: Arc<dyn AccessTokenSource>,
        interval: Duration,
        stop: watch::Receiver<bool>,
    ) -> Self {
        Self {
            transport,
            tokens,
            interval,
            stop,
        }
    }

    pub async fn ping_once(&self) -> PingOutcome {
        let bearer = match self.tokens.access_token().await {
            Ok(bearer) => bearer,
            Err(e) => return PingOutcome::AuthUnavailable(e.to_string()),
        };

        match self.transport.ping(&bearer).await {
            Ok(PING_OK_STATUS) => PingOutcome::Alive,
            Ok(status) => PingOutcome::Failed(format!("unexpected ping status {status}")),
            Err(e) => PingOutcome::Failed(e.to_string()),
        }
    }

    /// Run until the stop signal is set or a ping fails
    pub async fn run(self, reconnector: Arc<dyn Reconnect>) -> KeepAliveExit {
        debug!(interval_secs = self.interval.as_secs(), "Keep-alive monitor started");

        while !self.stop_requested() {
            match self.ping_once().await {
                PingOutcome::Alive => debug!("Ping acknowledged"),
                PingOutcome::AuthUnavailable(reason) => {
                    warn!(reason = %reason, "Skipping keep-alive ping, no access token");
                }
                PingOutcome::Failed(reason) => {
                    if self.stop_requested() {
                        break;
                    }
                    warn!(reason = %reason, "Keep-alive ping failed, reconnecting");
                    reconnector.reconnect().await;
                    return KeepAliveExit::Reconnecting;
                }
            }

            if !interruptible_sleep(self.stop.clone(), self.interval).await {
                break;
            }
        }

        info!("Keep-alive monitor stopped");
        KeepAliveExit::Stopped
    }

    fn stop_requested(&self) -> bool {
        *self.stop.borrow()
    }
}

/// Sleep that ends early when the stop signal is set
///
/// Returns true if the full delay elapsed, false if stop was requested (or
/// the signal's sender is gone).
pub async fn interruptible_sleep(mut stop: watch::Receiver<bool>, delay: Duration) -> bool {
    if *stop.borrow() {
        return false;
    }

    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);

    loop {
        tokio::select! {
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    return false;
                }
            }
            _ = &mut sleep => return true,
        }
    }
}
