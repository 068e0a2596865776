//! Connection lifecycle state and reconnection policy
//!
//! Pure functions only; the manager drives the transitions.

use crate::config::ReconnectSection;
use std::fmt;
use tracing::info;

/// Lifecycle state of one connection manager
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Initial and terminal state
    Closed,
    /// Transport being established and push stream requested
    Opening,
    /// Push stream live, background loops running
    Open,
    /// Stop signal set, transport being torn down
    Closing,
}

impl ConnectionState {
    pub fn is_open(&self) -> bool {
        matches!(self, ConnectionState::Open)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Closed => "closed",
            ConnectionState::Opening => "opening",
            ConnectionState::Open => "open",
            ConnectionState::Closing => "closing",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Log a lifecycle transition at info level
pub fn log_state_transition(from: ConnectionState, to: ConnectionState) {
    if from != to {
        info!(from = %from, to = %to, "Connection state changed");
    }
}

/// Retry schedule for supervised reconnects
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    /// Maximum number of open attempts after the first failure (None = unlimited)
    pub max_attempts: Option<u32>,
    /// Delays in milliseconds, one per attempt
    pub backoff_pattern: Vec<u64>,
    /// Delay once the pattern is exhausted
    pub sustained_delay: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from_config(&ReconnectSection::default())
    }
}

impl ReconnectPolicy {
    pub fn from_config(section: &ReconnectSection) -> Self {
        Self {
            max_attempts: (section.max_attempts > 0).then_some(section.max_attempts),
            backoff_pattern: section.backoff_pattern_ms.clone(),
            sustained_delay: section.sustained_delay_ms,
        }
    }

    /// Delay before the given attempt (1-based)
    pub fn backoff_delay(&self, attempt: u32) -> u64 {
        let index = attempt.saturating_sub(1) as usize;
        self.backoff_pattern
            .get(index)
            .copied()
            .unwrap_or(self.sustained_delay)
    }

    /// Decide whether another open attempt should be made
    pub fn decide(&self, attempts_so_far: u32, close_requested: bool) -> ReconnectionDecision {
        if close_requested {
            return ReconnectionDecision::AbortCloseRequested;
        }

        if let Some(max_attempts) = self.max_attempts {
            if attempts_so_far >= max_attempts {
                return ReconnectionDecision::AbortMaxAttemptsExceeded;
            }
        }

        let attempt = attempts_so_far + 1;
        ReconnectionDecision::Proceed {
            attempt,
            delay_ms: self.backoff_delay(attempt),
        }
    }
}

/// Outcome of [`ReconnectPolicy::decide`]
#[derive(Debug, PartialEq, Eq)]
pub enum ReconnectionDecision {
    Proceed { attempt: u32, delay_ms: u64 },
    /// The user closed the connection while recovery was pending
    AbortCloseRequested,
    AbortMaxAttemptsExceeded,
}
