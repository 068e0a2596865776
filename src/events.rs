//! Typed publish/subscribe registry
//!
//! Each event kind gets its own [`EventBus<T>`]. Firing copies the handler
//! list under the registry lock and invokes the handlers after releasing it,
//! so a handler may subscribe, unsubscribe or fire again without deadlocking.

use crate::sync::lock;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::error;

/// Token returned by [`EventBus::subscribe`], used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Error)]
pub enum EventBusError {
    #[error("Handler not found: {0}")]
    HandlerNotFound(HandlerId),
}

type Handler<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Handler registry for one event kind
pub struct EventBus<T> {
    name: &'static str,
    handlers: Mutex<Vec<(HandlerId, Handler<T>)>>,
    next_id: AtomicU64,
}

impl<T> EventBus<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            handlers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn subscribe<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        lock(&self.handlers).push((id, Arc::new(handler)));
        id
    }

    pub fn unsubscribe(&self, id: HandlerId) -> Result<(), EventBusError> {
        let mut handlers = lock(&self.handlers);
        let index = handlers
            .iter()
            .position(|(existing, _)| *existing == id)
            .ok_or(EventBusError::HandlerNotFound(id))?;
        handlers.remove(index);
        Ok(())
    }

    /// Invoke every handler registered at the time of the call
    ///
    /// A panicking handler is logged and skipped. Returns the number of
    /// handlers invoked.
    pub fn fire(&self, event: &T) -> usize {
        let snapshot: Vec<(HandlerId, Handler<T>)> = lock(&self.handlers).clone();

        for (id, handler) in &snapshot {
            if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                error!(event = self.name, handler = %id, "Event handler panicked");
            }
        }
        snapshot.len()
    }

    pub fn handler_count(&self) -> usize {
        lock(&self.handlers).len()
    }

    pub fn clear(&self) {
        lock(&self.handlers).clear();
    }
}

impl<T> fmt::Debug for EventBus<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("name", &self.name)
            .field("handlers", &self.handler_count())
            .finish()
    }
}
