//! Message and dialog request id generation

use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Generates unique ids for outbound events
///
/// Ids combine the Unix time the service was created with a per-kind
/// counter starting at 1, e.g. `avs-message-id-1700000000-1`.
#[derive(Debug)]
pub struct IdService {
    start: i64,
    message_count: AtomicU64,
    dialog_count: AtomicU64,
}

impl IdService {
    pub fn new() -> Self {
        Self::with_start(Utc::now().timestamp())
    }

    pub fn with_start(start: i64) -> Self {
        Self {
            start,
            message_count: AtomicU64::new(1),
            dialog_count: AtomicU64::new(1),
        }
    }

    pub fn next_message_id(&self) -> String {
        let n = self.message_count.fetch_add(1, Ordering::Relaxed);
        format!("avs-message-id-{}-{}", self.start, n)
    }

    pub fn next_dialog_id(&self) -> String {
        let n = self.dialog_count.fetch_add(1, Ordering::Relaxed);
        format!("avs-dialog-id-{}-{}", self.start, n)
    }
}

impl Default for IdService {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_id_format_and_sequence() {
        let ids = IdService::with_start(1700000000);

        assert_eq!(ids.next_message_id(), "avs-message-id-1700000000-1");
        assert_eq!(ids.next_message_id(), "avs-message-id-1700000000-2");
        assert_eq!(ids.next_dialog_id(), "avs-dialog-id-1700000000-1");
    }

    #[test]
    fn test_ids_unique_across_threads() {
        let ids = Arc::new(IdService::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let ids = Arc::clone(&ids);
                std::thread::spawn(move || (0..100).map(|_| ids.next_message_id()).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(seen.insert(id));
            }
        }
        assert_eq!(seen.len(), 400);
    }
}
