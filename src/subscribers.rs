//! Subscriber registry for stream batch fan-out.
//!
//! Listeners are kept in an explicit slot table with stable numeric
//! identities, so a subscriber can be removed from inside another
//! subscriber's callback without invalidating the iteration: emission
//! always walks a snapshot taken before the first callback runs.

use std::sync::Arc;

use crate::error::ShapeLinkError;
use crate::models::MessageBatch;

/// Callback invoked with every delivered batch.
pub type BatchCallback = Arc<dyn Fn(&MessageBatch) + Send + Sync>;

/// Callback invoked when the stream halts on a fatal error.
pub type ErrorCallback = Arc<dyn Fn(&ShapeLinkError) + Send + Sync>;

/// Stable identity of a registered subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

struct Subscriber {
    id: u64,
    on_batch: BatchCallback,
    on_error: Option<ErrorCallback>,
}

/// Slot table of batch/error listeners.
#[derive(Default)]
pub struct SubscriberTable {
    next_id: u64,
    entries: Vec<Subscriber>,
}

impl SubscriberTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener; the returned id is never reused.
    pub fn insert(
        &mut self,
        on_batch: BatchCallback,
        on_error: Option<ErrorCallback>,
    ) -> SubscriberId {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.push(Subscriber {
            id,
            on_batch,
            on_error,
        });
        SubscriberId(id)
    }

    /// Remove a listener. Returns `true` if it was present.
    pub fn remove(&mut self, id: SubscriberId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|s| s.id != id.0);
        self.entries.len() != before
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Snapshot of the batch callbacks, for emission outside any lock.
    pub fn batch_callbacks(&self) -> Vec<BatchCallback> {
        self.entries.iter().map(|s| s.on_batch.clone()).collect()
    }

    /// Snapshot of the error callbacks, for emission outside any lock.
    pub fn error_callbacks(&self) -> Vec<ErrorCallback> {
        self.entries
            .iter()
            .filter_map(|s| s.on_error.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Offset;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn empty_batch() -> MessageBatch {
        MessageBatch {
            messages: vec![],
            offset: Offset::new("0_0"),
            handle: "h1".to_string(),
            rotated: false,
            up_to_date: true,
        }
    }

    #[test]
    fn test_insert_assigns_distinct_ids() {
        let mut table = SubscriberTable::new();
        let a = table.insert(Arc::new(|_| {}), None);
        let b = table.insert(Arc::new(|_| {}), None);
        assert_ne!(a, b);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let mut table = SubscriberTable::new();
        let id = table.insert(Arc::new(|_| {}), None);
        assert!(table.remove(id));
        assert!(!table.remove(id));
        assert!(table.is_empty());
    }

    #[test]
    fn test_snapshot_survives_removal_mid_emission() {
        let mut table = SubscriberTable::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let c1 = calls.clone();
        let id1 = table.insert(
            Arc::new(move |_| {
                c1.fetch_add(1, Ordering::SeqCst);
            }),
            None,
        );
        let c2 = calls.clone();
        table.insert(
            Arc::new(move |_| {
                c2.fetch_add(1, Ordering::SeqCst);
            }),
            None,
        );

        // Emission walks a snapshot: removing a subscriber between taking
        // the snapshot and invoking it must not skip or double-call anyone.
        let snapshot = table.batch_callbacks();
        table.remove(id1);
        let batch = empty_batch();
        for cb in snapshot {
            cb(&batch);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_error_callbacks_are_optional() {
        let mut table = SubscriberTable::new();
        table.insert(Arc::new(|_| {}), None);
        table.insert(Arc::new(|_| {}), Some(Arc::new(|_| {})));
        assert_eq!(table.batch_callbacks().len(), 2);
        assert_eq!(table.error_callbacks().len(), 1);
    }
}
