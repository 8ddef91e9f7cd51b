//! `Shape` – a materialized view over one [`ShapeStream`].
//!
//! Subscribes to the stream exactly once at construction and applies every
//! delivered batch to an insertion-ordered key→row table. Notifications to
//! the shape's own subscribers are coalesced: one network round trip may
//! carry many change entries, but downstream consumers observe a single
//! consistent state transition per up-to-date batch.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use log::{debug, warn};
use tokio::sync::watch;

use crate::error::ShapeLinkError;
use crate::models::{merge_row, Message, MessageBatch, Offset, Operation, Replica, Row};
use crate::stream::{ShapeStream, SubscriptionHandle};

/// Insertion-ordered key→row table.
///
/// Iteration follows first-insertion order and is preserved across
/// updates; entries leave only on delete or a rotation clear. A key
/// re-inserted after deletion is new again and appends at the end.
pub(crate) struct RowTable {
    rows: HashMap<String, Row>,
    order: Vec<String>,
}

impl RowTable {
    pub(crate) fn new() -> Self {
        Self {
            rows: HashMap::new(),
            order: Vec::new(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.rows.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub(crate) fn clear(&mut self) {
        self.rows.clear();
        self.order.clear();
    }

    /// Set `key` to the full `row`. Existing keys keep their position.
    pub(crate) fn upsert(&mut self, key: String, row: Row) {
        if self.rows.insert(key.clone(), row).is_none() {
            self.order.push(key);
        }
    }

    /// Shallow-merge `patch` into the row at `key`. Returns `false` (and
    /// leaves the table untouched) when the key is absent.
    pub(crate) fn merge(&mut self, key: &str, patch: &Row) -> bool {
        match self.rows.get_mut(key) {
            Some(row) => {
                merge_row(row, patch);
                true
            }
            None => false,
        }
    }

    pub(crate) fn delete(&mut self, key: &str) -> bool {
        if self.rows.remove(key).is_some() {
            self.order.retain(|k| k != key);
            true
        } else {
            false
        }
    }

    pub(crate) fn get(&self, key: &str) -> Option<&Row> {
        self.rows.get(key)
    }

    /// Rows in first-insertion order.
    pub(crate) fn rows_in_order(&self) -> Vec<Row> {
        self.order
            .iter()
            .filter_map(|key| self.rows.get(key).cloned())
            .collect()
    }

    /// `(key, row)` entries in first-insertion order.
    pub(crate) fn entries_in_order(&self) -> Vec<(String, Row)> {
        self.order
            .iter()
            .filter_map(|key| self.rows.get(key).map(|row| (key.clone(), row.clone())))
            .collect()
    }
}

/// First-sync progress, driven Pending → Synced or Pending → Failed once.
#[derive(Debug, Clone)]
enum SyncState {
    Pending,
    Synced,
    Failed(ShapeLinkError),
}

/// Callback invoked with the ordered row snapshot after each up-to-date
/// batch.
pub type ShapeCallback = Arc<dyn Fn(&[Row]) + Send + Sync>;

/// Stable identity of a shape subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShapeSubscriptionId(u64);

#[derive(Default)]
struct ShapeSubscribers {
    next_id: u64,
    entries: Vec<(u64, ShapeCallback)>,
}

impl ShapeSubscribers {
    fn insert(&mut self, callback: ShapeCallback) -> ShapeSubscriptionId {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.push((id, callback));
        ShapeSubscriptionId(id)
    }

    fn remove(&mut self, id: ShapeSubscriptionId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(entry_id, _)| *entry_id != id.0);
        self.entries.len() != before
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn clear(&mut self) {
        self.entries.clear();
    }

    fn snapshot(&self) -> Vec<ShapeCallback> {
        self.entries.iter().map(|(_, cb)| cb.clone()).collect()
    }
}

struct ShapeState {
    table: RowTable,
    last_synced_at: Option<SystemTime>,
    last_offset: Offset,
    /// Offset of the batch most recently applied; re-deliveries at the
    /// same offset are skipped.
    last_applied: Option<Offset>,
    error: Option<ShapeLinkError>,
}

struct ShapeInner {
    state: Mutex<ShapeState>,
    subscribers: Mutex<ShapeSubscribers>,
    sync_tx: watch::Sender<SyncState>,
    sync_rx: watch::Receiver<SyncState>,
}

impl ShapeInner {
    fn lock_state(&self) -> std::sync::MutexGuard<'_, ShapeState> {
        self.state.lock().expect("shape state lock poisoned")
    }

    /// Transition the first-sync future, but never out of `Synced`.
    fn settle_sync(&self, next: SyncState) {
        self.sync_tx.send_if_modified(|current| {
            if matches!(current, SyncState::Pending) {
                *current = next;
                true
            } else {
                false
            }
        });
    }
}

/// A consistent, incrementally-maintained in-memory replica of one shape.
///
/// # Example
///
/// ```rust,no_run
/// use shape_link::{Shape, ShapeStream, ShapeStreamOptions};
///
/// # async fn example() -> shape_link::Result<()> {
/// let stream = ShapeStream::new(
///     ShapeStreamOptions::builder()
///         .url("http://localhost:3000/v1/shape")
///         .table("issues")
///         .build()?,
/// )?;
/// let shape = Shape::new(stream);
///
/// // Resolves once the first sync completes.
/// let rows = shape.rows().await?;
/// println!("{} rows", rows.len());
/// # Ok(())
/// # }
/// ```
pub struct Shape {
    stream: ShapeStream,
    inner: Arc<ShapeInner>,
    subscription: Option<SubscriptionHandle>,
}

impl Shape {
    /// Wrap a stream. The shape subscribes to it exactly once, for its
    /// entire lifetime; dropping the shape detaches it again.
    pub fn new(stream: ShapeStream) -> Self {
        let (sync_tx, sync_rx) = watch::channel(SyncState::Pending);
        let inner = Arc::new(ShapeInner {
            state: Mutex::new(ShapeState {
                table: RowTable::new(),
                last_synced_at: None,
                last_offset: stream.last_offset(),
                last_applied: None,
                error: None,
            }),
            subscribers: Mutex::new(ShapeSubscribers::default()),
            sync_tx,
            sync_rx,
        });

        let replica = stream.replica();
        let batch_inner = inner.clone();
        let error_inner = inner.clone();
        let subscription = stream.subscribe_with_error(
            move |batch| apply_batch(&batch_inner, replica, batch),
            move |error| {
                error_inner.lock_state().error = Some(error.clone());
                error_inner.settle_sync(SyncState::Failed(error.clone()));
            },
        );

        Self {
            stream,
            inner,
            subscription: Some(subscription),
        }
    }

    /// The underlying stream.
    pub fn stream(&self) -> &ShapeStream {
        &self.stream
    }

    /// Wait for the first sync to complete.
    async fn wait_synced(&self) -> Result<(), ShapeLinkError> {
        let mut rx = self.inner.sync_rx.clone();
        loop {
            match &*rx.borrow_and_update() {
                SyncState::Synced => return Ok(()),
                SyncState::Failed(error) => return Err(error.clone()),
                SyncState::Pending => {}
            }
            if rx.changed().await.is_err() {
                return Err(ShapeLinkError::Aborted);
            }
        }
    }

    /// Ordered `(key, row)` snapshot; resolves on first sync, immediately
    /// once synced.
    pub async fn value(&self) -> Result<Vec<(String, Row)>, ShapeLinkError> {
        self.wait_synced().await?;
        Ok(self.current_value())
    }

    /// Ordered row snapshot; resolves on first sync, immediately once
    /// synced.
    pub async fn rows(&self) -> Result<Vec<Row>, ShapeLinkError> {
        self.wait_synced().await?;
        Ok(self.current_rows())
    }

    /// Ordered row snapshot of whatever has been applied so far.
    pub fn current_rows(&self) -> Vec<Row> {
        self.inner.lock_state().table.rows_in_order()
    }

    /// Ordered `(key, row)` snapshot of whatever has been applied so far.
    pub fn current_value(&self) -> Vec<(String, Row)> {
        self.inner.lock_state().table.entries_in_order()
    }

    /// Number of rows currently materialized.
    pub fn len(&self) -> usize {
        self.inner.lock_state().table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock_state().table.is_empty()
    }

    /// When the most recent up-to-date batch was fully applied.
    pub fn last_synced_at(&self) -> Option<SystemTime> {
        self.inner.lock_state().last_synced_at
    }

    /// Age of the most recent sync, `None` before the first.
    pub fn last_synced(&self) -> Option<Duration> {
        self.inner
            .lock_state()
            .last_synced_at
            .and_then(|at| at.elapsed().ok())
    }

    /// Offset of the most recent applied batch, mirrored from the stream.
    pub fn last_offset(&self) -> Offset {
        self.inner.lock_state().last_offset.clone()
    }

    /// Shape handle of the underlying stream.
    pub fn handle(&self) -> Option<String> {
        self.stream.shape_handle()
    }

    /// Delegates to [`ShapeStream::is_loading`].
    pub fn is_loading(&self) -> bool {
        self.stream.is_loading()
    }

    /// Delegates to [`ShapeStream::is_connected`].
    pub fn is_connected(&self) -> bool {
        self.stream.is_connected()
    }

    /// Most recent fatal stream error observed by this shape.
    pub fn error(&self) -> Option<ShapeLinkError> {
        self.inner.lock_state().error.clone()
    }

    /// Register a callback notified once per up-to-date batch with the
    /// ordered row snapshot.
    pub fn subscribe<F>(&self, callback: F) -> ShapeSubscriptionId
    where
        F: Fn(&[Row]) + Send + Sync + 'static,
    {
        self.inner
            .subscribers
            .lock()
            .expect("shape subscribers lock poisoned")
            .insert(Arc::new(callback))
    }

    /// Remove one subscriber. Returns `true` if it was present.
    pub fn unsubscribe(&self, id: ShapeSubscriptionId) -> bool {
        self.inner
            .subscribers
            .lock()
            .expect("shape subscribers lock poisoned")
            .remove(id)
    }

    /// Remove every subscriber of this shape.
    pub fn unsubscribe_all(&self) {
        self.inner
            .subscribers
            .lock()
            .expect("shape subscribers lock poisoned")
            .clear();
    }

    /// Number of registered shape subscribers.
    pub fn num_subscribers(&self) -> usize {
        self.inner
            .subscribers
            .lock()
            .expect("shape subscribers lock poisoned")
            .len()
    }
}

impl Drop for Shape {
    fn drop(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
    }
}

/// Apply one delivered batch to the table, in message order, then emit the
/// coalesced notification if the batch reached up-to-date.
fn apply_batch(inner: &Arc<ShapeInner>, replica: Replica, batch: &MessageBatch) {
    let mut state = inner.lock_state();

    // A batch already applied for this offset must not alter the table.
    if !batch.rotated && state.last_applied.as_ref() == Some(&batch.offset) {
        debug!(
            "[SHAPE] batch at offset {} already applied, skipping",
            batch.offset
        );
        if batch.up_to_date {
            state.last_synced_at = Some(SystemTime::now());
        }
        return;
    }

    if batch.rotated {
        debug!("[SHAPE] rotation: clearing {} rows", state.table.len());
        state.table.clear();
    }

    for message in &batch.messages {
        match message {
            Message::Control(_) => {
                // A must-refetch at the head of a batch is followed, in the
                // same batch, by the fresh snapshot's inserts.
                if message.is_must_refetch() {
                    debug!("[SHAPE] must-refetch: clearing {} rows", state.table.len());
                    state.table.clear();
                }
            }
            Message::Change(change) => match change.headers.operation {
                Operation::Insert => {
                    state.table.upsert(change.key.clone(), change.value.clone());
                }
                Operation::Update => match replica {
                    Replica::Full => {
                        state.table.upsert(change.key.clone(), change.value.clone());
                    }
                    Replica::Partial => {
                        if !state.table.merge(&change.key, &change.value) {
                            warn!(
                                "[SHAPE] partial update for unknown key {} ignored",
                                change.key
                            );
                        }
                    }
                },
                Operation::Delete => {
                    state.table.delete(&change.key);
                }
            },
        }
    }

    state.last_offset = batch.offset.clone();
    state.last_applied = Some(batch.offset.clone());

    if batch.up_to_date {
        state.last_synced_at = Some(SystemTime::now());
        let rows = state.table.rows_in_order();
        drop(state);

        inner.settle_sync(SyncState::Synced);
        let callbacks = inner
            .subscribers
            .lock()
            .expect("shape subscribers lock poisoned")
            .snapshot();
        for callback in callbacks {
            callback(&rows);
        }
    }
}
