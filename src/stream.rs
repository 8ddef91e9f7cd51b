//! `ShapeStream` – the streaming protocol client.
//!
//! Owns the fetch loop driving the long-polling protocol: offset/handle
//! bookkeeping, header validation, rotation detection, live-mode
//! promotion, pause/resume, forced refresh and the error-recovery policy.
//! Parsed message batches are fanned out synchronously to every registered
//! subscriber; a [`Shape`](crate::Shape) is one such subscriber.

pub(crate) mod fetch_loop;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use log::{debug, warn};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

use crate::dynamic::DynamicValue;
use crate::error::{Result, ShapeLinkError};
use crate::models::{ConnectionStatus, MessageBatch, Offset, Replica, ShapeStreamOptions};
use crate::subscribers::{BatchCallback, ErrorCallback, SubscriberId, SubscriberTable};
use crate::transport::Transport;

/// Response header carrying the offset the client advanced to.
pub const HEADER_OFFSET: &str = "shape-offset";
/// Response header carrying the server-assigned shape handle.
pub const HEADER_HANDLE: &str = "shape-handle";
/// Response header carrying the live cursor; required on long-poll
/// responses.
pub const HEADER_CURSOR: &str = "shape-cursor";

/// Commands delivered to the fetch loop between (or during) cycles.
pub(crate) enum ControlCommand {
    /// Abort any in-flight request, issue one non-live request, ack once
    /// its batch has been fully delivered.
    Refresh(oneshot::Sender<()>),
    /// Wake a dormant loop (a subscriber arrived).
    Wake,
}

/// Lifecycle phase of the fetch loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StreamPhase {
    /// Running or dormant-but-resumable.
    Active,
    /// Halted on a fatal error.
    Errored,
    /// Halted by the abort signal. Terminal.
    Aborted,
}

/// Mutable protocol state, confined to one stream and guarded by one lock.
pub(crate) struct StreamState {
    pub offset: Offset,
    pub handle: Option<String>,
    pub cursor: Option<String>,
    /// The shape has reached up-to-date this lifecycle: subsequent
    /// requests long-poll.
    pub live: bool,
    pub connected: bool,
    pub loading: bool,
    pub error: Option<ShapeLinkError>,
    pub last_synced_at: Option<SystemTime>,
    pub phase: StreamPhase,
    /// Effective params/headers: options plus any error-handler overrides.
    pub params: HashMap<String, DynamicValue>,
    pub headers: HashMap<String, DynamicValue>,
}

pub(crate) struct StreamShared {
    pub options: ShapeStreamOptions,
    pub transport: Transport,
    pub token: CancellationToken,
    pub state: Mutex<StreamState>,
    pub subscribers: Mutex<SubscriberTable>,
    pub control_tx: mpsc::UnboundedSender<ControlCommand>,
    pub pause_tx: watch::Sender<bool>,
    started: AtomicBool,
    /// Handed to the fetch loop on first start.
    loop_inputs: Mutex<Option<LoopInputs>>,
}

pub(crate) struct LoopInputs {
    pub control_rx: mpsc::UnboundedReceiver<ControlCommand>,
    pub pause_rx: watch::Receiver<bool>,
}

impl StreamShared {
    /// Deliver a batch synchronously to every subscriber registered at the
    /// start of delivery. Runs on the fetch-loop task, outside all locks.
    pub(crate) fn deliver_batch(&self, batch: &MessageBatch) {
        let callbacks = self
            .subscribers
            .lock()
            .expect("subscriber table lock poisoned")
            .batch_callbacks();
        for callback in callbacks {
            callback(batch);
        }
    }

    /// Notify every subscriber's error channel.
    pub(crate) fn deliver_error(&self, error: &ShapeLinkError) {
        let callbacks = self
            .subscribers
            .lock()
            .expect("subscriber table lock poisoned")
            .error_callbacks();
        for callback in callbacks {
            callback(error);
        }
    }

    pub(crate) fn lock_state(&self) -> std::sync::MutexGuard<'_, StreamState> {
        self.state.lock().expect("stream state lock poisoned")
    }

    /// Record a fatal error: the loop is about to halt.
    pub(crate) fn mark_errored(&self, error: ShapeLinkError) {
        {
            let mut state = self.lock_state();
            state.connected = false;
            state.phase = StreamPhase::Errored;
            state.error = Some(error.clone());
        }
        warn!("[STREAM] fatal error, halting: {}", error);
        self.deliver_error(&error);
    }

    /// Record cancellation. Not an error; subscribers are not notified.
    pub(crate) fn mark_aborted(&self) {
        let mut state = self.lock_state();
        state.connected = false;
        state.phase = StreamPhase::Aborted;
        debug!("[STREAM] aborted by signal");
    }
}

/// Handle to one registered subscription; see [`ShapeStream::subscribe`].
pub struct SubscriptionHandle {
    shared: Arc<StreamShared>,
    id: SubscriberId,
}

impl SubscriptionHandle {
    /// Remove this listener. If it was the last one and auto-subscribe is
    /// disabled, the fetch loop halts (offset/handle state is kept, so a
    /// later subscribe resumes from the same position).
    pub fn unsubscribe(self) {
        let mut table = self
            .shared
            .subscribers
            .lock()
            .expect("subscriber table lock poisoned");
        table.remove(self.id);
        if table.is_empty() && !self.shared.options.subscribe {
            debug!("[STREAM] last subscriber left, loop will go dormant");
        }
    }
}

/// The streaming protocol client for one shape.
///
/// Cheap to clone; all clones share one protocol state machine. Construct
/// with [`ShapeStream::new`], register listeners with
/// [`subscribe`](Self::subscribe), or wrap in a [`Shape`](crate::Shape)
/// for a materialized replica.
///
/// # Example
///
/// ```rust,no_run
/// use shape_link::{ShapeStream, ShapeStreamOptions};
///
/// # async fn example() -> shape_link::Result<()> {
/// let stream = ShapeStream::new(
///     ShapeStreamOptions::builder()
///         .url("http://localhost:3000/v1/shape")
///         .table("issues")
///         .build()?,
/// )?;
///
/// let sub = stream.subscribe(|batch| {
///     println!("{} messages", batch.messages.len());
/// });
/// # sub.unsubscribe();
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ShapeStream {
    shared: Arc<StreamShared>,
}

impl ShapeStream {
    /// Create a stream from validated options.
    ///
    /// The fetch loop starts lazily with the first subscriber.
    pub fn new(options: ShapeStreamOptions) -> Result<Self> {
        let transport = match &options.transport {
            Some(transport) => transport.clone(),
            None => crate::transport::default_transport()?,
        };
        let token = options.signal.clone().unwrap_or_default();

        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (pause_tx, pause_rx) = watch::channel(false);

        let state = StreamState {
            offset: options.offset.clone().unwrap_or_default(),
            handle: options.handle.clone(),
            cursor: None,
            live: false,
            connected: false,
            loading: true,
            error: None,
            last_synced_at: None,
            phase: StreamPhase::Active,
            params: options.params.clone(),
            headers: options.headers.clone(),
        };

        Ok(Self {
            shared: Arc::new(StreamShared {
                options,
                transport,
                token,
                state: Mutex::new(state),
                subscribers: Mutex::new(SubscriberTable::new()),
                control_tx,
                pause_tx,
                started: AtomicBool::new(false),
                loop_inputs: Mutex::new(Some(LoopInputs {
                    control_rx,
                    pause_rx,
                })),
            }),
        })
    }

    fn ensure_started(&self) {
        if self.shared.token.is_cancelled() {
            return;
        }
        if self.shared.started.swap(true, Ordering::SeqCst) {
            let _ = self.shared.control_tx.send(ControlCommand::Wake);
            return;
        }
        let inputs = self
            .shared
            .loop_inputs
            .lock()
            .expect("loop inputs lock poisoned")
            .take()
            .expect("fetch loop inputs already taken");
        tokio::spawn(fetch_loop::run(self.shared.clone(), inputs));
    }

    /// Register a batch listener. Starts the fetch loop on the first
    /// subscriber.
    pub fn subscribe<F>(&self, on_batch: F) -> SubscriptionHandle
    where
        F: Fn(&MessageBatch) + Send + Sync + 'static,
    {
        self.register(Arc::new(on_batch), None)
    }

    /// Register a batch listener together with an error channel, notified
    /// when the stream halts on a fatal error.
    pub fn subscribe_with_error<F, E>(&self, on_batch: F, on_error: E) -> SubscriptionHandle
    where
        F: Fn(&MessageBatch) + Send + Sync + 'static,
        E: Fn(&ShapeLinkError) + Send + Sync + 'static,
    {
        self.register(Arc::new(on_batch), Some(Arc::new(on_error)))
    }

    fn register(
        &self,
        on_batch: BatchCallback,
        on_error: Option<ErrorCallback>,
    ) -> SubscriptionHandle {
        // A stream that already halted on a fatal error surfaces it to the
        // late subscriber instead of silently never calling back.
        let stored_error = {
            let state = self.shared.lock_state();
            if state.phase == StreamPhase::Errored {
                state.error.clone()
            } else {
                None
            }
        };
        if let (Some(error), Some(on_error)) = (&stored_error, &on_error) {
            on_error(error);
        }

        let id = self
            .shared
            .subscribers
            .lock()
            .expect("subscriber table lock poisoned")
            .insert(on_batch, on_error);
        self.ensure_started();
        SubscriptionHandle {
            shared: self.shared.clone(),
            id,
        }
    }

    /// Remove every registered listener.
    pub fn unsubscribe_all(&self) {
        self.shared
            .subscribers
            .lock()
            .expect("subscriber table lock poisoned")
            .clear();
    }

    /// Number of registered batch listeners.
    pub fn num_subscribers(&self) -> usize {
        self.shared
            .subscribers
            .lock()
            .expect("subscriber table lock poisoned")
            .len()
    }

    /// Suspend polling: aborts any in-flight long poll (not treated as a
    /// failure) and stops issuing requests until [`resume`](Self::resume).
    /// Offset/handle state is untouched.
    pub fn pause(&self) {
        if self.shared.token.is_cancelled() {
            return;
        }
        debug!("[STREAM] pause requested");
        let _ = self.shared.pause_tx.send(true);
    }

    /// Resume polling from the last known position.
    pub fn resume(&self) {
        if self.shared.token.is_cancelled() {
            return;
        }
        debug!("[STREAM] resume requested");
        let _ = self.shared.pause_tx.send(false);
    }

    /// Returns `true` while the stream is paused.
    pub fn is_paused(&self) -> bool {
        *self.shared.pause_tx.borrow()
    }

    /// Cancel any in-flight request, issue one immediate non-live request
    /// at the current offset/handle, and resolve once that forced
    /// response has been fully delivered to subscribers. Normal long
    /// polling resumes afterwards.
    pub async fn force_disconnect_and_refresh(&self) -> Result<()> {
        if self.shared.token.is_cancelled() {
            return Err(ShapeLinkError::Aborted);
        }
        {
            let state = self.shared.lock_state();
            if state.phase == StreamPhase::Errored {
                return Err(state.error.clone().unwrap_or(ShapeLinkError::InternalError(
                    "stream halted without stored error".to_string(),
                )));
            }
        }

        let (ack_tx, ack_rx) = oneshot::channel();
        self.shared
            .control_tx
            .send(ControlCommand::Refresh(ack_tx))
            .map_err(|_| ShapeLinkError::Aborted)?;
        self.ensure_started();

        match ack_rx.await {
            Ok(()) => Ok(()),
            // The loop dropped the ack: it halted before completing the
            // forced request.
            Err(_) => {
                if self.shared.token.is_cancelled() {
                    Err(ShapeLinkError::Aborted)
                } else {
                    Err(self
                        .shared
                        .lock_state()
                        .error
                        .clone()
                        .unwrap_or(ShapeLinkError::Aborted))
                }
            }
        }
    }

    /// `true` iff at least one response has completed without fatal error
    /// since the last rotation/start and the stream is not paused,
    /// errored, or aborted.
    pub fn is_connected(&self) -> bool {
        self.shared.lock_state().connected
    }

    /// `true` until the first response of the current lifecycle (initial
    /// or post-rotation) completes.
    pub fn is_loading(&self) -> bool {
        self.shared.lock_state().loading
    }

    /// Last acknowledged offset.
    pub fn last_offset(&self) -> Offset {
        self.shared.lock_state().offset.clone()
    }

    /// Server-assigned shape handle, once known.
    pub fn shape_handle(&self) -> Option<String> {
        self.shared.lock_state().handle.clone()
    }

    /// Returns `true` once the server has assigned this stream a handle.
    pub fn has_shape_handle(&self) -> bool {
        self.shared.lock_state().handle.is_some()
    }

    /// When the stream last observed an up-to-date response.
    pub fn last_synced_at(&self) -> Option<SystemTime> {
        self.shared.lock_state().last_synced_at
    }

    /// Age of the last up-to-date response, `None` before the first sync.
    pub fn last_synced(&self) -> Option<Duration> {
        self.shared
            .lock_state()
            .last_synced_at
            .and_then(|at| at.elapsed().ok())
    }

    /// Most recent fatal error, if the stream halted on one.
    pub fn error(&self) -> Option<ShapeLinkError> {
        self.shared.lock_state().error.clone()
    }

    /// Full connection-state snapshot.
    pub fn status(&self) -> ConnectionStatus {
        let state = self.shared.lock_state();
        ConnectionStatus {
            is_loading: state.loading,
            is_connected: state.connected,
            error: state.error.clone(),
            last_synced_at: state.last_synced_at,
            last_offset: state.offset.clone(),
            shape_handle: state.handle.clone(),
        }
    }

    /// Replica mode this stream was configured with.
    pub fn replica(&self) -> Replica {
        self.shared.options.replica
    }

    /// The stream's immutable configuration.
    pub fn options(&self) -> &ShapeStreamOptions {
        &self.shared.options
    }

    /// Canonical hash of the configuration; identical for semantically
    /// identical shape definitions.
    pub fn canonical_hash(&self) -> String {
        self.shared.options.canonical_hash()
    }

    pub(crate) fn shared(&self) -> &Arc<StreamShared> {
        &self.shared
    }
}
