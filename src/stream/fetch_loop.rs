//! Background fetch loop driving the long-polling protocol.
//!
//! One loop task per stream, at most one request in flight at any instant.
//! Pause, forced refresh and cancellation all abort the in-flight request
//! (by dropping its future) before another is issued. Batches are
//! delivered to subscribers synchronously, before the next request starts,
//! so re-entrant control calls made from inside a callback are picked up
//! at the next cycle boundary.

use std::sync::Arc;
use std::time::SystemTime;

use log::{debug, warn};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, ShapeLinkError};
use crate::models::{Message, MessageBatch, Offset};
use crate::request::{build_request, RequestPosition};
use crate::transport::TransportResponse;

use super::{
    ControlCommand, LoopInputs, StreamShared, HEADER_CURSOR, HEADER_HANDLE, HEADER_OFFSET,
};

enum Recovery {
    /// Handler supplied overrides; retry the request immediately.
    Retry,
    /// The loop halts; state carries the stored error.
    Fatal,
    /// Abort signal fired while recovering.
    Aborted,
}

pub(crate) async fn run(shared: Arc<StreamShared>, inputs: LoopInputs) {
    let LoopInputs {
        mut control_rx,
        mut pause_rx,
    } = inputs;
    let token = shared.token.clone();

    // Pending force-refresh acks, resolved once the forced response has
    // been fully delivered. Several concurrent refresh calls coalesce into
    // one forced request.
    let mut refresh_acks: Vec<oneshot::Sender<()>> = Vec::new();
    let mut force_non_live = false;
    // Catch-up-only streams (auto-subscribe disabled) park here after
    // reaching up-to-date or losing their last subscriber.
    let mut idle = false;

    debug!("[FETCH] loop started for {}", shared.options.url);

    'cycle: loop {
        if token.is_cancelled() {
            shared.mark_aborted();
            return;
        }

        // Pick up commands that arrived between cycles, e.g. a refresh
        // requested from inside a subscriber callback during delivery.
        while let Ok(command) = control_rx.try_recv() {
            match command {
                ControlCommand::Refresh(ack) => {
                    refresh_acks.push(ack);
                    force_non_live = true;
                    idle = false;
                }
                ControlCommand::Wake => idle = false,
            }
        }

        // Gate: suspended or dormant streams issue no requests.
        loop {
            if *pause_rx.borrow_and_update() {
                shared.lock_state().connected = false;
                tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        shared.mark_aborted();
                        return;
                    }
                    changed = pause_rx.changed() => {
                        if changed.is_err() {
                            return;
                        }
                        continue;
                    }
                }
            }

            let dormant = !force_non_live
                && !shared.options.subscribe
                && (idle
                    || shared
                        .subscribers
                        .lock()
                        .expect("subscriber table lock poisoned")
                        .is_empty());
            if !dormant {
                break;
            }

            shared.lock_state().connected = false;
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    shared.mark_aborted();
                    return;
                }
                changed = pause_rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
                command = control_rx.recv() => match command {
                    Some(ControlCommand::Refresh(ack)) => {
                        refresh_acks.push(ack);
                        force_non_live = true;
                        idle = false;
                    }
                    Some(ControlCommand::Wake) => idle = false,
                    None => return,
                }
            }
        }

        // Build the request for the current position; resolvers run fresh.
        let (params, headers, position) = {
            let state = shared.lock_state();
            let live = state.live && shared.options.subscribe && !force_non_live;
            (
                state.params.clone(),
                state.headers.clone(),
                RequestPosition {
                    offset: state.offset.clone(),
                    handle: state.handle.clone(),
                    cursor: state.cursor.clone(),
                    live,
                },
            )
        };

        let request = match build_request(
            &shared.options.url,
            &params,
            &headers,
            shared.options.replica,
            &position,
        )
        .await
        {
            Ok(request) => request,
            Err(error) => {
                shared.mark_errored(error);
                return;
            }
        };
        let request_url = request.url.clone();
        let was_live = position.live;
        let was_forced = force_non_live;
        debug!("[FETCH] GET {} (live={})", request_url, was_live);

        // Issue the request. The select arms below are the only places the
        // in-flight future can be abandoned; each one drops it before the
        // loop continues, preserving the one-request-in-flight invariant.
        let transport_fut = (shared.transport)(request);
        tokio::pin!(transport_fut);
        let outcome = loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    shared.mark_aborted();
                    return;
                }
                changed = pause_rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    if *pause_rx.borrow_and_update() {
                        debug!("[FETCH] paused, aborting in-flight request");
                        shared.lock_state().connected = false;
                        continue 'cycle;
                    }
                }
                command = control_rx.recv() => {
                    if let Some(ControlCommand::Refresh(ack)) = command {
                        debug!("[FETCH] forced refresh, aborting in-flight request");
                        refresh_acks.push(ack);
                        force_non_live = true;
                        continue 'cycle;
                    }
                }
                result = &mut transport_fut => break result,
            }
        };

        let response = match outcome {
            Ok(response) => response,
            Err(error) => {
                if token.is_cancelled() {
                    shared.mark_aborted();
                    return;
                }
                match recover(&shared, error, &token).await {
                    Recovery::Retry => continue 'cycle,
                    Recovery::Fatal => return,
                    Recovery::Aborted => {
                        shared.mark_aborted();
                        return;
                    }
                }
            }
        };

        if !response.is_success() {
            let message = if response.body.is_empty() {
                format!("request to {} failed", request_url)
            } else {
                response.body.clone()
            };
            let error = ShapeLinkError::FetchError {
                status_code: response.status,
                message,
            };
            match recover(&shared, error, &token).await {
                Recovery::Retry => continue 'cycle,
                Recovery::Fatal => return,
                Recovery::Aborted => {
                    shared.mark_aborted();
                    return;
                }
            }
        }

        let batch = match process_response(&shared, &response, was_live, &request_url) {
            Ok(batch) => batch,
            Err(error) => {
                // Missing headers / unparsable body: a non-conformant
                // server. Fatal, never offered to the error handler.
                shared.mark_errored(error);
                return;
            }
        };

        shared.deliver_batch(&batch);

        if was_forced {
            force_non_live = false;
            for ack in refresh_acks.drain(..) {
                let _ = ack.send(());
            }
        }

        finish_cycle(&shared, &batch, &mut idle);
    }
}

/// Consult the caller-supplied error handler after a failed request.
async fn recover(
    shared: &Arc<StreamShared>,
    error: ShapeLinkError,
    token: &CancellationToken,
) -> Recovery {
    shared.lock_state().connected = false;
    warn!("[FETCH] request failed: {}", error);

    let handler = match &shared.options.on_error {
        Some(handler) => handler.clone(),
        None => {
            shared.mark_errored(error);
            return Recovery::Fatal;
        }
    };

    let decision = tokio::select! {
        biased;
        _ = token.cancelled() => return Recovery::Aborted,
        decision = handler(error.clone()) => decision,
    };

    match decision {
        Ok(Some(overrides)) => {
            let mut state = shared.lock_state();
            if let Some(params) = overrides.params {
                state.params.extend(params);
            }
            if let Some(headers) = overrides.headers {
                state.headers.extend(headers);
            }
            drop(state);
            debug!("[FETCH] error handler supplied overrides, retrying");
            Recovery::Retry
        }
        Ok(None) => {
            shared.mark_errored(error);
            Recovery::Fatal
        }
        Err(handler_error) => {
            shared.mark_errored(ShapeLinkError::HandlerError(handler_error.to_string()));
            Recovery::Fatal
        }
    }
}

/// Validate headers, parse the body and advance the stream position.
///
/// Returns the batch to deliver. Rotation (a handle change) resets the
/// position to cold start before adopting the rotated response's own
/// offset/handle, since its body already carries the fresh snapshot.
fn process_response(
    shared: &Arc<StreamShared>,
    response: &TransportResponse,
    was_live: bool,
    request_url: &str,
) -> Result<MessageBatch> {
    let offset_header = response.header(HEADER_OFFSET).map(str::to_string);
    let handle_header = response.header(HEADER_HANDLE).map(str::to_string);
    let cursor_header = response.header(HEADER_CURSOR).map(str::to_string);

    let mut missing = Vec::new();
    if offset_header.is_none() {
        missing.push(HEADER_OFFSET.to_string());
    }
    if handle_header.is_none() {
        missing.push(HEADER_HANDLE.to_string());
    }
    if was_live && cursor_header.is_none() {
        missing.push(HEADER_CURSOR.to_string());
    }
    if !missing.is_empty() {
        return Err(ShapeLinkError::MissingHeadersError {
            url: request_url.to_string(),
            headers: missing,
        });
    }

    let new_offset = Offset::new(offset_header.expect("offset header checked above"));
    let new_handle = handle_header.expect("handle header checked above");

    let messages: Vec<Message> = if response.status == 204 || response.body.trim().is_empty() {
        Vec::new()
    } else {
        serde_json::from_str(&response.body).map_err(|e| {
            ShapeLinkError::SerializationError(format!("Failed to parse message batch: {}", e))
        })?
    };

    let up_to_date = response.status == 204 || messages.iter().any(Message::is_up_to_date);

    let mut state = shared.lock_state();
    let rotated = state
        .handle
        .as_deref()
        .is_some_and(|handle| handle != new_handle);
    if rotated {
        debug!(
            "[STREAM] handle rotated ({} -> {}), resyncing from scratch",
            state.handle.as_deref().unwrap_or("-"),
            new_handle
        );
        state.offset = Offset::before_all();
        state.cursor = None;
        state.live = false;
        state.last_synced_at = None;
    }
    state.offset = new_offset.clone();
    state.handle = Some(new_handle.clone());
    if let Some(cursor) = cursor_header {
        state.cursor = Some(cursor);
    }

    Ok(MessageBatch {
        messages,
        offset: new_offset,
        handle: new_handle,
        rotated,
        up_to_date,
    })
}

/// Post-delivery bookkeeping: connection flags, live promotion,
/// must-refetch restart and catch-up-only parking.
fn finish_cycle(shared: &Arc<StreamShared>, batch: &MessageBatch, idle: &mut bool) {
    let must_refetch = batch.messages.iter().any(Message::is_must_refetch);
    let mut state = shared.lock_state();
    state.connected = true;
    state.loading = false;

    if must_refetch {
        debug!("[STREAM] must-refetch received, restarting from scratch");
        state.offset = Offset::before_all();
        state.handle = None;
        state.cursor = None;
        state.live = false;
        state.loading = true;
        state.last_synced_at = None;
    } else if batch.up_to_date {
        state.live = true;
        state.last_synced_at = Some(SystemTime::now());
        if !shared.options.subscribe {
            // Catch-up-only stream: done until woken again.
            state.connected = false;
            *idle = true;
        }
    }
}
