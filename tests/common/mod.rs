//! Shared test fixtures: a scripted transport standing in for the server.
//!
//! `MockServer` hands out responses in push order. When the script queue
//! is empty an incoming request blocks until the next `push`, which models
//! a long poll held open by the server; aborting the request (pause,
//! refresh, cancellation) leaves the queued response for the next request.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value as JsonValue};
use shape_link::{
    Result, Transport, TransportRequest, TransportResponse, HEADER_CURSOR, HEADER_HANDLE,
    HEADER_OFFSET,
};
use tokio::sync::{watch, Notify};

pub struct MockServer {
    inner: Arc<MockInner>,
    count_rx: watch::Receiver<usize>,
}

struct MockInner {
    responses: Mutex<VecDeque<Result<TransportResponse>>>,
    requests: Mutex<Vec<TransportRequest>>,
    available: Notify,
    count_tx: watch::Sender<usize>,
}

impl MockServer {
    pub fn new() -> Self {
        let (count_tx, count_rx) = watch::channel(0);
        Self {
            inner: Arc::new(MockInner {
                responses: Mutex::new(VecDeque::new()),
                requests: Mutex::new(Vec::new()),
                available: Notify::new(),
                count_tx,
            }),
            count_rx,
        }
    }

    /// Queue the next response.
    pub fn push(&self, response: Result<TransportResponse>) {
        self.inner.responses.lock().unwrap().push_back(response);
        self.inner.available.notify_one();
    }

    pub fn push_ok(&self, response: TransportResponse) {
        self.push(Ok(response));
    }

    /// The transport to inject into stream options.
    pub fn transport(&self) -> Transport {
        let inner = self.inner.clone();
        Arc::new(move |request: TransportRequest| {
            let inner = inner.clone();
            Box::pin(async move {
                {
                    let mut requests = inner.requests.lock().unwrap();
                    requests.push(request);
                    let count = requests.len();
                    let _ = inner.count_tx.send(count);
                }
                loop {
                    if let Some(response) = inner.responses.lock().unwrap().pop_front() {
                        return response;
                    }
                    // Long poll: wait for the server to have something.
                    inner.available.notified().await;
                }
            })
        })
    }

    /// Requests seen so far, in order.
    pub fn requests(&self) -> Vec<TransportRequest> {
        self.inner.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.inner.requests.lock().unwrap().len()
    }

    /// The URL of request number `index` (zero-based).
    pub fn request_url(&self, index: usize) -> String {
        self.inner.requests.lock().unwrap()[index].url.clone()
    }

    /// Wait until at least `n` requests have been issued.
    pub async fn wait_for_requests(&self, n: usize) {
        let mut rx = self.count_rx.clone();
        loop {
            if *rx.borrow_and_update() >= n {
                return;
            }
            rx.changed().await.expect("mock server dropped");
        }
    }
}

/// Build a successful shape response with the protocol headers set.
pub fn shape_response(
    status: u16,
    offset: &str,
    handle: &str,
    cursor: Option<&str>,
    messages: &[JsonValue],
) -> TransportResponse {
    let mut headers = std::collections::HashMap::new();
    headers.insert(HEADER_OFFSET.to_string(), offset.to_string());
    headers.insert(HEADER_HANDLE.to_string(), handle.to_string());
    if let Some(cursor) = cursor {
        headers.insert(HEADER_CURSOR.to_string(), cursor.to_string());
    }
    let body = if messages.is_empty() && status == 204 {
        String::new()
    } else {
        serde_json::to_string(messages).unwrap()
    };
    TransportResponse {
        status,
        headers,
        body,
    }
}

/// A bare response with arbitrary headers, for missing-header scenarios.
pub fn bare_response(status: u16, header_pairs: &[(&str, &str)], body: &str) -> TransportResponse {
    TransportResponse {
        status,
        headers: header_pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        body: body.to_string(),
    }
}

pub fn up_to_date() -> JsonValue {
    json!({"headers": {"control": "up-to-date"}})
}

pub fn must_refetch() -> JsonValue {
    json!({"headers": {"control": "must-refetch"}})
}

pub fn insert(key: &str, value: JsonValue) -> JsonValue {
    json!({"key": key, "value": value, "headers": {"operation": "insert"}})
}

pub fn update(key: &str, value: JsonValue) -> JsonValue {
    json!({"key": key, "value": value, "headers": {"operation": "update"}})
}

pub fn delete(key: &str, value: JsonValue) -> JsonValue {
    json!({"key": key, "value": value, "headers": {"operation": "delete"}})
}

/// Poll `condition` until it holds or two seconds elapse.
pub async fn wait_until<F>(condition: F) -> bool
where
    F: Fn() -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
