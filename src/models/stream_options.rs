//! Shape stream configuration.
//!
//! A [`ShapeStreamOptions`] value describes one shape: endpoint, selection
//! parameters, replica mode, custom headers, transport, abort signal and
//! error-recovery handler. Options are immutable once built — changing any
//! field means constructing a new stream/shape pair.

use futures_util::future::BoxFuture;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::dynamic::DynamicValue;
use crate::error::{Result, ShapeLinkError};
use crate::transport::Transport;

use super::offset::Offset;
use super::replica::Replica;

/// Query parameter names the protocol itself owns. Rejected in user params.
pub const RESERVED_PARAMS: &[&str] = &["live", "offset", "handle", "cursor", "replica"];

/// Partial configuration override returned by an error handler to trigger
/// a silent retry (e.g. replacement credentials after a 401).
#[derive(Clone, Default)]
pub struct RetryOverride {
    /// Params merged over the stream's params for all subsequent requests.
    pub params: Option<HashMap<String, DynamicValue>>,

    /// Headers merged over the stream's headers for all subsequent requests.
    pub headers: Option<HashMap<String, DynamicValue>>,
}

impl RetryOverride {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a replacement param.
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<DynamicValue>) -> Self {
        self.params
            .get_or_insert_with(HashMap::new)
            .insert(name.into(), value.into());
        self
    }

    /// Add a replacement header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<DynamicValue>) -> Self {
        self.headers
            .get_or_insert_with(HashMap::new)
            .insert(name.into(), value.into());
        self
    }
}

impl fmt::Debug for RetryOverride {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryOverride")
            .field("params", &self.params.as_ref().map(|p| p.len()))
            .field("headers", &self.headers.as_ref().map(|h| h.len()))
            .finish()
    }
}

/// Caller-supplied error handler.
///
/// Invoked once per recoverable request failure. Returning
/// `Ok(Some(override))` merges the override and retries immediately;
/// `Ok(None)` makes the error fatal for the stream; `Err(_)` is treated as
/// a handler failure and is also fatal. Retry cadence (backoff, jitter,
/// attempt limits) is entirely the handler's concern.
pub type ErrorHandler =
    Arc<dyn Fn(ShapeLinkError) -> BoxFuture<'static, Result<Option<RetryOverride>>> + Send + Sync>;

/// Immutable configuration for a [`ShapeStream`](crate::ShapeStream).
///
/// # Example
///
/// ```rust,no_run
/// use shape_link::{Replica, ShapeStreamOptions};
///
/// # fn example() -> shape_link::Result<()> {
/// let options = ShapeStreamOptions::builder()
///     .url("http://localhost:3000/v1/shape")
///     .table("issues")
///     .where_clause("priority > 5")
///     .replica(Replica::Full)
///     .build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ShapeStreamOptions {
    /// Shape endpoint URL.
    pub url: String,

    /// Selection parameters (table, filter, columns, anything the server
    /// understands). Each value may be a literal or a per-request resolver.
    pub params: HashMap<String, DynamicValue>,

    /// Custom request headers; same literal-or-resolver semantics.
    pub headers: HashMap<String, DynamicValue>,

    /// Replica mode.
    pub replica: Replica,

    /// Resume position: offset to start from instead of the cold-start
    /// sentinel.
    pub offset: Option<Offset>,

    /// Resume position: handle belonging to `offset`.
    pub handle: Option<String>,

    /// Injected transport; defaults to the reqwest-backed transport.
    pub transport: Option<Transport>,

    /// Abort signal. Once cancelled the stream halts permanently.
    pub signal: Option<CancellationToken>,

    /// Auto-subscribe: when `true` (default) the stream keeps long polling
    /// even with zero subscribers. When `false` it catches up, stops at the
    /// first up-to-date, and halts when the last subscriber leaves.
    pub subscribe: bool,

    /// Error-recovery handler. Without one, every request failure is fatal.
    pub on_error: Option<ErrorHandler>,
}

impl ShapeStreamOptions {
    /// Create a new builder.
    pub fn builder() -> ShapeStreamOptionsBuilder {
        ShapeStreamOptionsBuilder::new()
    }

    /// Canonical hash of this configuration; see [`crate::hash`].
    pub fn canonical_hash(&self) -> String {
        crate::hash::canonical_options_hash(self)
    }
}

impl fmt::Debug for ShapeStreamOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShapeStreamOptions")
            .field("url", &self.url)
            .field("params", &self.params)
            .field("headers", &self.headers)
            .field("replica", &self.replica)
            .field("offset", &self.offset)
            .field("handle", &self.handle)
            .field("transport", &self.transport.is_some())
            .field("signal", &self.signal.is_some())
            .field("subscribe", &self.subscribe)
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

/// Builder for [`ShapeStreamOptions`].
pub struct ShapeStreamOptionsBuilder {
    url: Option<String>,
    params: HashMap<String, DynamicValue>,
    headers: HashMap<String, DynamicValue>,
    replica: Replica,
    offset: Option<Offset>,
    handle: Option<String>,
    transport: Option<Transport>,
    signal: Option<CancellationToken>,
    subscribe: bool,
    on_error: Option<ErrorHandler>,
}

impl ShapeStreamOptionsBuilder {
    fn new() -> Self {
        Self {
            url: None,
            params: HashMap::new(),
            headers: HashMap::new(),
            replica: Replica::default(),
            offset: None,
            handle: None,
            transport: None,
            signal: None,
            subscribe: true,
            on_error: None,
        }
    }

    /// Set the shape endpoint URL (required).
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Shorthand for the `table` selection parameter.
    pub fn table(self, table: impl Into<DynamicValue>) -> Self {
        self.param("table", table)
    }

    /// Shorthand for the `where` filter parameter.
    pub fn where_clause(self, filter: impl Into<DynamicValue>) -> Self {
        self.param("where", filter)
    }

    /// Shorthand for the `columns` selection parameter
    /// (comma-separated column list).
    pub fn columns(self, columns: impl Into<DynamicValue>) -> Self {
        self.param("columns", columns)
    }

    /// Add a selection parameter.
    pub fn param(mut self, name: impl Into<String>, value: impl Into<DynamicValue>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    /// Add a custom request header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<DynamicValue>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Set the replica mode.
    pub fn replica(mut self, replica: Replica) -> Self {
        self.replica = replica;
        self
    }

    /// Resume from a known offset (requires the matching handle unless the
    /// offset is the cold-start sentinel).
    pub fn offset(mut self, offset: impl Into<Offset>) -> Self {
        self.offset = Some(offset.into());
        self
    }

    /// Resume with a known shape handle.
    pub fn handle(mut self, handle: impl Into<String>) -> Self {
        self.handle = Some(handle.into());
        self
    }

    /// Inject a transport.
    pub fn transport(mut self, transport: Transport) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Supply the abort signal.
    pub fn signal(mut self, signal: CancellationToken) -> Self {
        self.signal = Some(signal);
        self
    }

    /// Set the auto-subscribe flag.
    pub fn subscribe(mut self, subscribe: bool) -> Self {
        self.subscribe = subscribe;
        self
    }

    /// Register the error-recovery handler.
    pub fn on_error<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(ShapeLinkError) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<RetryOverride>>> + Send + 'static,
    {
        self.on_error = Some(Arc::new(move |err| Box::pin(f(err))));
        self
    }

    /// Validate and build the options.
    pub fn build(self) -> Result<ShapeStreamOptions> {
        let url = self
            .url
            .ok_or_else(|| ShapeLinkError::ConfigurationError("url is required".to_string()))?;

        reqwest::Url::parse(&url).map_err(|e| {
            ShapeLinkError::ConfigurationError(format!("Invalid url '{}': {}", url, e))
        })?;

        for reserved in RESERVED_PARAMS {
            if self.params.contains_key(*reserved) {
                return Err(ShapeLinkError::ConfigurationError(format!(
                    "Cannot set reserved parameter '{}'",
                    reserved
                )));
            }
        }

        if self.handle.is_some() && self.offset.is_none() {
            return Err(ShapeLinkError::ConfigurationError(
                "handle requires a matching offset to resume from".to_string(),
            ));
        }

        Ok(ShapeStreamOptions {
            url,
            params: self.params,
            headers: self.headers,
            replica: self.replica,
            offset: self.offset,
            handle: self.handle,
            transport: self.transport,
            signal: self.signal,
            subscribe: self.subscribe,
            on_error: self.on_error,
        })
    }
}
