//! # shape-link
//!
//! Client library for maintaining live, incrementally-updated local
//! replicas ("shapes") of filtered slices of a remote relational dataset,
//! synchronized over an HTTP long-polling protocol with forward-only
//! cursors.
//!
//! Two engines cooperate:
//!
//! - [`ShapeStream`] — the streaming protocol client. Drives the
//!   request/response cycle, tracks offset/handle state, validates
//!   response headers, detects shape rotation, promotes to live long
//!   polling once caught up, supports pause/resume and forced refresh, and
//!   fans out parsed message batches to subscribers. Error recovery is
//!   delegated to a caller-supplied handler; no retry policy is built in.
//! - [`Shape`] — the materialized view. Subscribes to one stream and
//!   maintains an insertion-ordered key→row table, notifying its own
//!   subscribers exactly once per up-to-date batch with a consistent
//!   snapshot.
//!
//! # Example
//!
//! ```rust,no_run
//! use shape_link::{Shape, ShapeStream, ShapeStreamOptions};
//!
//! # async fn example() -> shape_link::Result<()> {
//! let stream = ShapeStream::new(
//!     ShapeStreamOptions::builder()
//!         .url("http://localhost:3000/v1/shape")
//!         .table("issues")
//!         .where_clause("priority > 5")
//!         .build()?,
//! )?;
//! let shape = Shape::new(stream);
//!
//! shape.subscribe(|rows| {
//!     println!("shape now has {} rows", rows.len());
//! });
//!
//! // Resolves once the first sync completes.
//! let rows = shape.rows().await?;
//! println!("initial: {} rows", rows.len());
//! # Ok(())
//! # }
//! ```

pub mod dynamic;
pub mod error;
pub mod hash;
pub mod models;
mod request;
pub mod shape;
pub mod stream;
pub mod subscribers;
pub mod transport;

pub use dynamic::DynamicValue;
pub use error::{Result, ShapeLinkError};
pub use models::{
    ChangeHeaders, ChangeMessage, ConnectionStatus, ControlHeaders, ControlKind, ControlMessage,
    Message, MessageBatch, Offset, Operation, Replica, RetryOverride, Row, ShapeStreamOptions,
    ShapeStreamOptionsBuilder,
};
pub use shape::{Shape, ShapeCallback, ShapeSubscriptionId};
pub use stream::{
    ShapeStream, SubscriptionHandle, HEADER_CURSOR, HEADER_HANDLE, HEADER_OFFSET,
};
pub use subscribers::{BatchCallback, ErrorCallback, SubscriberId};
pub use transport::{
    default_transport, transport_from_client, Transport, TransportRequest, TransportResponse,
};
