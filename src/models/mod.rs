//! Data models for the shape-link client library.
//!
//! Defines the wire message types, position/offset bookkeeping, replica
//! modes, connection state snapshots and stream configuration.

pub mod batch;
pub mod connection_status;
pub mod message;
pub mod offset;
pub mod replica;
pub mod row;
pub mod stream_options;

pub use batch::MessageBatch;
pub use connection_status::ConnectionStatus;
pub use message::{
    ChangeHeaders, ChangeMessage, ControlHeaders, ControlKind, ControlMessage, Message, Operation,
};
pub use offset::Offset;
pub use replica::Replica;
pub use row::{merge_row, Row};
pub use stream_options::{
    ErrorHandler, RetryOverride, ShapeStreamOptions, ShapeStreamOptionsBuilder, RESERVED_PARAMS,
};
