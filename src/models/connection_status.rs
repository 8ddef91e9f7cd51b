//! Point-in-time connection state snapshot.

use std::time::SystemTime;

use crate::error::ShapeLinkError;

use super::offset::Offset;

/// Snapshot of a stream's connection state.
///
/// Returned by [`ShapeStream::status`](crate::ShapeStream::status); every
/// field is also available through an individual getter.
#[derive(Debug, Clone)]
pub struct ConnectionStatus {
    /// `true` until the first response of the current lifecycle (initial or
    /// post-rotation) completes.
    pub is_loading: bool,

    /// `true` iff at least one response completed without fatal error since
    /// the last rotation/start and the stream is not paused, errored, or
    /// aborted.
    pub is_connected: bool,

    /// Most recent fatal error, if the stream has halted on one.
    pub error: Option<ShapeLinkError>,

    /// When the stream last observed an up-to-date response.
    pub last_synced_at: Option<SystemTime>,

    /// Last acknowledged position in the shape's change log.
    pub last_offset: Offset,

    /// Server-assigned shape handle, once known.
    pub shape_handle: Option<String>,
}
