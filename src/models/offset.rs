//! Opaque log offset for a shape's change stream.
//!
//! The server hands the client an offset with every response; the client
//! echoes the last one back on the next request. Offsets are forward-only
//! cursors with no client-visible structure beyond the cold-start sentinel.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Position in a shape's change log.
///
/// Opaque to the client except for [`Offset::BEFORE_ALL`], the sentinel a
/// fresh stream starts from (and falls back to on rotation).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Offset(String);

impl Offset {
    /// Sentinel for "no progress yet": the first request of a stream's
    /// lifecycle asks for the shape from the beginning.
    pub const BEFORE_ALL: &'static str = "-1";

    /// Wrap a raw offset value received from the server.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The cold-start sentinel offset.
    pub fn before_all() -> Self {
        Self(Self::BEFORE_ALL.to_string())
    }

    /// Returns `true` if this is the cold-start sentinel.
    pub fn is_before_all(&self) -> bool {
        self.0 == Self::BEFORE_ALL
    }

    /// Raw string representation, as sent on the wire.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Offset {
    fn default() -> Self {
        Self::before_all()
    }
}

impl fmt::Display for Offset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Offset {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Offset {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}
