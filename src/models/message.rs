//! Wire messages for the shape streaming protocol.
//!
//! A response body is an ordered JSON array of messages. Each message is
//! either a change entry (one row operation) or a control entry (a stream
//! signal such as `up-to-date`).

use serde::{Deserialize, Serialize};

use super::row::Row;

/// Row operation carried by a change message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Insert,
    Update,
    Delete,
}

/// Headers of a change message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeHeaders {
    /// The row operation.
    pub operation: Operation,

    /// Source relation as `[schema, table]`, when the server includes it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relation: Option<Vec<String>>,
}

/// A single row change within a shape's change log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeMessage {
    /// Key derived from the row's primary key. Stable across updates.
    pub key: String,

    /// Row payload: the full row for inserts (and updates in full replica
    /// mode), or only the changed columns for updates in partial mode.
    pub value: Row,

    pub headers: ChangeHeaders,
}

/// Control signal kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlKind {
    /// The client has caught up to the live edge as of this response.
    #[serde(rename = "up-to-date")]
    UpToDate,

    /// The shape's log is gone; the client must restart from scratch.
    #[serde(rename = "must-refetch")]
    MustRefetch,
}

/// Headers of a control message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlHeaders {
    pub control: ControlKind,
}

/// A control entry in the message stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlMessage {
    pub headers: ControlHeaders,
}

/// One entry of a response body: a row change or a stream control signal.
///
/// Change entries carry `key`/`value`, control entries only `headers`, so
/// untagged deserialization is unambiguous.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
    Change(ChangeMessage),
    Control(ControlMessage),
}

impl Message {
    /// Returns `true` if this is an `up-to-date` control entry.
    pub fn is_up_to_date(&self) -> bool {
        matches!(
            self,
            Message::Control(ControlMessage {
                headers: ControlHeaders {
                    control: ControlKind::UpToDate
                }
            })
        )
    }

    /// Returns `true` if this is a `must-refetch` control entry.
    pub fn is_must_refetch(&self) -> bool {
        matches!(
            self,
            Message::Control(ControlMessage {
                headers: ControlHeaders {
                    control: ControlKind::MustRefetch
                }
            })
        )
    }

    /// Returns the change entry, if this is one.
    pub fn as_change(&self) -> Option<&ChangeMessage> {
        match self {
            Message::Change(change) => Some(change),
            Message::Control(_) => None,
        }
    }
}
