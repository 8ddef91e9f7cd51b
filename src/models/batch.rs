//! Delivery unit fanned out to stream subscribers.

use super::message::Message;
use super::offset::Offset;

/// One fully-parsed response, delivered whole to every subscriber.
///
/// A batch corresponds to exactly one network round trip: it carries every
/// message of that response plus the position the stream advanced to. A
/// subscriber never observes partial batches.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageBatch {
    /// Messages in server order.
    pub messages: Vec<Message>,

    /// Offset the stream advanced to with this response.
    pub offset: Offset,

    /// Shape handle this response belongs to.
    pub handle: String,

    /// Set when this response's handle differs from the previously stored
    /// one: consumers must clear replicated state before applying entries.
    pub rotated: bool,

    /// Set when the batch contains an `up-to-date` control entry (or the
    /// response was an empty `204`): the replica is at the live edge.
    pub up_to_date: bool,
}

impl MessageBatch {
    /// Returns `true` when consumers must clear prior state before applying
    /// this batch (a handle rotation or an in-band `must-refetch`).
    pub fn requires_clear(&self) -> bool {
        self.rotated || self.messages.iter().any(Message::is_must_refetch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::message::{ControlHeaders, ControlKind, ControlMessage};

    fn control(kind: ControlKind) -> Message {
        Message::Control(ControlMessage {
            headers: ControlHeaders { control: kind },
        })
    }

    #[test]
    fn test_requires_clear_on_rotation_flag() {
        let batch = MessageBatch {
            messages: vec![],
            offset: Offset::new("0_0"),
            handle: "h2".to_string(),
            rotated: true,
            up_to_date: false,
        };
        assert!(batch.requires_clear());
    }

    #[test]
    fn test_requires_clear_on_must_refetch_entry() {
        let batch = MessageBatch {
            messages: vec![control(ControlKind::MustRefetch)],
            offset: Offset::before_all(),
            handle: "h1".to_string(),
            rotated: false,
            up_to_date: false,
        };
        assert!(batch.requires_clear());
    }

    #[test]
    fn test_plain_batch_does_not_clear() {
        let batch = MessageBatch {
            messages: vec![control(ControlKind::UpToDate)],
            offset: Offset::new("1_0"),
            handle: "h1".to_string(),
            rotated: false,
            up_to_date: true,
        };
        assert!(!batch.requires_clear());
    }
}
