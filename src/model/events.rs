//! Change notifications
//!
//! Adapters push events into a [`ChangeSink`]; the engine drains the matching
//! receiver when a session opens. Sending never blocks.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::model::types::NodeRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Added,
    Removed,
    TagsChanged,
}

/// Something changed about one device or variable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub node: NodeRef,
    pub kind: ChangeKind,
}

impl ChangeEvent {
    pub fn new(node: NodeRef, kind: ChangeKind) -> Self {
        Self { node, kind }
    }
}

pub type ChangeReceiver = mpsc::UnboundedReceiver<ChangeEvent>;

/// Sending half handed to adapters
#[derive(Debug, Clone)]
pub struct ChangeSink {
    sender: mpsc::UnboundedSender<ChangeEvent>,
}

impl ChangeSink {
    /// Enqueue an event; false once the engine side is gone
    pub fn send(&self, event: ChangeEvent) -> bool {
        self.sender.send(event).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    pub fn same_channel(&self, other: &ChangeSink) -> bool {
        self.sender.same_channel(&other.sender)
    }
}

/// Create a connected sink/receiver pair
pub fn change_channel() -> (ChangeSink, ChangeReceiver) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (ChangeSink { sender }, receiver)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_and_drain() {
        let (sink, mut rx) = change_channel();
        let other = sink.clone();
        assert!(sink.same_channel(&other));

        assert!(sink.send(ChangeEvent::new(NodeRef::device("d1"), ChangeKind::Removed)));
        let event = rx.try_recv().unwrap();
        assert_eq!(event.kind, ChangeKind::Removed);
        assert!(rx.try_recv().is_err());

        drop(rx);
        assert!(sink.is_closed());
        assert!(!other.send(ChangeEvent::new(NodeRef::device("d1"), ChangeKind::Added)));
    }
}
