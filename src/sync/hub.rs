use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::trace;

use crate::identity::{ConversationKey, ParticipantId};
use crate::model::{Conversation, MessageId};

pub const DEFAULT_CAPACITY: usize = 1024;

/// A committed write, published after the store transaction succeeds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    ConversationCreated(Conversation),
    ConversationDeleted(Conversation),
    MessageAppended { key: ConversationKey, id: MessageId },
}

impl ChangeEvent {
    pub fn key(&self) -> &ConversationKey {
        match self {
            ChangeEvent::ConversationCreated(c) | ChangeEvent::ConversationDeleted(c) => &c.key,
            ChangeEvent::MessageAppended { key, .. } => key,
        }
    }

    /// Whether the event changes `participant`'s conversation list.
    pub fn touches_participant(&self, participant: &ParticipantId) -> bool {
        match self {
            ChangeEvent::ConversationCreated(c) | ChangeEvent::ConversationDeleted(c) => {
                c.includes(participant)
            }
            ChangeEvent::MessageAppended { .. } => false,
        }
    }
}

/// In-process publish/subscribe channel for store changes.
#[derive(Clone)]
pub struct ChangeHub {
    tx: broadcast::Sender<Arc<ChangeEvent>>,
}

impl ChangeHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<ChangeEvent>> {
        self.tx.subscribe()
    }

    /// Returns how many receivers saw the event. Zero is not an error.
    pub fn publish(&self, event: ChangeEvent) -> usize {
        trace!(key = %event.key(), "publish change");
        self.tx.send(Arc::new(event)).unwrap_or(0)
    }
}

impl Default for ChangeHub {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
