use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::{ConversationKey, ParticipantId};

/// Store-assigned message id. Strictly increasing in write order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub i64);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub key: ConversationKey,
    /// Always sorted, so equal pairs compare equal.
    pub participants: [ParticipantId; 2],
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub conversation: ConversationKey,
    pub sender: ParticipantId,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

/// Result of deleting a conversation and its messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DeleteOutcome {
    Deleted {
        conversation: Conversation,
        messages: usize,
    },
    NotFound,
}

/// Sort a participant pair into its stored order.
pub fn sorted_pair(a: ParticipantId, b: ParticipantId) -> [ParticipantId; 2] {
    if a <= b {
        [a, b]
    } else {
        [b, a]
    }
}

impl Conversation {
    pub fn includes(&self, participant: &ParticipantId) -> bool {
        self.participants.contains(participant)
    }

    /// The participant that is not `me`.
    pub fn counterpart<'a>(&'a self, me: &'a ParticipantId) -> Option<&'a ParticipantId> {
        if !self.includes(me) {
            return None;
        }
        self.participants.iter().find(|p| *p != me).or(Some(me))
    }
}

impl Message {
    pub fn is_from(&self, participant: &ParticipantId) -> bool {
        &self.sender == participant
    }
}

impl DeleteOutcome {
    pub fn is_deleted(&self) -> bool {
        matches!(self, DeleteOutcome::Deleted { .. })
    }
}
