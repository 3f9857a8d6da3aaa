use std::sync::Arc;

use tracing::info;

use super::Database;
use crate::error::ChatResult;
use crate::identity::{ConversationKey, ParticipantId};
use crate::model::{Conversation, DeleteOutcome};
use crate::sync::{ChangeEvent, ChangeHub};

/// Conversation records keyed by their canonical key.
#[derive(Clone)]
pub struct ConversationStore {
    db: Arc<Database>,
    hub: ChangeHub,
}

impl ConversationStore {
    pub fn new(db: Arc<Database>, hub: ChangeHub) -> Self {
        Self { db, hub }
    }

    /// Idempotent create. An existing record keeps its participants.
    /// Returns whether this call created the record.
    pub async fn ensure(
        &self,
        key: &ConversationKey,
        participants: [ParticipantId; 2],
    ) -> ChatResult<bool> {
        let db = self.db.clone();
        let key_for_db = key.clone();

        let created = tokio::task::spawn_blocking(move || {
            if db.ensure_conversation(&key_for_db, &participants)? {
                db.get_conversation(&key_for_db)
            } else {
                Ok(None)
            }
        })
        .await??;

        match created {
            Some(conversation) => {
                info!(key = %conversation.key, "conversation created");
                self.hub.publish(ChangeEvent::ConversationCreated(conversation));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub async fn get(&self, key: &ConversationKey) -> ChatResult<Option<Conversation>> {
        let db = self.db.clone();
        let key = key.clone();
        tokio::task::spawn_blocking(move || db.get_conversation(&key)).await?
    }

    /// Conversations `participant` takes part in, oldest first.
    pub async fn list_for(&self, participant: &ParticipantId) -> ChatResult<Vec<Conversation>> {
        let db = self.db.clone();
        let participant = participant.clone();
        tokio::task::spawn_blocking(move || db.conversations_for(&participant)).await?
    }

    /// Remove the record and every message under it as one unit of work.
    pub async fn delete(&self, key: &ConversationKey) -> ChatResult<DeleteOutcome> {
        let db = self.db.clone();
        let key_for_db = key.clone();

        let outcome =
            tokio::task::spawn_blocking(move || db.delete_conversation(&key_for_db)).await??;

        match &outcome {
            DeleteOutcome::Deleted {
                conversation,
                messages,
            } => {
                info!(%key, messages, "conversation deleted");
                self.hub
                    .publish(ChangeEvent::ConversationDeleted(conversation.clone()));
            }
            DeleteOutcome::NotFound => {
                info!(%key, "delete skipped, conversation not found");
            }
        }

        Ok(outcome)
    }
}
