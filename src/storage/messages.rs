use std::sync::Arc;

use tracing::debug;

use super::Database;
use crate::error::{ChatResult, ValidationError};
use crate::identity::{ConversationKey, ParticipantId};
use crate::model::Message;
use crate::sync::{ChangeEvent, ChangeHub};

/// Append-only message log, one ordered sequence per conversation.
#[derive(Clone)]
pub struct MessageLog {
    db: Arc<Database>,
    hub: ChangeHub,
}

impl MessageLog {
    pub fn new(db: Arc<Database>, hub: ChangeHub) -> Self {
        Self { db, hub }
    }

    /// Store a message. The body is trimmed; the id and timestamp come from
    /// the store. Input is validated before the store is touched.
    pub async fn append(
        &self,
        key: &ConversationKey,
        sender: Option<&ParticipantId>,
        body: &str,
    ) -> ChatResult<Message> {
        let sender = sender.cloned().ok_or(ValidationError::MissingSender)?;
        let body = body.trim();
        if body.is_empty() {
            return Err(ValidationError::EmptyBody.into());
        }

        let db = self.db.clone();
        let key_for_db = key.clone();
        let body = body.to_owned();

        let message =
            tokio::task::spawn_blocking(move || db.append_message(&key_for_db, &sender, &body))
                .await??;

        debug!(%key, id = message.id.0, sender = %message.sender, "message appended");
        self.hub.publish(ChangeEvent::MessageAppended {
            key: message.conversation.clone(),
            id: message.id,
        });

        Ok(message)
    }

    /// All messages for `key`, ascending by timestamp then id.
    pub async fn list_ordered(&self, key: &ConversationKey) -> ChatResult<Vec<Message>> {
        let db = self.db.clone();
        let key = key.clone();
        tokio::task::spawn_blocking(move || db.list_messages(&key)).await?
    }
}
