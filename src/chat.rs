//! Chat service facade
//!
//! Wires the stores, the change hub and live queries together and runs the
//! data flow end to end: resolve the pair into a key, ensure the
//! conversation, append messages, observe changes.

use std::sync::Arc;

use tracing::{info, instrument};

use crate::config::Config;
use crate::error::{ChatError, ChatResult};
use crate::identity::{validate_counterpart, ConversationKey};
use crate::model::{sorted_pair, Conversation, DeleteOutcome, Message};
use crate::session::Session;
use crate::storage::{ConversationStore, Database, MessageLog};
use crate::sync::{ChangeHub, LiveEvent, LiveQueries, Subscription};

#[derive(Clone)]
pub struct ChatService {
    conversations: ConversationStore,
    messages: MessageLog,
    live: LiveQueries,
}

impl ChatService {
    /// Open (and migrate) the database named by the config.
    pub fn open(config: &Config) -> ChatResult<Self> {
        info!(path = %config.storage.path.display(), "opening chat store");
        let db = Database::new(&config.storage.path)?;
        Self::from_database(db, config.sync.channel_capacity)
    }

    pub fn in_memory() -> ChatResult<Self> {
        Self::open(&Config::in_memory())
    }

    pub fn from_database(db: Database, channel_capacity: usize) -> ChatResult<Self> {
        db.initialize()?;

        let db = Arc::new(db);
        let hub = ChangeHub::new(channel_capacity);
        let conversations = ConversationStore::new(db.clone(), hub.clone());
        let messages = MessageLog::new(db.clone(), hub.clone());
        let live = LiveQueries::new(hub, db);

        Ok(Self {
            conversations,
            messages,
            live,
        })
    }

    /// Open a conversation between the signed-in principal and
    /// `counterpart`, creating it on first use.
    #[instrument(skip(self, session))]
    pub async fn start_conversation(
        &self,
        session: &Session,
        counterpart: &str,
    ) -> ChatResult<Conversation> {
        let me = session.require_principal()?;
        let other = validate_counterpart(&me, counterpart)?;
        let key = ConversationKey::for_pair(&me, &other);

        self.conversations
            .ensure(&key, sorted_pair(me, other))
            .await?;

        // A concurrent delete may win between ensure and get.
        self.conversations
            .get(&key)
            .await?
            .ok_or_else(|| ChatError::NotFound(key.clone()))
    }

    #[instrument(skip(self, session, body))]
    pub async fn send(
        &self,
        session: &Session,
        key: &ConversationKey,
        body: &str,
    ) -> ChatResult<Message> {
        let sender = session.principal();
        self.messages.append(key, sender.as_ref(), body).await
    }

    pub async fn history(&self, key: &ConversationKey) -> ChatResult<Vec<Message>> {
        self.messages.list_ordered(key).await
    }

    /// The conversation under `key`, if the signed-in principal is one of
    /// its pair. Outsiders get `NotFound`, the same as for a missing key.
    pub async fn member_conversation(
        &self,
        session: &Session,
        key: &ConversationKey,
    ) -> ChatResult<Conversation> {
        let me = session.require_principal()?;
        match self.conversations.get(key).await? {
            Some(conversation) if conversation.includes(&me) => Ok(conversation),
            _ => Err(ChatError::NotFound(key.clone())),
        }
    }

    /// The signed-in principal's conversations.
    pub async fn conversations(&self, session: &Session) -> ChatResult<Vec<Conversation>> {
        let me = session.require_principal()?;
        self.conversations.list_for(&me).await
    }

    #[instrument(skip(self))]
    pub async fn delete(&self, key: &ConversationKey) -> ChatResult<DeleteOutcome> {
        self.conversations.delete(key).await
    }

    pub fn watch_messages<L>(&self, key: &ConversationKey, listener: L) -> Subscription
    where
        L: Fn(LiveEvent<Message>) + Send + Sync + 'static,
    {
        self.live.watch_messages(key, listener)
    }

    pub fn watch_conversations<L>(&self, session: &Session, listener: L) -> ChatResult<Subscription>
    where
        L: Fn(LiveEvent<Conversation>) + Send + Sync + 'static,
    {
        let me = session.require_principal()?;
        Ok(self.live.watch_conversations(&me, listener))
    }
}
