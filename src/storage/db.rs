use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use tracing::debug;

use crate::error::{ChatError, ChatResult};
use crate::identity::{ConversationKey, ParticipantId};
use crate::model::{sorted_pair, Conversation, DeleteOutcome, Message, MessageId};

/// Path that selects a private in-memory database.
pub const IN_MEMORY: &str = ":memory:";

pub struct Database {
    pub conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn new(path: &Path) -> ChatResult<Self> {
        let conn = if path.as_os_str() == IN_MEMORY {
            Connection::open_in_memory()?
        } else {
            Connection::open(path)?
        };

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn in_memory() -> ChatResult<Self> {
        Self::new(Path::new(IN_MEMORY))
    }

    pub fn initialize(&self) -> ChatResult<()> {
        let conn = self.conn.lock();

        conn.pragma_update(None, "foreign_keys", true)?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS conversations (
                key TEXT PRIMARY KEY,
                participant_a TEXT NOT NULL,
                participant_b TEXT NOT NULL,
                created_at INTEGER NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                conversation_key TEXT NOT NULL,
                sender TEXT NOT NULL,
                body TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                FOREIGN KEY(conversation_key) REFERENCES conversations(key) ON DELETE CASCADE
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_messages_conversation_time
             ON messages(conversation_key, created_at, id)",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_conversations_participant_a
             ON conversations(participant_a)",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_conversations_participant_b
             ON conversations(participant_b)",
            [],
        )?;

        Ok(())
    }

    /// Insert the conversation unless one already exists under `key`.
    /// Returns whether a record was created.
    pub fn ensure_conversation(
        &self,
        key: &ConversationKey,
        participants: &[ParticipantId; 2],
    ) -> ChatResult<bool> {
        let conn = self.conn.lock();
        let [a, b] = sorted_pair(participants[0].clone(), participants[1].clone());

        let changes = conn.execute(
            "INSERT OR IGNORE INTO conversations (key, participant_a, participant_b, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![key, a, b, Utc::now().timestamp_micros()],
        )?;

        debug!(%key, created = changes > 0, "ensure conversation");
        Ok(changes > 0)
    }

    pub fn get_conversation(&self, key: &ConversationKey) -> ChatResult<Option<Conversation>> {
        let conn = self.conn.lock();

        conn.query_row(
            "SELECT key, participant_a, participant_b, created_at
             FROM conversations
             WHERE key = ?1",
            params![key],
            conversation_from_row,
        )
        .optional()
        .map_err(Into::into)
    }

    pub fn conversations_for(&self, participant: &ParticipantId) -> ChatResult<Vec<Conversation>> {
        let conn = self.conn.lock();

        let mut stmt = conn.prepare(
            "SELECT key, participant_a, participant_b, created_at
             FROM conversations
             WHERE participant_a = ?1 OR participant_b = ?1
             ORDER BY created_at ASC, key ASC",
        )?;
        let rows = stmt.query_map(params![participant], conversation_from_row)?;

        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Delete the conversation and all of its messages in one transaction.
    pub fn delete_conversation(&self, key: &ConversationKey) -> ChatResult<DeleteOutcome> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let conversation = tx
            .query_row(
                "SELECT key, participant_a, participant_b, created_at
                 FROM conversations
                 WHERE key = ?1",
                params![key],
                conversation_from_row,
            )
            .optional()?;

        let Some(conversation) = conversation else {
            return Ok(DeleteOutcome::NotFound);
        };

        let messages = tx.execute(
            "DELETE FROM messages WHERE conversation_key = ?1",
            params![key],
        )?;
        tx.execute("DELETE FROM conversations WHERE key = ?1", params![key])?;
        tx.commit()?;

        debug!(%key, messages, "deleted conversation");
        Ok(DeleteOutcome::Deleted {
            conversation,
            messages,
        })
    }

    /// Append a message, assigning its timestamp and id at write time.
    /// Fails with `NotFound` unless `sender` is one of the pair.
    ///
    /// The timestamp never goes below the latest one already stored for the
    /// conversation, so display order stays stable across clock steps.
    pub fn append_message(
        &self,
        key: &ConversationKey,
        sender: &ParticipantId,
        body: &str,
    ) -> ChatResult<Message> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        // Senders outside the pair see the conversation as missing.
        let is_member: bool = tx.query_row(
            "SELECT EXISTS(
                 SELECT 1 FROM conversations
                 WHERE key = ?1 AND (participant_a = ?2 OR participant_b = ?2)
             )",
            params![key, sender],
            |row| row.get(0),
        )?;
        if !is_member {
            return Err(ChatError::NotFound(key.clone()));
        }

        let latest: Option<i64> = tx.query_row(
            "SELECT MAX(created_at) FROM messages WHERE conversation_key = ?1",
            params![key],
            |row| row.get(0),
        )?;
        let now = Utc::now().timestamp_micros();
        let created_at = latest.map_or(now, |latest| latest.max(now));

        tx.execute(
            "INSERT INTO messages (conversation_key, sender, body, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![key, sender, body, created_at],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;

        Ok(Message {
            id: MessageId(id),
            conversation: key.clone(),
            sender: sender.clone(),
            body: body.to_owned(),
            created_at: micros_to_datetime(created_at, 4)?,
        })
    }

    /// Messages of one conversation, oldest first; equal timestamps by id.
    pub fn list_messages(&self, key: &ConversationKey) -> ChatResult<Vec<Message>> {
        let conn = self.conn.lock();

        let mut stmt = conn.prepare(
            "SELECT id, conversation_key, sender, body, created_at
             FROM messages
             WHERE conversation_key = ?1
             ORDER BY created_at ASC, id ASC",
        )?;
        let messages = stmt.query_map(params![key], |row| {
            Ok(Message {
                id: MessageId(row.get(0)?),
                conversation: row.get(1)?,
                sender: row.get(2)?,
                body: row.get(3)?,
                created_at: micros_to_datetime(row.get(4)?, 4)?,
            })
        })?;

        Ok(messages.collect::<Result<Vec<_>, _>>()?)
    }
}

fn conversation_from_row(row: &Row<'_>) -> rusqlite::Result<Conversation> {
    Ok(Conversation {
        key: row.get(0)?,
        participants: [row.get(1)?, row.get(2)?],
        created_at: micros_to_datetime(row.get(3)?, 3)?,
    })
}

fn micros_to_datetime(micros: i64, column: usize) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_micros(micros)
        .ok_or(rusqlite::Error::IntegralValueOutOfRange(column, micros))
}

impl ToSql for ConversationKey {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for ConversationKey {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let raw = String::column_result(value)?;
        ConversationKey::parse(raw).map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

impl ToSql for ParticipantId {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for ParticipantId {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let raw = String::column_result(value)?;
        ParticipantId::new(raw).map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}
