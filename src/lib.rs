//! # PingMe - Two-Party Chat Core
//!
//! Canonical conversation identity, an append-only message log and live
//! query subscriptions for one-to-one chat.
//!
//! ## Features
//!
//! - **Canonical keys**: `conversation_key(a, b) == conversation_key(b, a)`
//! - **Append-only log**: store-assigned timestamps and ids, ordered reads
//! - **Live queries**: full ordered snapshots pushed on every change
//! - **SQLite-backed**: cascading deletes in a single transaction
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pingme::{ChatService, LiveEvent, ParticipantId, Session};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let chat = ChatService::in_memory()?;
//!     let session = Session::signed_in(ParticipantId::new("alice@x.com")?);
//!
//!     let conversation = chat.start_conversation(&session, "bob@x.com").await?;
//!     let _subscription = chat.watch_messages(&conversation.key, |event| {
//!         if let LiveEvent::Snapshot(messages) = event {
//!             println!("{} messages", messages.len());
//!         }
//!     });
//!
//!     chat.send(&session, &conversation.key, "hi").await?;
//!     Ok(())
//! }
//! ```

pub mod chat;
pub mod client;
pub mod config;
pub mod error;
pub mod identity;
pub mod model;
pub mod server;
pub mod session;
pub mod storage;
pub mod sync;
pub mod telemetry;

// Re-export main types for library consumers
pub use chat::ChatService;
pub use client::ChatClient;
pub use config::Config;
pub use error::{ChatError, ChatResult, ErrorCategory, ValidationError};
pub use identity::{conversation_key, ConversationKey, ParticipantId};
pub use model::{Conversation, DeleteOutcome, Message, MessageId};
pub use session::Session;
pub use sync::{LiveEvent, Subscription, SubscriptionState};
