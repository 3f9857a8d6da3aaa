//! Live query subscriptions
//!
//! A subscription delivers the complete, freshly ordered result set of its
//! query: once on registration, then after every committed change that
//! touches it. Listeners never see deltas, so a lagged change channel only
//! costs an extra re-read.
//!
//! A failed re-read is delivered as [`LiveEvent::Error`] and the
//! subscription stays active; the next change triggers another read. The
//! subscription task holds a change receiver and the database, never a
//! sender, so it closes once every store handle publishing to the hub has
//! been dropped.
//!
//! Listeners run under the subscription's delivery lock and must be fast
//! and non-blocking. Hand work off to a channel, as the WebSocket route does.

use std::cell::Cell;
use std::future::Future;
use std::sync::Arc;

use parking_lot::{Mutex, ReentrantMutex};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{ChangeEvent, ChangeHub};
use crate::error::{ChatError, ChatResult, ErrorCategory};
use crate::identity::{ConversationKey, ParticipantId};
use crate::model::{Conversation, Message};
use crate::storage::Database;

/// What a listener receives.
#[derive(Debug, Clone)]
pub enum LiveEvent<T> {
    Snapshot(Vec<T>),
    Error(ChatError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Active,
    Cancelled,
    Closed,
}

/// JSON frame carried over the WebSocket route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LiveFrame {
    Snapshot {
        messages: Vec<Message>,
    },
    Error {
        category: ErrorCategory,
        message: String,
    },
}

impl From<LiveEvent<Message>> for LiveFrame {
    fn from(event: LiveEvent<Message>) -> Self {
        match event {
            LiveEvent::Snapshot(messages) => LiveFrame::Snapshot { messages },
            LiveEvent::Error(err) => LiveFrame::Error {
                category: err.category(),
                message: err.to_string(),
            },
        }
    }
}

impl From<LiveFrame> for LiveEvent<Message> {
    fn from(frame: LiveFrame) -> Self {
        match frame {
            LiveFrame::Snapshot { messages } => LiveEvent::Snapshot(messages),
            LiveFrame::Error { message, .. } => LiveEvent::Error(ChatError::Transport(message)),
        }
    }
}

struct Shared {
    // Held while a listener runs. Reentrant so a listener may cancel itself.
    state: ReentrantMutex<Cell<SubscriptionState>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Shared {
    fn new() -> Self {
        Self {
            state: ReentrantMutex::new(Cell::new(SubscriptionState::Active)),
            task: Mutex::new(None),
        }
    }

    fn state(&self) -> SubscriptionState {
        self.state.lock().get()
    }

    fn deliver<T, L>(&self, listener: &L, result: ChatResult<Vec<T>>)
    where
        L: Fn(LiveEvent<T>),
    {
        let state = self.state.lock();
        if state.get() != SubscriptionState::Active {
            return;
        }

        let event = match result {
            Ok(items) => LiveEvent::Snapshot(items),
            Err(err) => {
                warn!(error = %err, "live query refresh failed");
                LiveEvent::Error(err)
            }
        };
        listener(event);
    }

    fn transition(&self, to: SubscriptionState) {
        let state = self.state.lock();
        if state.get() == SubscriptionState::Active {
            state.set(to);
        }
    }
}

/// Handle to a registered listener. Dropping it cancels the subscription.
pub struct Subscription {
    shared: Arc<Shared>,
}

impl Subscription {
    pub fn state(&self) -> SubscriptionState {
        self.shared.state()
    }

    pub fn is_active(&self) -> bool {
        self.state() == SubscriptionState::Active
    }

    /// Stop deliveries. Safe to call any number of times. Once this returns
    /// the listener is not invoked again; a delivery already running on
    /// another thread finishes first, which blocks the calling thread for
    /// as long as that listener takes.
    pub fn cancel(&self) {
        self.shared.transition(SubscriptionState::Cancelled);
        if let Some(handle) = self.shared.task.lock().take() {
            handle.abort();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("state", &self.state())
            .finish()
    }
}

fn spawn_query<T, P, F, Fut, L>(hub: &ChangeHub, relevant: P, fetch: F, listener: L) -> Subscription
where
    T: Send + 'static,
    P: Fn(&ChangeEvent) -> bool + Send + Sync + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ChatResult<Vec<T>>> + Send + 'static,
    L: Fn(LiveEvent<T>) + Send + Sync + 'static,
{
    let shared = Arc::new(Shared::new());
    // Subscribe before the first read so no change slips between them.
    let mut changes = hub.subscribe();
    let worker = shared.clone();

    let handle = tokio::spawn(async move {
        worker.deliver(&listener, fetch().await);

        loop {
            match changes.recv().await {
                Ok(event) if relevant(event.as_ref()) => {}
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped, "live query lagged, refreshing");
                }
                Err(RecvError::Closed) => {
                    worker.transition(SubscriptionState::Closed);
                    break;
                }
            }

            if worker.state() != SubscriptionState::Active {
                break;
            }
            worker.deliver(&listener, fetch().await);
        }
    });

    if shared.state() == SubscriptionState::Active {
        *shared.task.lock() = Some(handle);
    } else {
        handle.abort();
    }

    Subscription { shared }
}

/// Registers live queries against the database.
#[derive(Clone)]
pub struct LiveQueries {
    hub: ChangeHub,
    db: Arc<Database>,
}

impl LiveQueries {
    pub fn new(hub: ChangeHub, db: Arc<Database>) -> Self {
        Self { hub, db }
    }

    /// Ordered messages of one conversation. Deleting the conversation
    /// produces a final empty snapshot.
    pub fn watch_messages<L>(&self, key: &ConversationKey, listener: L) -> Subscription
    where
        L: Fn(LiveEvent<Message>) + Send + Sync + 'static,
    {
        debug!(%key, "watching messages");
        let watched = key.clone();
        let key = key.clone();
        let db = self.db.clone();

        spawn_query(
            &self.hub,
            move |event| event.key() == &watched,
            move || {
                let db = db.clone();
                let key = key.clone();
                async move { tokio::task::spawn_blocking(move || db.list_messages(&key)).await? }
            },
            listener,
        )
    }

    /// Conversations a participant belongs to.
    pub fn watch_conversations<L>(&self, participant: &ParticipantId, listener: L) -> Subscription
    where
        L: Fn(LiveEvent<Conversation>) + Send + Sync + 'static,
    {
        debug!(%participant, "watching conversations");
        let watched = participant.clone();
        let participant = participant.clone();
        let db = self.db.clone();

        spawn_query(
            &self.hub,
            move |event| event.touches_participant(&watched),
            move || {
                let db = db.clone();
                let participant = participant.clone();
                async move {
                    tokio::task::spawn_blocking(move || db.conversations_for(&participant)).await?
                }
            },
            listener,
        )
    }
}
