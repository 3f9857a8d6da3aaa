use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use pingme::storage::Database;
use pingme::sync::{ChangeEvent, ChangeHub, LiveQueries};
use pingme::{
    ChatError, ChatService, Conversation, ConversationKey, LiveEvent, Message, MessageId,
    ParticipantId, Session, SubscriptionState,
};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use tokio::time::{sleep, timeout};

fn signed_in(raw: &str) -> Session {
    Session::signed_in(ParticipantId::new(raw).unwrap())
}

async fn next_snapshot<T>(rx: &mut UnboundedReceiver<LiveEvent<T>>) -> Result<Vec<T>> {
    let event = timeout(Duration::from_secs(5), rx.recv())
        .await?
        .ok_or_else(|| anyhow!("subscription channel closed"))?;
    match event {
        LiveEvent::Snapshot(items) => Ok(items),
        LiveEvent::Error(err) => Err(anyhow!("unexpected error event: {err}")),
    }
}

fn bodies(messages: &[Message]) -> Vec<&str> {
    messages.iter().map(|m| m.body.as_str()).collect()
}

async fn setup() -> Result<(ChatService, Session, Session, ConversationKey)> {
    let chat = ChatService::in_memory()?;
    let alice = signed_in("alice@x.com");
    let bob = signed_in("bob@x.com");
    let conversation = chat.start_conversation(&alice, "bob@x.com").await?;
    Ok((chat, alice, bob, conversation.key))
}

#[tokio::test]
async fn initial_snapshot_then_full_set_on_every_append() -> Result<()> {
    let (chat, alice, bob, key) = setup().await?;
    let (tx, mut rx) = unbounded_channel();
    let _subscription = chat.watch_messages(&key, move |event| {
        let _ = tx.send(event);
    });

    assert!(next_snapshot(&mut rx).await?.is_empty());

    chat.send(&alice, &key, "hi").await?;
    assert_eq!(bodies(&next_snapshot(&mut rx).await?), ["hi"]);

    chat.send(&bob, &key, "hello").await?;
    assert_eq!(bodies(&next_snapshot(&mut rx).await?), ["hi", "hello"]);
    Ok(())
}

#[tokio::test]
async fn delete_delivers_a_final_empty_snapshot() -> Result<()> {
    let (chat, alice, bob, key) = setup().await?;
    chat.send(&alice, &key, "one").await?;
    chat.send(&bob, &key, "two").await?;

    let (tx, mut rx) = unbounded_channel();
    let subscription = chat.watch_messages(&key, move |event| {
        let _ = tx.send(event);
    });
    assert_eq!(next_snapshot(&mut rx).await?.len(), 2);

    chat.delete(&key).await?;
    assert!(next_snapshot(&mut rx).await?.is_empty());
    assert_eq!(subscription.state(), SubscriptionState::Active);
    Ok(())
}

#[tokio::test]
async fn other_conversations_do_not_notify() -> Result<()> {
    let (chat, alice, _, key) = setup().await?;
    let other = chat.start_conversation(&alice, "carol@x.com").await?;

    let (tx, mut rx) = unbounded_channel();
    let _subscription = chat.watch_messages(&key, move |event| {
        let _ = tx.send(event);
    });
    next_snapshot(&mut rx).await?;

    chat.send(&alice, &other.key, "to carol").await?;
    chat.send(&alice, &key, "to bob").await?;

    // The first notification after the unrelated write is for our key.
    assert_eq!(bodies(&next_snapshot(&mut rx).await?), ["to bob"]);
    Ok(())
}

#[tokio::test]
async fn cancel_is_idempotent_and_final() -> Result<()> {
    let (chat, alice, _, key) = setup().await?;
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();

    let subscription = chat.watch_messages(&key, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    timeout(Duration::from_secs(5), async {
        while calls.load(Ordering::SeqCst) == 0 {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await?;

    subscription.cancel();
    subscription.cancel();
    assert_eq!(subscription.state(), SubscriptionState::Cancelled);

    let seen = calls.load(Ordering::SeqCst);
    chat.send(&alice, &key, "after cancel").await?;
    sleep(Duration::from_millis(100)).await;
    assert_eq!(calls.load(Ordering::SeqCst), seen);
    Ok(())
}

#[tokio::test]
async fn listener_may_cancel_itself() -> Result<()> {
    let (chat, alice, _, key) = setup().await?;
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let slot: Arc<parking_lot::Mutex<Option<pingme::Subscription>>> = Default::default();
    let inner = slot.clone();

    let subscription = chat.watch_messages(&key, move |event| {
        if let LiveEvent::Snapshot(messages) = event {
            counter.fetch_add(1, Ordering::SeqCst);
            if !messages.is_empty() {
                if let Some(subscription) = inner.lock().as_ref() {
                    subscription.cancel();
                }
            }
        }
    });
    *slot.lock() = Some(subscription);

    sleep(Duration::from_millis(50)).await;
    chat.send(&alice, &key, "first").await?;
    sleep(Duration::from_millis(100)).await;
    chat.send(&alice, &key, "second").await?;
    sleep(Duration::from_millis(100)).await;

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    let state = slot.lock().as_ref().map(|s| s.state());
    assert_eq!(state, Some(SubscriptionState::Cancelled));
    Ok(())
}

#[tokio::test]
async fn dropping_the_handle_cancels() -> Result<()> {
    let (chat, alice, _, key) = setup().await?;
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();

    let subscription = chat.watch_messages(&key, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    sleep(Duration::from_millis(50)).await;
    drop(subscription);

    let seen = calls.load(Ordering::SeqCst);
    chat.send(&alice, &key, "nobody listening").await?;
    sleep(Duration::from_millis(100)).await;
    assert_eq!(calls.load(Ordering::SeqCst), seen);
    Ok(())
}

#[tokio::test]
async fn conversation_list_follows_creates_and_deletes() -> Result<()> {
    let chat = ChatService::in_memory()?;
    let alice = signed_in("alice@x.com");

    let (tx, mut rx) = unbounded_channel::<LiveEvent<Conversation>>();
    let _subscription = chat.watch_conversations(&alice, move |event| {
        let _ = tx.send(event);
    })?;
    assert!(next_snapshot(&mut rx).await?.is_empty());

    let bob = chat.start_conversation(&alice, "bob@x.com").await?;
    assert_eq!(next_snapshot(&mut rx).await?, vec![bob.clone()]);

    // Reopening an existing conversation changes nothing.
    chat.start_conversation(&alice, "bob@x.com").await?;
    let carol = chat.start_conversation(&alice, "carol@x.com").await?;
    assert_eq!(next_snapshot(&mut rx).await?, vec![bob.clone(), carol.clone()]);

    chat.delete(&bob.key).await?;
    assert_eq!(next_snapshot(&mut rx).await?, vec![carol]);
    Ok(())
}

#[tokio::test]
async fn watching_conversations_requires_a_session() -> Result<()> {
    let chat = ChatService::in_memory()?;
    let result = chat.watch_conversations(&Session::signed_out(), |_| {});
    assert!(result.is_err());
    Ok(())
}

#[tokio::test]
async fn failed_refresh_is_reported_and_the_next_change_retries() -> Result<()> {
    let db = Database::in_memory()?;
    db.initialize()?;
    let db = Arc::new(db);
    let hub = ChangeHub::default();
    let live = LiveQueries::new(hub.clone(), db.clone());
    let key = ConversationKey::parse("alice_bob")?;
    let changed = || ChangeEvent::MessageAppended {
        key: key.clone(),
        id: MessageId(1),
    };

    let (tx, mut rx) = unbounded_channel();
    let subscription = live.watch_messages(&key, move |event| {
        let _ = tx.send(event);
    });
    assert!(next_snapshot(&mut rx).await?.is_empty());

    db.conn
        .lock()
        .execute_batch("ALTER TABLE messages RENAME TO messages_offline")?;
    hub.publish(changed());

    let event = timeout(Duration::from_secs(5), rx.recv())
        .await?
        .ok_or_else(|| anyhow!("subscription channel closed"))?;
    assert!(matches!(event, LiveEvent::Error(ChatError::Transport(_))));
    assert_eq!(subscription.state(), SubscriptionState::Active);

    db.conn
        .lock()
        .execute_batch("ALTER TABLE messages_offline RENAME TO messages")?;
    hub.publish(changed());
    assert!(next_snapshot(&mut rx).await?.is_empty());
    assert_eq!(subscription.state(), SubscriptionState::Active);
    Ok(())
}

#[tokio::test]
async fn subscription_closes_once_the_service_is_gone() -> Result<()> {
    let (chat, _, _, key) = setup().await?;
    let (tx, mut rx) = unbounded_channel();
    let subscription = chat.watch_messages(&key, move |event| {
        let _ = tx.send(event);
    });
    next_snapshot(&mut rx).await?;

    drop(chat);

    timeout(Duration::from_secs(5), async {
        while subscription.is_active() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await?;
    assert_eq!(subscription.state(), SubscriptionState::Closed);

    // The finished task releases the listener.
    assert!(timeout(Duration::from_secs(5), rx.recv()).await?.is_none());

    subscription.cancel();
    assert_eq!(subscription.state(), SubscriptionState::Closed);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancel_waits_for_a_delivery_in_flight() -> Result<()> {
    let (chat, alice, _, key) = setup().await?;
    let started = Arc::new(AtomicBool::new(false));
    let finished = Arc::new(AtomicBool::new(false));
    let (on_start, on_finish) = (started.clone(), finished.clone());

    let subscription = chat.watch_messages(&key, move |event| {
        if let LiveEvent::Snapshot(messages) = event {
            if !messages.is_empty() {
                on_start.store(true, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(200));
                on_finish.store(true, Ordering::SeqCst);
            }
        }
    });

    chat.send(&alice, &key, "slow").await?;
    timeout(Duration::from_secs(5), async {
        while !started.load(Ordering::SeqCst) {
            sleep(Duration::from_millis(1)).await;
        }
    })
    .await?;

    subscription.cancel();
    assert!(finished.load(Ordering::SeqCst));
    assert_eq!(subscription.state(), SubscriptionState::Cancelled);
    Ok(())
}
