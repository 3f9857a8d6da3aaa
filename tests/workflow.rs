use std::time::Duration;

use anyhow::{anyhow, Result};
use pingme::{
    storage, ChatClient, ChatError, Config, DeleteOutcome, LiveEvent, ParticipantId,
    ValidationError,
};
use tempfile::TempDir;
use tokio::sync::mpsc::unbounded_channel;
use tokio::time::{sleep, timeout};

fn reserve_port() -> std::io::Result<u16> {
    let listener = std::net::TcpListener::bind(("127.0.0.1", 0))?;
    let port = listener.local_addr()?.port();
    drop(listener);
    Ok(port)
}

fn client(port: u16, principal: Option<&str>) -> Result<ChatClient> {
    let principal = principal.map(ParticipantId::new).transpose()?;
    Ok(ChatClient::new(&format!("http://127.0.0.1:{port}"), principal)?)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn init_serve_chat_workflow() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let config_path = storage::init(temp_dir.path()).await?;

    let mut config = Config::from_toml_str(&tokio::fs::read_to_string(&config_path).await?)?;
    assert!(config.storage.path.exists());
    let port = reserve_port()?;
    config.server.port = port;

    let server_handle = tokio::spawn(async move {
        let _ = pingme::server::start(&config).await;
    });

    let alice = client(port, Some("alice@x.com"))?;
    let bob = client(port, Some("bob@x.com"))?;

    timeout(Duration::from_secs(5), async {
        while alice.health().await.is_err() {
            sleep(Duration::from_millis(25)).await;
        }
    })
    .await?;

    // Both sides land on the same conversation.
    let opened = alice.start_conversation("bob@x.com").await?;
    let reopened = bob.start_conversation("alice@x.com").await?;
    assert_eq!(opened.key, reopened.key);
    assert_eq!(opened.key.as_str(), "alice@x.com_bob@x.com");

    let (tx, mut rx) = unbounded_channel();
    let watch_handle = bob
        .watch(&opened.key, move |event| {
            let _ = tx.send(event);
        })
        .await?;

    alice.send(&opened.key, "hi").await?;
    bob.send(&opened.key, "hello").await?;

    let latest = timeout(Duration::from_secs(5), async {
        loop {
            match rx.recv().await {
                Some(LiveEvent::Snapshot(messages)) if messages.len() == 2 => break Ok(messages),
                Some(LiveEvent::Snapshot(_)) => continue,
                Some(LiveEvent::Error(err)) => break Err(anyhow!("live error: {err}")),
                None => break Err(anyhow!("live channel closed")),
            }
        }
    })
    .await??;
    let bodies: Vec<_> = latest.iter().map(|m| m.body.as_str()).collect();
    assert_eq!(bodies, ["hi", "hello"]);

    let history = alice.history(&opened.key).await?;
    assert_eq!(history, latest);
    assert_eq!(alice.conversations().await?.len(), 1);

    let outcome = alice.delete(&opened.key).await?;
    assert!(matches!(outcome, DeleteOutcome::Deleted { messages: 2, .. }));
    assert_eq!(alice.delete(&opened.key).await?, DeleteOutcome::NotFound);
    assert!(alice.conversations().await?.is_empty());

    let late = bob.send(&opened.key, "anyone?").await;
    assert!(matches!(late, Err(ChatError::NotFound(_))));

    watch_handle.abort();
    server_handle.abort();
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn remote_errors_keep_their_category() -> Result<()> {
    let port = reserve_port()?;
    let mut config = Config::in_memory();
    config.server.port = port;

    let server_handle = tokio::spawn(async move {
        let _ = pingme::server::start(&config).await;
    });

    let alice = client(port, Some("alice@x.com"))?;
    timeout(Duration::from_secs(5), async {
        while alice.health().await.is_err() {
            sleep(Duration::from_millis(25)).await;
        }
    })
    .await?;

    let result = alice.start_conversation("Alice@X.com").await;
    assert!(matches!(
        result,
        Err(ChatError::Validation(ValidationError::SelfConversation))
    ));

    let result = alice.start_conversation("not-an-email").await;
    assert!(matches!(
        result,
        Err(ChatError::Validation(ValidationError::MalformedCounterpart(_)))
    ));

    let conversation = alice.start_conversation("bob@x.com").await?;
    let result = alice.send(&conversation.key, "   ").await;
    assert!(matches!(
        result,
        Err(ChatError::Validation(ValidationError::EmptyBody))
    ));

    let anonymous = client(port, None)?;
    let result = anonymous.send(&conversation.key, "hi").await;
    assert!(matches!(
        result,
        Err(ChatError::Validation(ValidationError::MissingSender))
    ));

    // Nothing listening: transport failures are retryable.
    let closed = client(reserve_port()?, Some("alice@x.com"))?;
    let err = closed.history(&conversation.key).await.unwrap_err();
    assert!(err.is_retryable());

    server_handle.abort();
    Ok(())
}
