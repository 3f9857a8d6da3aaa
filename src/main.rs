use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::*;
use std::path::PathBuf;

use pingme::error::{with_retry, RetryPolicy};
use pingme::model::{Conversation, Message};
use pingme::{conversation_key, server, storage, telemetry};
use pingme::{ChatClient, Config, ConversationKey, DeleteOutcome, LiveEvent, ParticipantId};

#[derive(Parser)]
#[command(name = "pingme")]
#[command(about = "Two-party chat: canonical conversation keys, an append-only message log and live subscriptions", version)]
#[command(after_help = "Remote commands talk to a running `pingme serve` instance.
The principal passed with --as is trusted as already authenticated by the identity provider.")]
struct Cli {
    /// Config file (defaults to ./pingme.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct Remote {
    /// Server base URL
    #[arg(long, default_value = "http://127.0.0.1:3000")]
    server: String,

    /// Authenticated principal to act as
    #[arg(long = "as", value_name = "PRINCIPAL")]
    principal: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database and a default config file
    Init {
        #[arg(short, long, default_value = ".")]
        path: PathBuf,
    },

    /// Start the chat server
    Serve {
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Print the canonical conversation key for two participants
    Key { a: String, b: String },

    /// Start (or reopen) a conversation with a counterpart
    Start {
        counterpart: String,

        #[command(flatten)]
        remote: Remote,
    },

    /// Send a message
    Send {
        key: String,
        body: String,

        #[command(flatten)]
        remote: Remote,
    },

    /// Show the ordered message history of a conversation
    History {
        key: String,

        #[command(flatten)]
        remote: Remote,
    },

    /// List your conversations
    List {
        #[command(flatten)]
        remote: Remote,
    },

    /// Delete a conversation and all of its messages
    Delete {
        key: String,

        #[command(flatten)]
        remote: Remote,
    },

    /// Follow a conversation live
    Watch {
        key: String,

        #[command(flatten)]
        remote: Remote,
    },
}

impl Remote {
    fn client(&self) -> Result<ChatClient> {
        let principal = self
            .principal
            .as_deref()
            .map(ParticipantId::new)
            .transpose()?;
        Ok(ChatClient::new(&self.server, principal)?)
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref()).context("loading configuration")?;
    let _log_guard = telemetry::init(&config.logging)?;
    let policy = RetryPolicy::default();

    match cli.command {
        Commands::Init { path } => {
            println!("{}", "🚀 Initializing PingMe store...".cyan().bold());
            let config_path = storage::init(&path).await?;
            println!("{}", "✓ Store initialized successfully!".green());
            println!("  Config: {}", config_path.display().to_string().bright_white());
            println!("\n{}", "Next steps:".yellow());
            println!("  1. {} - Start the server", "pingme serve".bright_white());
            println!(
                "  2. {} - Open a conversation",
                "pingme start <email> --as <you>".bright_white()
            );
        }

        Commands::Serve { port } => {
            if let Some(port) = port {
                config.server.port = port;
            }
            println!(
                "{} Server running at {}",
                "✓".green(),
                format!("http://{}", config.bind_addr()).bright_blue()
            );
            server::start(&config).await?;
        }

        Commands::Key { a, b } => {
            println!("{}", conversation_key(&a, &b));
        }

        Commands::Start {
            counterpart,
            remote,
        } => {
            let client = remote.client()?;
            let conversation =
                with_retry(&policy, || client.start_conversation(&counterpart)).await?;
            print_conversation(&conversation, client.principal());
        }

        Commands::Send { key, body, remote } => {
            let client = remote.client()?;
            let key = ConversationKey::parse(key)?;
            // Not retried: a blind resend can duplicate the message.
            let message = client.send(&key, &body).await?;
            println!(
                "{} Sent {}",
                "✓".green(),
                format!("#{}", message.id.0).bright_black()
            );
        }

        Commands::History { key, remote } => {
            let client = remote.client()?;
            let key = ConversationKey::parse(key)?;
            let messages = with_retry(&policy, || client.history(&key)).await?;

            println!("{}", format!("Conversation {}", key).cyan().bold());
            println!("{}", "═".repeat(80).bright_black());
            for message in &messages {
                print_message(message, client.principal());
            }
        }

        Commands::List { remote } => {
            let client = remote.client()?;
            let conversations = with_retry(&policy, || client.conversations()).await?;
            if conversations.is_empty() {
                println!("{}", "No conversations yet".bright_black());
            }
            for conversation in &conversations {
                print_conversation(conversation, client.principal());
            }
        }

        Commands::Delete { key, remote } => {
            let client = remote.client()?;
            let key = ConversationKey::parse(key)?;
            match with_retry(&policy, || client.delete(&key)).await? {
                DeleteOutcome::Deleted { messages, .. } => println!(
                    "{} Deleted {} ({} messages)",
                    "✓".green(),
                    key.to_string().bright_white(),
                    messages
                ),
                DeleteOutcome::NotFound => println!(
                    "{} Nothing to delete for {}",
                    "•".bright_black(),
                    key.to_string().bright_white()
                ),
            }
        }

        Commands::Watch { key, remote } => {
            let client = remote.client()?;
            let key = ConversationKey::parse(key)?;
            let me = client.principal().cloned();

            // A watch is long-lived, so wait out a server that is still starting.
            with_retry(&RetryPolicy::aggressive(), || client.health()).await?;

            println!("{}", format!("👁  Watching {}...", key).cyan().bold());
            let handle = client
                .watch(&key, move |event| match event {
                    LiveEvent::Snapshot(messages) => {
                        println!("{}", "─".repeat(80).bright_black());
                        for message in &messages {
                            print_message(message, me.as_ref());
                        }
                    }
                    LiveEvent::Error(err) => {
                        eprintln!("{} {}", "⚠️".yellow(), err);
                    }
                })
                .await?;

            tokio::select! {
                _ = handle => {}
                _ = tokio::signal::ctrl_c() => {}
            }
        }
    }

    Ok(())
}

fn print_conversation(conversation: &Conversation, me: Option<&ParticipantId>) {
    let with = me
        .and_then(|me| conversation.counterpart(me))
        .map(|p| p.to_string())
        .unwrap_or_else(|| {
            format!(
                "{} & {}",
                conversation.participants[0], conversation.participants[1]
            )
        });

    println!(
        "{} {} {}",
        format!("[{}]", conversation.created_at.format("%Y-%m-%d %H:%M:%S")).bright_black(),
        with.bright_white().bold(),
        format!("({})", conversation.key).bright_black()
    );
}

fn print_message(message: &Message, me: Option<&ParticipantId>) {
    let time = message.created_at.format("%Y-%m-%d %H:%M:%S%.3f");
    let sender = if me.is_some_and(|me| message.is_from(me)) {
        message.sender.to_string().green()
    } else {
        message.sender.to_string().bright_yellow()
    };

    println!(
        "{} {} {}",
        format!("[{}]", time).bright_black(),
        sender.bold(),
        message.body
    );
}
