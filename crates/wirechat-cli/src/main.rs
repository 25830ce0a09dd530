//! Wirechat CLI
//!
//! Thin command-line client around wirechat-core for manual testing
//! against a chat server.
//!
//! ## Usage
//!
//! ```bash
//! # Interactive chat session as user u1, talking to u2
//! wirechat chat --server ws://localhost:8000/ws --user u1 --peer u2
//!
//! # Connect and print every engine event without sending anything
//! wirechat watch --server ws://localhost:8000/ws --user u1
//! ```
//!
//! Inside `chat`, plain lines are sent to the current peer. Commands:
//!
//! - `/to <user>` switch the current peer
//! - `/typing` flash a typing indicator to the current peer
//! - `/history` print the conversation with the current peer
//! - `/quit` close the session and exit

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio::io::AsyncBufReadExt;
use tracing::debug;
use wirechat_core::{ChatEngine, ConversationId};

/// Wirechat - real-time chat session engine
#[derive(Parser)]
#[command(name = "wirechat")]
#[command(version = "0.1.0")]
#[command(about = "Wirechat - real-time chat client engine")]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive chat session
    Chat {
        /// WebSocket server URL
        #[arg(short, long, default_value = "ws://127.0.0.1:8000/ws")]
        server: String,

        /// User id to authenticate as
        #[arg(short, long)]
        user: String,

        /// Peer to send messages to
        #[arg(short, long)]
        peer: Option<String>,
    },

    /// Connect and print engine events without sending
    Watch {
        /// WebSocket server URL
        #[arg(short, long, default_value = "ws://127.0.0.1:8000/ws")]
        server: String,

        /// User id to authenticate as
        #[arg(short, long)]
        user: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();

    match cli.command {
        Commands::Chat { server, user, peer } => run_chat(&server, &user, peer).await,
        Commands::Watch { server, user } => run_watch(&server, &user).await,
    }
}

/// Spawn printers for every event channel.
fn spawn_event_printers(engine: &Arc<ChatEngine>) {
    let mut messages = engine.subscribe_messages();
    tokio::spawn(async move {
        while let Ok(event) = messages.recv().await {
            let marker = if event.message.is_pending() { "…" } else { "✓" };
            println!(
                "[{}] {} {}: {}",
                event.conversation_id, marker, event.message.sender_id, event.message.content
            );
        }
    });

    let mut presence = engine.subscribe_presence();
    tokio::spawn(async move {
        while let Ok(snapshot) = presence.recv().await {
            let mut online: Vec<_> = snapshot.online.iter().map(|u| u.as_str()).collect();
            online.sort_unstable();
            println!("-- online: {}", online.join(", "));
        }
    });

    let mut typing = engine.subscribe_typing();
    tokio::spawn(async move {
        while let Ok(snapshot) = typing.recv().await {
            for (convo, users) in &snapshot.typing {
                for user in users {
                    println!("-- {user} is typing in {convo}");
                }
            }
        }
    });

    let mut receipts = engine.subscribe_receipts();
    tokio::spawn(async move {
        while let Ok(receipt) = receipts.recv().await {
            println!("-- {:?} by {} for message {}", receipt.kind, receipt.user_id, receipt.message_id);
        }
    });

    let mut errors = engine.subscribe_server_errors();
    tokio::spawn(async move {
        while let Ok(message) = errors.recv().await {
            eprintln!("!! server error: {message}");
        }
    });

    let mut connection = engine.subscribe_connection();
    tokio::spawn(async move {
        loop {
            let state = *connection.borrow_and_update();
            println!("-- connection: {state}");
            if connection.changed().await.is_err() {
                break;
            }
        }
    });
}

async fn run_watch(server: &str, user: &str) -> Result<()> {
    let engine = Arc::new(ChatEngine::websocket());
    spawn_event_printers(&engine);

    engine.connect(server, user).await?;
    println!("Connected as {user}. Ctrl-C to exit.");

    tokio::signal::ctrl_c().await?;
    engine.teardown();
    Ok(())
}

async fn run_chat(server: &str, user: &str, peer: Option<String>) -> Result<()> {
    let engine = Arc::new(ChatEngine::websocket());
    spawn_event_printers(&engine);

    engine.connect(server, user).await?;
    println!("Connected as {user}.");

    let mut current_peer = peer;
    match &current_peer {
        Some(p) => println!("Sending to {p}. /to <user> to switch, /quit to exit."),
        None => println!("No peer selected. /to <user> to pick one."),
    }

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }

        if let Some(rest) = line.strip_prefix("/to ") {
            current_peer = Some(rest.trim().to_string());
            println!("Now sending to {}", rest.trim());
            continue;
        }

        match line.as_str() {
            "/quit" => break,
            "/typing" => {
                if let Some(ref p) = current_peer {
                    if let Err(e) = engine.send_typing(&ConversationId::new(p.clone()), true).await {
                        eprintln!("!! typing failed: {e}");
                    }
                }
            }
            "/history" => {
                if let Some(ref p) = current_peer {
                    for msg in engine.conversation(&ConversationId::new(p.clone())) {
                        println!("  {}: {}", msg.sender_id, msg.content);
                    }
                }
            }
            _ => {
                let Some(ref p) = current_peer else {
                    eprintln!("!! no peer selected, use /to <user>");
                    continue;
                };
                debug!(peer = %p, "Sending message");
                match engine.send_message(&ConversationId::new(p.clone()), &line).await {
                    Ok(sent) => debug!(message_id = %sent.id, "Sent"),
                    Err(e) => {
                        // A failed send keeps the typed content in the error
                        // so the user can retry it.
                        eprintln!("!! send failed: {e}");
                        if let Some(content) = e.retry_content() {
                            eprintln!("!! not delivered: {content}");
                        }
                    }
                }
            }
        }
    }

    engine.teardown();
    println!("Bye.");
    Ok(())
}
