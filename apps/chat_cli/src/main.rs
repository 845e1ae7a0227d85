use std::{collections::HashSet, path::PathBuf, sync::Arc};

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use message_sync::{
    config::{load_settings_from, DEFAULT_SETTINGS_FILE},
    ConversationSnapshot, ConversationSync, HttpPersistenceApi, SyncEvent, WsTransport,
};
use shared::domain::{ConversationDescriptor, ConversationKind, MessageId, UserId};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::broadcast::error::RecvError,
};
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
struct Args {
    /// Overrides `server_url` from the settings file.
    #[arg(long)]
    server_url: Option<String>,
    /// Leave unset for a guest session; `/whoami <id>` resolves it later.
    #[arg(long)]
    user_id: Option<String>,
    #[arg(long, required_unless_present = "subscription_id", conflicts_with = "subscription_id")]
    match_id: Option<String>,
    #[arg(long)]
    subscription_id: Option<String>,
    #[arg(long)]
    peer_id: String,
    /// Extra conversation keys the server may address this chat by.
    #[arg(long = "alias")]
    aliases: Vec<String>,
    #[arg(long, default_value = DEFAULT_SETTINGS_FILE)]
    config: PathBuf,
}

impl Args {
    fn conversation(&self) -> Result<ConversationDescriptor> {
        let (kind, id) = match (&self.match_id, &self.subscription_id) {
            (Some(id), _) => (ConversationKind::Match, id.clone()),
            (None, Some(id)) => (ConversationKind::Subscription, id.clone()),
            (None, None) => return Err(anyhow!("one of --match-id or --subscription-id is required")),
        };
        let conversation = self
            .aliases
            .iter()
            .fold(ConversationDescriptor::new(kind, id, self.peer_id.clone()), |desc, alias| {
                desc.with_alias(alias.clone())
            });
        Ok(conversation)
    }
}

#[derive(Default)]
struct Printer {
    printed: HashSet<MessageId>,
    seen: Option<MessageId>,
    other_typing: bool,
}

impl Printer {
    fn render(&mut self, snapshot: &ConversationSnapshot) {
        for message in snapshot.messages.iter().filter(|m| !m.pending) {
            if !self.printed.insert(message.id.clone()) {
                continue;
            }
            let attachments = if message.attachments.is_empty() {
                String::new()
            } else {
                format!(" [{} attachment(s)]", message.attachments.len())
            };
            println!(
                "[{}] {}: {}{attachments}",
                message.timestamp.format("%H:%M:%S"),
                message.sender_id,
                message.content
            );
        }
        if snapshot.seen_message_id != self.seen {
            if let Some(seen) = &snapshot.seen_message_id {
                println!("  (seen up to {seen})");
            }
            self.seen = snapshot.seen_message_id.clone();
        }
        if snapshot.other_typing != self.other_typing {
            if snapshot.other_typing {
                println!("  ...typing");
            }
            self.other_typing = snapshot.other_typing;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let args = Args::parse();

    let conversation = args.conversation()?;
    let mut settings = load_settings_from(&args.config, |key| std::env::var(key).ok());
    if let Some(server_url) = &args.server_url {
        settings.server_url = server_url.clone();
    }

    let api_base = format!("{}/api/", settings.server_url.trim_end_matches('/'));
    let persistence = Arc::new(HttpPersistenceApi::new(&api_base)?);
    let socket_url = WsTransport::socket_url(&settings.server_url)?;
    let (transport, events, socket_task) = WsTransport::spawn(socket_url, &settings);

    let sync = ConversationSync::new_with_dependencies(
        conversation,
        settings,
        args.user_id.clone().map(UserId::new),
        transport,
        persistence,
    );
    let pump = sync.spawn_pump(events);

    let mut updates = sync.subscribe();
    let printer_task = tokio::spawn(async move {
        let mut printer = Printer::default();
        loop {
            match updates.recv().await {
                Ok(SyncEvent::Updated(snapshot)) => printer.render(&snapshot),
                Ok(SyncEvent::SendFailed { temp_id, error }) => {
                    eprintln!("message {temp_id} was not delivered: {error}")
                }
                Ok(SyncEvent::Error(message)) => eprintln!("error: {message}"),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "chat: dropped stale updates"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    if let Err(err) = sync.load_history().await {
        warn!("chat: initial history load failed: {err}");
    }
    sync.set_scrolled_to_bottom(true).await;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("failed to read stdin")? {
        let line = line.trim();
        if line == "/quit" {
            break;
        }
        if let Some(user_id) = line.strip_prefix("/whoami ") {
            sync.resolve_identity(UserId::from(user_id.trim())).await;
            continue;
        }
        if line.is_empty() {
            continue;
        }
        sync.on_input_changed(line).await;
        if let Err(err) = sync.send(line, Vec::new()).await {
            eprintln!("send failed: {err}");
        }
    }

    socket_task.abort();
    pump.abort();
    printer_task.abort();
    Ok(())
}
