//! docdesk CLI - conversational support messaging

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use docdesk_core::cache::LocalCache;
use docdesk_core::feedback;
use docdesk_core::index::ConversationIndex;
use docdesk_core::links::parse_reply;
use docdesk_core::models::{
    ConversationKey, Message, MessageRole, ParticipantRole, Profile, Rating, Thread,
};
use docdesk_core::reply::HttpReplyGenerator;
use docdesk_core::{ChatStore, ChatWidget, Config};

mod chat;

#[derive(Debug, Parser)]
#[command(
    name = "docdesk",
    author,
    version,
    about = "Support chat for the documentation portal",
    propagate_version = true
)]
struct Cli {
    /// Config file path
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Increase verbosity
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Chat with the documentation assistant
    Chat {
        /// Participant id (omit to chat anonymously)
        #[arg(long = "as", env = "DOCDESK_PARTICIPANT")]
        participant: Option<String>,

        /// Product context for a new session
        #[arg(long)]
        product: Option<String>,
    },

    /// Post to a live support conversation
    Send {
        /// Client whose conversation to post in
        #[arg(long)]
        client: String,

        /// Post as this agent instead of as the client
        #[arg(long)]
        agent: Option<String>,

        /// Message text
        text: String,
    },

    /// List live conversations, newest first
    Inbox {
        /// Case-insensitive filter on name or email
        #[arg(short, long)]
        filter: Option<String>,
    },

    /// Show a live conversation
    Thread {
        /// Client id
        client: String,
    },

    /// Manage participant profiles
    Profile {
        #[command(subcommand)]
        command: ProfileCommand,
    },

    /// Parse a bot reply into clean text and navigation targets
    Links {
        /// Reply text
        text: String,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Close an assistant session
    Close {
        /// Session ID
        session: String,

        /// Record the session as not resolved
        #[arg(long)]
        unresolved: bool,
    },

    /// Rate an assistant session
    Feedback {
        /// Session ID
        session: String,

        /// Participant submitting the rating
        #[arg(long = "as")]
        participant: String,

        /// good or bad
        rating: String,

        /// Optional comment
        comment: Option<String>,
    },

    /// Show database statistics
    Stats,
}

#[derive(Debug, Subcommand)]
enum ProfileCommand {
    /// Add or update a profile
    Add {
        /// Participant id
        id: String,

        /// Display name
        #[arg(long)]
        name: Option<String>,

        /// Email address
        #[arg(long)]
        email: Option<String>,

        /// admin or client
        #[arg(long, default_value = "client")]
        role: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let level = match cli.verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    // Load config
    let config_path = cli.config.unwrap_or_else(Config::default_config_path);
    let config = Config::ensure_at(&config_path)?;

    let store = ChatStore::open(&config).await?;

    match cli.command {
        Command::Chat {
            participant,
            product,
        } => cmd_chat(&store, &config, participant, product).await,
        Command::Send {
            client,
            agent,
            text,
        } => cmd_send(&store, &client, agent, &text).await,
        Command::Inbox { filter } => cmd_inbox(&store, filter.as_deref()).await,
        Command::Thread { client } => cmd_thread(&store, &client).await,
        Command::Profile { command } => cmd_profile(&store, command).await,
        Command::Links { text, json } => cmd_links(&text, json),
        Command::Close {
            session,
            unresolved,
        } => cmd_close(&store, &session, unresolved).await,
        Command::Feedback {
            session,
            participant,
            rating,
            comment,
        } => cmd_feedback(&store, &session, &participant, &rating, comment).await,
        Command::Stats => cmd_stats(&store).await,
    }
}

async fn cmd_chat(
    store: &ChatStore,
    config: &Config,
    participant: Option<String>,
    product: Option<String>,
) -> Result<()> {
    let reply = HttpReplyGenerator::from_config(&config.reply)?;
    if reply.endpoint().is_none() {
        println!("(no reply endpoint configured; set reply.endpoint or DOCDESK_REPLY_ENDPOINT)");
    }
    let widget = ChatWidget::mount(
        store.clone(),
        reply,
        LocalCache::new(config.cache_path.clone()),
        participant.as_deref(),
        product.as_deref(),
        config.chat.clone(),
    )
    .await;
    chat::run(widget).await
}

async fn cmd_send(store: &ChatStore, client: &str, agent: Option<String>, text: &str) -> Result<()> {
    let key = ConversationKey::for_client(client);
    let (role, sender) = match agent.as_deref() {
        Some(agent) => (MessageRole::Agent, agent),
        None => (MessageRole::User, client),
    };
    let msg = Message::new(Thread::Conversation(key), role, text.trim()).with_sender(sender);
    if msg.content.is_empty() {
        anyhow::bail!("message is empty");
    }
    store.post_conversation_message(&msg, sender).await?;
    println!("Posted to {client} as {sender}");
    Ok(())
}

async fn cmd_inbox(store: &ChatStore, filter: Option<&str>) -> Result<()> {
    let mut index = ConversationIndex::new();
    index.refresh(store).await?;

    let rows = index.filter(filter.unwrap_or_default());
    if rows.is_empty() {
        println!("No conversations found.");
        return Ok(());
    }

    for row in rows {
        let email = row
            .email
            .as_ref()
            .map(|email| format!(" <{email}>"))
            .unwrap_or_default();
        println!(
            "{} | {} | {}{} | {}",
            row.key,
            row.last_message_at.format("%Y-%m-%d %H:%M"),
            row.display_name,
            email,
            truncate(&row.last_message, 80)
        );
    }

    Ok(())
}

async fn cmd_thread(store: &ChatStore, client: &str) -> Result<()> {
    let key = ConversationKey::for_client(client);
    let conversation = store
        .get_conversation(&key)
        .await?
        .ok_or_else(|| anyhow::anyhow!("Conversation not found"))?;

    println!("Client: {}", conversation.key);
    println!("Created: {}", conversation.created_at);
    println!();

    for msg in store.conversation_messages(&key).await? {
        println!(
            "--- {} {} ({}) ---",
            msg.role,
            msg.sender_id.as_deref().unwrap_or("-"),
            msg.created_at.format("%Y-%m-%d %H:%M:%S")
        );
        println!("{}", msg.content);
        println!();
    }

    Ok(())
}

async fn cmd_profile(store: &ChatStore, command: ProfileCommand) -> Result<()> {
    match command {
        ProfileCommand::Add {
            id,
            name,
            email,
            role,
        } => {
            let role: ParticipantRole = role.parse()?;
            let profile = Profile {
                id: id.clone(),
                display_name: name,
                email,
                role,
            };
            store.upsert_profile(&profile).await?;
            println!("Saved profile: {id} ({role})");
        }
    }
    Ok(())
}

fn cmd_links(text: &str, json: bool) -> Result<()> {
    let parsed = parse_reply(text);
    if json {
        println!("{}", serde_json::to_string_pretty(&parsed)?);
        return Ok(());
    }

    println!("{}", parsed.clean_text);
    if !parsed.links.is_empty() {
        println!();
    }
    for link in &parsed.links {
        println!("{} [{}] {}", link.display_text, link.kind, link.docs_target());
        if let Some(article) = link.article_target() {
            println!("    article: {article}");
        }
    }
    Ok(())
}

async fn cmd_close(store: &ChatStore, session: &str, unresolved: bool) -> Result<()> {
    let id = uuid::Uuid::parse_str(session)?;
    store.close(id, !unresolved).await?;
    println!("Closed session {id}");
    Ok(())
}

async fn cmd_feedback(
    store: &ChatStore,
    session: &str,
    participant: &str,
    rating: &str,
    comment: Option<String>,
) -> Result<()> {
    let id = uuid::Uuid::parse_str(session)?;
    let rating: Rating = rating.parse()?;
    let recorded = feedback::submit(store, id, participant, rating, comment.as_deref()).await?;
    println!("Recorded {} feedback for session {}", recorded.rating, recorded.session_id);
    Ok(())
}

async fn cmd_stats(store: &ChatStore) -> Result<()> {
    let db = store.db();
    let sessions = db.count_sessions().await?;
    let messages = db.count_messages().await?;
    let conversations = db.count_conversations().await?;

    println!("Database Statistics");
    println!("-------------------");
    println!("Sessions:      {sessions}");
    println!("Messages:      {messages}");
    println!("Conversations: {conversations}");

    Ok(())
}

fn truncate(s: &str, max_chars: usize) -> String {
    let s = s.replace('\n', " ");
    if s.chars().count() <= max_chars {
        s
    } else {
        let cut: String = s.chars().take(max_chars).collect();
        format!("{cut}...")
    }
}
