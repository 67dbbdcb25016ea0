//! Talk to Aliens command-line client.

use aliens_backend::{PocketBaseClient, RealtimeClient, RealtimeEvent};
use aliens_core::{init_logging, Config, Paths};
use aliens_session::{RegisterRequest, SessionManager, UpgradeRequest};
use aliens_stores::{CardStore, MessageStore, ALL_LANGUAGES};
use aliens_types::{Message, Profile};
use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "aliens", about = "Talk to Aliens command-line client", version)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Base directory for runtime files (default: ~/.talk-to-aliens)
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Sign in with email and password
    Login {
        email: String,
        password: String,
    },
    /// Create a permanent account and sign into it
    Register {
        email: String,
        password: String,
        name: String,
    },
    /// Sign in as a throwaway guest (valid for 24 hours)
    Guest,
    /// Turn the current guest session into a permanent account
    Upgrade {
        email: String,
        password: String,
        name: String,
    },
    /// Show the current session
    Status,
    /// Drop the current session
    Logout,
    /// List topic cards
    Cards {
        /// Only cards in this language
        #[arg(long, default_value = ALL_LANGUAGES)]
        language: String,
    },
    /// Show a card's chat thread
    Messages { card_id: String },
    /// Post a message to a card's chat thread
    Send { card_id: String, text: String },
    /// Tail a card's chat thread over the realtime feed
    Watch { card_id: String },
    /// Delete expired guest accounts
    Cleanup {
        /// Must match the configured cleanup token
        #[arg(long)]
        token: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let paths = match &cli.base_dir {
        Some(dir) => Paths::with_base_dir(dir.clone()),
        None => Paths::new()?,
    };
    let mut config = Config::load(&paths)?;
    if let Some(level) = &cli.log_level {
        config.log_level = level.clone();
    }
    init_logging(&config.log_level);
    tracing::debug!(backend = %config.backend_url, "client starting");

    let client = Arc::new(PocketBaseClient::new(&config.backend_url));
    let session = Arc::new(
        SessionManager::new(Arc::clone(&client), config.verbose_auth_errors)
            .with_session_file(paths.session_file()),
    );

    match cli.command {
        Command::Login { email, password } => {
            let profile = session.login(&email, &password).await?;
            println!("Signed in as {} <{}>", profile.name, profile.email);
        }
        Command::Register {
            email,
            password,
            name,
        } => {
            let profile = session
                .register(&RegisterRequest {
                    email,
                    password_confirm: password.clone(),
                    password,
                    name,
                    avatar: None,
                })
                .await?;
            println!("Account created, signed in as {}", profile.name);
        }
        Command::Guest => {
            let profile = guest_session(&session).await?;
            print_guest(&profile);
        }
        Command::Upgrade {
            email,
            password,
            name,
        } => {
            restore_session(&session).await?;
            let profile = session
                .upgrade_guest(&UpgradeRequest {
                    email,
                    password_confirm: password.clone(),
                    password,
                    name,
                })
                .await?;
            println!("Upgraded, signed in as {} <{}>", profile.name, profile.email);
        }
        Command::Status => match session.check_auth().await? {
            Some(profile) => {
                if profile.is_guest() {
                    print_guest(&profile);
                } else {
                    println!("Signed in as {} <{}>", profile.name, profile.email);
                }
            }
            None => println!("Not signed in"),
        },
        Command::Logout => {
            session.logout().await?;
            println!("Signed out");
        }
        Command::Cards { language } => {
            guest_session(&session).await?;
            let cards = CardStore::new(Arc::clone(&client));
            cards.load(false).await?;

            let listed = cards.cards_by_language(&language).await;
            if listed.is_empty() {
                println!("No cards");
            }
            for card in listed {
                println!(
                    "{}  [{}]  {}  (by {})",
                    card.id,
                    card.language,
                    card.title,
                    card.author.display_name()
                );
            }
        }
        Command::Messages { card_id } => {
            guest_session(&session).await?;
            let messages = MessageStore::new(Arc::clone(&client));
            messages.load_messages(&card_id, false).await?;

            let thread = messages.messages_for(&card_id).await;
            if thread.is_empty() {
                println!("No messages");
            }
            for message in &thread {
                print_message(message);
            }
        }
        Command::Send { card_id, text } => {
            restore_session(&session).await?;
            let messages = MessageStore::new(Arc::clone(&client));
            let sent = messages.send_message(&card_id, &text).await?;
            println!("Sent {}", sent.id);
        }
        Command::Watch { card_id } => {
            guest_session(&session).await?;
            let store = MessageStore::new(Arc::clone(&client));
            store.load_messages(&card_id, false).await?;

            let thread = store.messages_for(&card_id).await;
            for message in &thread {
                print_message(message);
            }
            let mut seen = thread.len();

            let realtime = Arc::new(RealtimeClient::with_defaults(&config.backend_url));
            let sync = store.spawn_realtime_sync(realtime.subscribe());
            let mut events = realtime.subscribe();

            let token = client
                .token()
                .context("not signed in; run `aliens login` or `aliens guest`")?;
            let feed = Arc::clone(&realtime);
            tokio::spawn(async move {
                if let Err(e) = feed
                    .connect(&token.token, vec!["messages".to_string()])
                    .await
                {
                    tracing::error!(error = %e, "realtime feed terminated");
                }
            });

            println!("Watching card {card_id}; Ctrl-C to stop");
            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => break,
                    event = events.recv() => match event {
                        Ok(RealtimeEvent::Record(_)) => {
                            // Let the sync task resolve the author expansion.
                            tokio::time::sleep(std::time::Duration::from_millis(200)).await;
                            let thread = store.messages_for(&card_id).await;
                            for message in thread.iter().skip(seen) {
                                print_message(message);
                            }
                            seen = thread.len();
                        }
                        Ok(RealtimeEvent::Disconnected(reason)) => {
                            tracing::warn!(?reason, "realtime feed dropped");
                        }
                        Ok(_) => {}
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
            sync.stop();
            realtime.disconnect().await;
        }
        Command::Cleanup { token } => {
            let expected = config
                .cleanup_token
                .as_deref()
                .context("no cleanup token configured")?;
            if token != expected {
                bail!("cleanup token mismatch");
            }
            restore_session(&session).await?;
            let deleted = session.cleanup_expired_guests().await?;
            println!("Deleted {deleted} expired guest account(s)");
        }
    }

    Ok(())
}

/// Restore the persisted session, failing when there is none.
async fn restore_session(session: &SessionManager) -> anyhow::Result<Profile> {
    session
        .check_auth()
        .await?
        .context("not signed in; run `aliens login` or `aliens guest`")
}

/// Restore the persisted session if any, then fall back to guest
/// provisioning, the same way the card routes do.
async fn guest_session(session: &SessionManager) -> anyhow::Result<Profile> {
    session.check_auth().await?;
    Ok(session.ensure_guest_access().await?)
}

fn print_message(message: &Message) {
    println!(
        "[{}] {}: {}",
        message.created.format("%Y-%m-%d %H:%M"),
        message.author.display_name(),
        message.text
    );
}

fn print_guest(profile: &Profile) {
    match profile.expires_at {
        Some(expires_at) => println!(
            "Signed in as guest {} (expires {})",
            profile.name,
            expires_at.format("%Y-%m-%d %H:%M UTC")
        ),
        None => println!("Signed in as guest {}", profile.name),
    }
}
