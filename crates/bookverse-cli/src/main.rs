//! BookVerse CLI - a terminal front end for the BookVerse book catalog.
//!
//! # Usage
//!
//! ```bash
//! bookverse login --email reader@example.com --remember
//! bookverse whoami
//! bookverse favorites
//! bookverse favorite toggle 42
//! bookverse reviews
//! bookverse logout
//! ```
//!
//! Every command first restores the session from the stored credential.

use std::io;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use bookverse_core::auth::SessionError;
use bookverse_core::notify::Level;
use bookverse_core::reviews::RecentReviews;
use bookverse_core::{
    ApiClient, BookId, Config, CredentialStore, FavoriteStatus, FavoritesSync, RecordingNotifier,
    SessionManager,
};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Log file name inside the cache directory
const LOG_FILE: &str = "bookverse.log";

#[derive(Parser)]
#[command(name = "bookverse")]
#[command(author, version, about = "BookVerse command line client")]
struct Cli {
    /// Also write logs to the cache directory
    #[arg(long, global = true)]
    log_file: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in with email and password
    Login {
        #[arg(short, long)]
        email: Option<String>,

        /// Keep the token across restarts
        #[arg(short, long)]
        remember: bool,
    },
    /// Create an account
    Signup {
        #[arg(short, long)]
        name: String,

        #[arg(short, long)]
        email: String,
    },
    /// End the session
    Logout,
    /// Show the logged-in user
    Whoami,
    /// List favorite books
    Favorites,
    /// Change the favorite status of a book
    Favorite {
        #[command(subcommand)]
        action: FavoriteAction,
    },
    /// Show the recent reviews feed
    Reviews,
}

#[derive(Subcommand)]
enum FavoriteAction {
    Add { book_id: BookId },
    Remove { book_id: BookId },
    Toggle { book_id: BookId },
}

/// Initialize the tracing subscriber for logging
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::never(dir, LOG_FILE));
            (Some(fmt::layer().with_ansi(false).with_writer(writer)), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let mut config = Config::load().unwrap_or_else(|e| {
        eprintln!("Failed to load config, using defaults: {e:#}");
        Config::default()
    });

    let log_dir = if cli.log_file {
        Some(config.cache_dir()?)
    } else {
        None
    };
    if let Some(ref dir) = log_dir {
        std::fs::create_dir_all(dir).context("Failed to create log directory")?;
    }
    let _guard = init_tracing(log_dir.as_deref());

    let base_url = config.base_url();
    info!(%base_url, "BookVerse CLI starting");

    let api = ApiClient::new(&base_url, config.request_timeout())?;
    let store = CredentialStore::open(&config)?;
    let session = SessionManager::new(api, store);
    let notifier = Arc::new(RecordingNotifier::new());

    session.initialize().await;

    let result = run(cli.command, &session, &notifier, &mut config).await;

    for note in notifier.drain() {
        match note.level {
            Level::Success => eprintln!("{}", note.message),
            Level::Error => eprintln!("error: {}", note.message),
        }
    }

    result
}

async fn run(
    command: Commands,
    session: &Arc<SessionManager>,
    notifier: &Arc<RecordingNotifier>,
    config: &mut Config,
) -> Result<()> {
    match command {
        Commands::Login { email, remember } => {
            let email = match email.or_else(|| config.last_email.clone()) {
                Some(email) => email,
                None => bail!("--email is required"),
            };
            let password = rpassword::prompt_password("Password: ")?;
            let user = session
                .login(&email, &password, remember)
                .await
                .map_err(|e| anyhow::anyhow!(e.user_message()))?;

            config.last_email = Some(email);
            if let Err(e) = config.save() {
                tracing::warn!(error = %e, "Failed to save config");
            }
            println!("Logged in as {}", user.display_name());
            if !remember {
                println!("(token kept for this session only)");
            }
        }
        Commands::Signup { name, email } => {
            let password = rpassword::prompt_password("Password: ")?;
            let envelope = session
                .signup(&name, &email, &password)
                .await
                .map_err(|e| anyhow::anyhow!(e.user_message()))?;
            println!(
                "{}",
                envelope.message.as_deref().unwrap_or("Account created")
            );
        }
        Commands::Logout => {
            session.logout().await;
            println!("Logged out");
        }
        Commands::Whoami => match session.user() {
            Some(user) => println!("{} <{}> (id {})", user.display_name(), user.email, user.id),
            None => println!("not logged in"),
        },
        Commands::Favorites => {
            let favorites = favorites_for(session, notifier)?;
            favorites.refresh().await;
            let records = favorites.records();
            if records.is_empty() {
                println!("No favorites yet");
            }
            for record in records {
                println!(
                    "{:>6}  {}{}",
                    record.book_id,
                    record.title.as_deref().unwrap_or("(untitled)"),
                    record
                        .author
                        .as_deref()
                        .map(|a| format!(" - {a}"))
                        .unwrap_or_default()
                );
            }
        }
        Commands::Favorite { action } => {
            let favorites = favorites_for(session, notifier)?;
            favorites.refresh().await;
            let ok = match action {
                FavoriteAction::Add { book_id } => favorites.add(book_id).await,
                FavoriteAction::Remove { book_id } => favorites.remove(book_id).await,
                FavoriteAction::Toggle { book_id } => favorites.toggle(book_id).await,
            };
            if !ok {
                bail!("favorite update failed");
            }
        }
        Commands::Reviews => {
            let feed = RecentReviews::new(session.api().clone(), notifier.clone());
            feed.refresh().await;
            if let Some(error) = feed.last_error() {
                bail!(error);
            }
            for review in feed.reviews() {
                println!(
                    "{}  {} by {}: {}",
                    review.rating.map(|r| "*".repeat(r.into())).unwrap_or_default(),
                    review.book_title.as_deref().unwrap_or("?"),
                    review.user_name.as_deref().unwrap_or("anonymous"),
                    review.comment.as_deref().unwrap_or("")
                );
            }
        }
    }
    Ok(())
}

fn favorites_for(
    session: &Arc<SessionManager>,
    notifier: &Arc<RecordingNotifier>,
) -> Result<Arc<FavoritesSync>> {
    if !session.is_authenticated() {
        return Err(SessionError::NotAuthenticated).context("Run `bookverse login` first");
    }
    Ok(FavoritesSync::new(Arc::clone(session), notifier.clone()))
}
