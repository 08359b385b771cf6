//! Slotbook: books fitness class slots the moment they open
//!
//! Main binary with subcommands:
//! - `daemon`: Run the scheduler, attempting bookings as they come due
//! - `keygen`: Print a new key for encrypting stored secrets
//! - `login`: Store platform credentials
//! - `events`: List bookable activities
//! - `schedule`: Queue a booking for a future time
//! - `jobs`: List scheduled bookings
//! - `cancel`: Delete a scheduled booking

use std::path::PathBuf;
use std::time::Duration;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use miette::Result;
use slotbook_auth::EncryptionKey;
use slotbook_client::DEFAULT_BASE_URL;
use slotbook_scheduler::SchedulerConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod app;
mod commands;
mod daemon;

use app::App;

#[derive(Parser)]
#[command(name = "slotbook")]
#[command(about = "Books fitness class slots the moment they open", long_about = None)]
struct Cli {
    /// SQLite database file (defaults to <data dir>/slotbook/slotbook.db)
    #[arg(long, global = true, env = "SLOTBOOK_DB")]
    db: Option<PathBuf>,

    /// Booking platform base URL
    #[arg(long, global = true, env = "SLOTBOOK_BASE_URL", default_value = DEFAULT_BASE_URL)]
    base_url: String,

    /// Key sealing stored passwords and session tokens (see `keygen`)
    #[arg(long, global = true, env = "SLOTBOOK_ENCRYPTION_KEY", hide_env_values = true)]
    encryption_key: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler until interrupted
    Daemon {
        /// How often to look for due jobs, in milliseconds (default 1000)
        #[arg(long, env = "SLOTBOOK_TICK_MS")]
        tick_ms: Option<u64>,
    },

    /// Print a new encryption key
    Keygen,

    /// Sign in to the booking platform and store the credentials
    Login {
        /// Account email
        #[arg(long)]
        login: String,

        /// Account password (prompted for if omitted)
        #[arg(long, env = "SLOTBOOK_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },

    /// List activities on the platform's calendar
    Events {
        /// Credentials ID printed by `login`
        #[arg(long, env = "SLOTBOOK_CREDENTIALS_ID")]
        credentials_id: String,

        /// First day to list (YYYY-MM-DD)
        #[arg(long)]
        from: Option<NaiveDate>,

        /// Last day to list (YYYY-MM-DD)
        #[arg(long)]
        to: Option<NaiveDate>,
    },

    /// Schedule a booking attempt
    Schedule {
        /// Credentials ID printed by `login`
        #[arg(long, env = "SLOTBOOK_CREDENTIALS_ID")]
        credentials_id: String,

        /// Activity to book
        #[arg(long)]
        event_id: String,

        /// When to attempt the booking (RFC 3339)
        #[arg(long)]
        at: String,
    },

    /// List scheduled bookings
    Jobs {
        /// Credentials ID printed by `login`
        #[arg(long, env = "SLOTBOOK_CREDENTIALS_ID")]
        credentials_id: String,

        /// Include succeeded jobs
        #[arg(long)]
        all: bool,
    },

    /// Cancel a scheduled booking
    Cancel {
        /// Credentials ID printed by `login`
        #[arg(long, env = "SLOTBOOK_CREDENTIALS_ID")]
        credentials_id: String,

        /// Job to cancel
        #[arg(value_name = "JOB_ID")]
        job_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "slotbook=info".to_string()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    if let Commands::Keygen = cli.command {
        println!("{}", EncryptionKey::generate());
        return Ok(());
    }

    let key = app::encryption_key(cli.encryption_key.as_deref())?;
    let db = cli.db.unwrap_or_else(app::default_db_path);

    let mut config = SchedulerConfig::default();
    if let Commands::Daemon { tick_ms: Some(ms) } = cli.command {
        config = config.with_tick_interval(Duration::from_millis(ms.max(1)));
    }
    let app = App::open(&db, &cli.base_url, key, config)?;

    match cli.command {
        Commands::Keygen => Ok(()),

        Commands::Daemon { .. } => daemon::run(app).await,

        Commands::Login { login, password } => commands::login(&app, &login, password).await,

        Commands::Events {
            credentials_id,
            from,
            to,
        } => commands::events(&app, &credentials_id, from, to).await,

        Commands::Schedule {
            credentials_id,
            event_id,
            at,
        } => commands::schedule(&app, &credentials_id, &event_id, &at).await,

        Commands::Jobs {
            credentials_id,
            all,
        } => commands::jobs(&app, &credentials_id, all),

        Commands::Cancel {
            credentials_id,
            job_id,
        } => commands::cancel(&app, &credentials_id, &job_id).await,
    }
}
