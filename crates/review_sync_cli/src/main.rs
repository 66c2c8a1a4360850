//! Review Sync CLI - mirrors a project's reviews into a local database.

mod commands;
mod config;
mod progress;
mod shutdown;

use clap::{Parser, Subcommand};
use console::Term;
use tracing_subscriber::EnvFilter;

use crate::commands::sync::SyncArgs;

#[derive(Parser)]
#[command(name = "review-sync")]
#[command(version)]
#[command(about = "Mirror a review API project into a relational database")]
#[command(
    long_about = "review-sync pulls workflow templates, reviews, file versions and \
per-step progress from a paginated review API and upserts them into SQLite or \
PostgreSQL. Re-running a sync is idempotent; a full resync rebuilds the schema first."
)]
#[command(after_long_help = r#"EXAMPLES
    Sync a project into the default SQLite database:
        $ review-sync sync --project p-123

    Rebuild the schema and sync with production tuning:
        $ review-sync sync --project p-123 --full --preset production

    Only open reviews, machine-readable summary:
        $ review-sync sync -p p-123 -f status=open -o json

CONFIGURATION
    review-sync reads configuration from:
      1. ~/.config/review-sync/config.toml (or $XDG_CONFIG_HOME/review-sync/config.toml)
      2. ./review-sync.toml
      3. Environment variables (REVIEW_SYNC_* prefix, e.g., REVIEW_SYNC_SYNC__BATCH_SIZE)
      4. .env file in current directory

ENVIRONMENT VARIABLES
    REVIEW_SYNC_DATABASE_URL   Database connection string (default: ~/.local/state/review-sync/review-sync.db)
    REVIEW_SYNC_BASE_URL       Review API base URL
    REVIEW_SYNC_TOKEN          API bearer token
    REVIEW_SYNC_PROJECT_ID     Project synced when --project is omitted
"#)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run database migrations
    Migrate {
        #[command(subcommand)]
        action: MigrateAction,
    },
    /// Sync one project from the review API
    Sync(SyncArgs),
}

#[derive(Subcommand)]
enum MigrateAction {
    /// Apply all pending migrations
    Up,
    /// Rollback the last migration
    Down,
    /// Show migration status
    Status,
    /// Fresh install - drop all tables and reapply migrations
    Fresh,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    // Interactive runs draw progress bars instead of logging.
    if !Term::stdout().is_term() {
        let env_filter = match EnvFilter::try_from_default_env() {
            Ok(filter) => filter,
            Err(_) => EnvFilter::new("review_sync=info,review_sync_cli=info"),
        };

        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .init();
    }

    let config = config::Config::load();
    let cli = Cli::parse();

    let database_url = config
        .database_url()
        .ok_or("Could not determine a database URL; set REVIEW_SYNC_DATABASE_URL")?;

    if database_url.starts_with("sqlite://") {
        let db_path = database_url.trim_start_matches("sqlite://");
        // Strip query parameters (e.g., ?mode=rwc) before path operations
        let db_path = db_path.split('?').next().unwrap_or(db_path);
        let db_path = std::path::Path::new(db_path);

        if db_path.is_relative() && !db_path.as_os_str().is_empty() {
            tracing::warn!(
                "Database path '{}' is relative - behavior depends on current directory. \
                 Consider using an absolute path.",
                db_path.display()
            );
        }

        if let Some(parent) = db_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
    }

    match cli.command {
        Commands::Migrate { action } => {
            commands::migrate::handle_migrate(action, &database_url).await?;
        }
        Commands::Sync(args) => {
            commands::sync::handle_sync(args, &config, &database_url).await?;
        }
    }

    Ok(())
}
