//! # Regulatory Observatory CLI (`regobs`)
//!
//! ## Usage
//!
//! ```bash
//! regobs --config ./config/regobs.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `regobs init` | Create the SQLite database, run migrations, create the checkpoint |
//! | `regobs agencies load` | Fetch the agency directory and upsert agencies + references |
//! | `regobs ingest` | Run catch-up from the checkpoint (or `--date`) |
//! | `regobs cron` | Evaluate the weekday trigger once, now |
//! | `regobs schedule` | Run the weekday trigger on its cron schedule |
//! | `regobs serve` | Start the read-only JSON API |
//! | `regobs status` | Show the checkpoint and table counts |
//! | `regobs history <agency-id>` | Print an agency's word-count series |
//! | `regobs search "<query>"` | Semantic search over current text |

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use regobservatory::{commands, config, logging, server};

/// Regulatory Observatory: word-count history and semantic search over
/// federal regulations, attributed to agencies.
#[derive(Parser)]
#[command(name = "regobs", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/regobs.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema and checkpoint.
    ///
    /// Idempotent; never resets ingestion progress.
    Init,

    /// Manage the agency directory.
    Agencies {
        #[command(subcommand)]
        action: AgencyAction,
    },

    /// Ingest day by day from the checkpoint until caught up.
    Ingest {
        /// Date to ingest (YYYY-MM-DD). Must match the checkpoint once one exists.
        #[arg(long)]
        date: Option<String>,

        /// Stop after this many days; the next run resumes from the checkpoint.
        #[arg(long)]
        max_days: Option<usize>,
    },

    /// Evaluate the scheduled trigger once for today.
    Cron,

    /// Run the scheduled trigger until interrupted.
    Schedule,

    /// Start the read-only JSON API.
    Serve,

    /// Show ingestion progress.
    Status,

    /// Print an agency's word-count history.
    History {
        /// Agency id.
        agency: String,
    },

    /// Search current regulatory text.
    Search {
        query: String,

        /// Restrict results to one agency id.
        #[arg(long)]
        agency: Option<String>,

        #[arg(long)]
        limit: Option<usize>,
    },
}

#[derive(Subcommand)]
enum AgencyAction {
    /// Fetch the upstream directory and upsert agencies and references.
    Load,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    logging::init(&cfg.logging.level)?;

    match cli.command {
        Commands::Init => commands::run_init(&cfg).await?,
        Commands::Agencies { action } => match action {
            AgencyAction::Load => commands::run_load_agencies(&cfg).await?,
        },
        Commands::Ingest { date, max_days } => commands::run_ingest(&cfg, date, max_days).await?,
        Commands::Cron => commands::run_cron(&cfg).await?,
        Commands::Schedule => commands::run_schedule(&cfg).await?,
        Commands::Serve => server::run_server(&cfg).await?,
        Commands::Status => commands::run_status(&cfg).await?,
        Commands::History { agency } => commands::run_history(&cfg, &agency).await?,
        Commands::Search {
            query,
            agency,
            limit,
        } => commands::run_search(&cfg, &query, agency.as_deref(), limit).await?,
    }

    Ok(())
}
