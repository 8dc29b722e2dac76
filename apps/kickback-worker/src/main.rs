use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::io;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use kickback_db::db::{connect, run_migrations};
use kickback_db::repositories::reward_repo::RewardRepository;
use kickback_worker::adapters::postgres::PgBackend;
use kickback_worker::config::WorkerConfig;
use kickback_worker::engine::ReferralEngine;

#[derive(Parser)]
#[command(name = "kickback-worker")]
#[command(about = "Referral validation and reward worker", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one validation pass and print its summary as JSON
    Run {
        /// Evaluate as of this instant (RFC 3339) instead of the current time
        #[arg(long, value_parser = parse_instant)]
        now: Option<DateTime<Utc>>,
    },
    /// Run validation passes on a fixed interval
    Watch {
        /// Seconds between passes (defaults to WATCH_INTERVAL_SECS)
        #[arg(long)]
        interval: Option<u64>,
    },
    /// Apply database migrations and exit
    Migrate,
    /// Print the rewards granted to a user as JSON
    Rewards {
        user_id: i64,
    },
}

impl Commands {
    /// Read-only commands leave the schema alone.
    fn applies_migrations(&self) -> bool {
        matches!(self, Commands::Run { .. } | Commands::Watch { .. } | Commands::Migrate)
    }
}

fn parse_instant(value: &str) -> std::result::Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| format!("expected an RFC 3339 timestamp: {}", e))
}

#[tokio::main]
async fn main() -> Result<()> {
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("No .env file loaded: {}", e);
    }

    let cli = Cli::parse();

    let file_appender = tracing_appender::rolling::never(".", "kickback-worker.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "kickback_worker=info,kickback_db=info,sqlx=warn".into()))
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .with(tracing_subscriber::fmt::layer().with_writer(non_blocking).with_ansi(false))
        .init();

    let config = WorkerConfig::load().context("Failed to load worker config")?;
    let pool = connect(&config.database_url, config.db_max_connections).await?;
    if cli.command.applies_migrations() {
        run_migrations(&pool).await?;
    }

    match cli.command {
        Commands::Run { now } => {
            let engine = ReferralEngine::new(PgBackend::collaborators(pool), config.engine_settings());
            let summary = engine.run_validation_pass(now.unwrap_or_else(Utc::now)).await;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            if summary.aborted {
                anyhow::bail!("validation pass aborted");
            }
        }
        Commands::Watch { interval } => {
            let period = Duration::from_secs(interval.unwrap_or(config.watch_interval_secs).max(1));
            let engine = ReferralEngine::new(PgBackend::collaborators(pool), config.engine_settings());
            engine.watch(period).await;
        }
        Commands::Migrate => {
            tracing::info!("Migrations applied");
        }
        Commands::Rewards { user_id } => {
            let rewards = RewardRepository::new(pool).get_by_user(user_id).await?;
            println!("{}", serde_json::to_string_pretty(&rewards)?);
        }
    }

    Ok(())
}
