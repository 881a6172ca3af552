//! skillhub CLI
//!
//! Entry point for the marketplace backend. Modes:
//! - serve: run the HTTP API
//! - seed: bulk-import skill records from a JSON file
//! - stats: print catalog aggregates

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use skillhub::api::{router, ApiState};
use skillhub::ratelimit::RateLimiter;
use skillhub::store::{NewSkill, SkillStore};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How often the rate limiter drops expired windows.
const SWEEP_INTERVAL: Duration = Duration::from_secs(300);

#[derive(Parser)]
#[command(name = "skillhub")]
#[command(about = "Skillhub - agent-skills marketplace backend", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path (YAML)
    #[arg(short, long)]
    config: Option<String>,

    /// Database path (overrides config)
    #[arg(long, env = "SKILLHUB_DATABASE")]
    database: Option<String>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API server
    Serve {
        /// Bind address (overrides config)
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Import skill records from a JSON file (array of skill objects)
    Seed {
        /// Path to the seed file
        file: PathBuf,
    },

    /// Print catalog statistics
    Stats,
}

/// Server configuration, layered from defaults, an optional YAML file, and
/// `SKILLHUB_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
struct Settings {
    server: ServerSettings,
    database: String,
    base_url: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ServerSettings {
    bind: String,
}

fn load_settings(cli: &Cli) -> Result<Settings> {
    let mut builder = config::Config::builder()
        .set_default("server.bind", "127.0.0.1:8000")?
        .set_default("database", "skillhub.db")?
        .set_default("base_url", "https://skillhub.dev")?;

    if let Some(path) = &cli.config {
        builder = builder.add_source(config::File::with_name(path));
    }
    builder = builder.add_source(config::Environment::with_prefix("SKILLHUB").separator("__"));

    let mut settings: Settings = builder
        .build()
        .context("Failed to load configuration")?
        .try_deserialize()
        .context("Invalid configuration")?;

    if let Some(database) = &cli.database {
        settings.database = database.clone();
    }
    Ok(settings)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = load_settings(&cli)?;

    match cli.command {
        Commands::Serve { bind } => {
            let bind = bind.unwrap_or_else(|| settings.server.bind.clone());
            let store = SkillStore::open(&settings.database).await?;
            if !store.ranked_enabled() {
                warn!("ranked search disabled, all queries use the fallback path");
            }

            let limiter = Arc::new(RateLimiter::new());
            limiter.clone().start_sweeper(SWEEP_INTERVAL);

            let state = Arc::new(ApiState::new(store, limiter.clone(), settings.base_url));
            let app = router(state);

            let listener = tokio::net::TcpListener::bind(&bind)
                .await
                .with_context(|| format!("Failed to bind {}", bind))?;
            info!("HTTP server listening on {}", bind);

            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = tokio::signal::ctrl_c().await;
                    info!("Shutting down...");
                })
                .await?;

            limiter.stop_sweeper();
        }

        Commands::Seed { file } => {
            let raw = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let records: Vec<NewSkill> =
                serde_json::from_str(&raw).context("Seed file must be a JSON array of skills")?;

            let store = SkillStore::open(&settings.database).await?;
            let mut imported = 0usize;
            let mut failed = 0usize;
            for record in &records {
                match store.upsert_skill(record).await {
                    Ok(_) => imported += 1,
                    Err(err) => {
                        failed += 1;
                        warn!(
                            skill = %record.name,
                            author = %record.author,
                            error = %err,
                            "skipped seed record"
                        );
                    }
                }
            }

            println!(
                "Imported {} of {} skills ({} skipped)",
                imported,
                records.len(),
                failed
            );
        }

        Commands::Stats => {
            let store = SkillStore::open(&settings.database).await?;
            let stats = store.stats().await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
    }

    Ok(())
}
