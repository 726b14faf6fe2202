//! Maintenance CLI
//!
//! Runs schema migrations and the periodic jobs of the platform. Every
//! command prints a single JSON document to stdout.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use plebis_core::common::{ElectionLocationId, ImpulsaEditionId, ReportId};
use plebis_core::config::Config;
use plebis_core::domains::engines::{registry, EngineActivation};
use plebis_core::domains::impulsa::ImpulsaEdition;
use plebis_core::domains::proposals::Proposal;
use plebis_core::domains::reports::Report;
use plebis_core::domains::votes::{Election, ElectionLocation};
use serde_json::{json, Value as JsonValue};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "plebis_cli")]
#[command(about = "Plebis maintenance commands")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending schema migrations
    Migrate,

    /// Inspect and toggle engines
    Engines {
        #[command(subcommand)]
        command: EngineCommands,
    },

    /// Stored reports
    Report {
        #[command(subcommand)]
        command: ReportCommands,
    },

    /// Citizen proposals
    Proposals {
        #[command(subcommand)]
        command: ProposalCommands,
    },

    /// Elections and their locations
    Votes {
        #[command(subcommand)]
        command: VoteCommands,
    },

    /// Impulsa editions
    Impulsa {
        #[command(subcommand)]
        command: ImpulsaCommands,
    },
}

#[derive(Subcommand)]
enum EngineCommands {
    /// List registered engines and whether they are enabled
    List,
    Enable { name: String },
    Disable { name: String },
}

#[derive(Subcommand)]
enum ReportCommands {
    /// Run a report and save its results
    Run { id: ReportId },
}

#[derive(Subcommand)]
enum ProposalCommands {
    /// Recompute hotness of every proposal
    RefreshHotness,
}

#[derive(Subcommand)]
enum VoteCommands {
    /// Show the booth election ids of an election location
    VoteId { location_id: ElectionLocationId },
}

#[derive(Subcommand)]
enum ImpulsaCommands {
    /// Show the current phase of an edition
    Phase { edition_id: ImpulsaEditionId },
}

fn output(value: JsonValue) -> Result<()> {
    println!("{}", serde_json::to_string(&value)?);
    Ok(())
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,plebis_core=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;
    let pool = get_pool(&config).await?;

    match cli.command {
        Commands::Migrate => cmd_migrate(&pool).await,
        Commands::Engines { command } => match command {
            EngineCommands::List => cmd_engines_list(&pool).await,
            EngineCommands::Enable { name } => cmd_engine_enable(&name, &pool).await,
            EngineCommands::Disable { name } => cmd_engine_disable(&name, &pool).await,
        },
        Commands::Report {
            command: ReportCommands::Run { id },
        } => cmd_report(id, &config, &pool).await,
        Commands::Proposals {
            command: ProposalCommands::RefreshHotness,
        } => cmd_refresh_hotness(&pool).await,
        Commands::Votes {
            command: VoteCommands::VoteId { location_id },
        } => cmd_vote_id(location_id, &pool).await,
        Commands::Impulsa {
            command: ImpulsaCommands::Phase { edition_id },
        } => cmd_impulsa_phase(edition_id, &pool).await,
    }
}

async fn get_pool(config: &Config) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")
}

// ============================================================================
// Commands
// ============================================================================

async fn cmd_migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("Failed to run migrations")?;
    tracing::info!("migrations applied");
    output(json!({ "success": true }))
}

async fn cmd_engines_list(pool: &PgPool) -> Result<()> {
    let enabled = EngineActivation::enabled_names(pool).await?;
    let engines: Vec<JsonValue> = registry::ENGINES
        .iter()
        .map(|engine| {
            json!({
                "key": engine.key,
                "name": engine.name,
                "version": engine.version,
                "dependencies": engine.dependencies,
                "enabled": enabled.contains(engine.key),
                "dependencies_met": registry::dependencies_met(engine.key, &enabled),
            })
        })
        .collect();
    output(json!({ "success": true, "engines": engines }))
}

async fn cmd_engine_enable(name: &str, pool: &PgPool) -> Result<()> {
    let activation = EngineActivation::enable(name, pool).await?;
    output(json!({ "success": true, "engine": activation }))
}

async fn cmd_engine_disable(name: &str, pool: &PgPool) -> Result<()> {
    let activation = EngineActivation::disable(name, pool).await?;
    output(json!({ "success": activation.is_some(), "engine": activation }))
}

async fn cmd_report(id: ReportId, config: &Config, pool: &PgPool) -> Result<()> {
    let report = Report::find_by_id(id, pool).await?;
    let report = report.run(&config.reports_dir, pool).await?;
    output(json!({ "success": true, "report": report.id, "results": report.results()? }))
}

async fn cmd_refresh_hotness(pool: &PgPool) -> Result<()> {
    let updated = Proposal::refresh_hotness(Utc::now(), pool).await?;
    output(json!({ "success": true, "count": updated }))
}

async fn cmd_vote_id(location_id: ElectionLocationId, pool: &PgPool) -> Result<()> {
    let location = ElectionLocation::find_by_id(location_id, pool).await?;
    let election = Election::find_by_id(location.election_id, pool).await?;
    output(json!({
        "success": true,
        "territory": location.territory(&election),
        "vote_id": location.vote_id(&election),
        "new_vote_id": location.new_vote_id(&election),
        "new_version_pending": location.new_version_pending(),
    }))
}

async fn cmd_impulsa_phase(edition_id: ImpulsaEditionId, pool: &PgPool) -> Result<()> {
    let edition = ImpulsaEdition::find_by_id(edition_id, pool).await?;
    let phase = edition.current_phase(Utc::now());
    output(json!({ "success": true, "phase": phase, "code": phase.code() }))
}
