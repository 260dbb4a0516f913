//! Council - multi-worker incident investigation CLI
//!
//! ## Commands
//!
//! - `classify`: route a query (tier, mode, signal type) without running it
//! - `config`: print the effective engine configuration
//! - `investigate`: run an investigation offline against a scripted fixture

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{info, Level};

use council_core::fakes::ScriptFixture;
use council_core::{
    Classification, CouncilConfig, CouncilResult, InvestigationMode, LogFormat, Orchestrator,
    Query, QueryContext, Severity, SignalType,
};

#[derive(Parser)]
#[command(name = "council")]
#[command(author = "Council Maintainers")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Multi-worker incident investigation engine", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify a query without investigating it
    Classify {
        /// Free-text query
        query: String,

        /// Alert severity hint (low, medium, high, critical)
        #[arg(long)]
        severity: Option<Severity>,

        /// Signal types resolved on earlier turns, oldest first (comma separated)
        #[arg(long, value_delimiter = ',')]
        history: Vec<SignalType>,

        /// Fraction of budget remaining (0.0 - 1.0)
        #[arg(long)]
        budget: Option<f64>,
    },

    /// Print the effective configuration (defaults plus COUNCIL_* overrides)
    Config,

    /// Run an investigation against a JSON fixture of canned tool and model replies
    Investigate {
        /// Free-text query
        query: String,

        /// Path to the fixture file
        #[arg(short, long)]
        fixture: PathBuf,

        /// Force a mode instead of classifying (fast, standard, debate)
        #[arg(short, long)]
        mode: Option<InvestigationMode>,

        /// Alert severity hint (low, medium, high, critical)
        #[arg(long)]
        severity: Option<Severity>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    council_core::init_with_format(LogFormat::from_json_flag(cli.json), level);

    match cli.command {
        Commands::Classify {
            query,
            severity,
            history,
            budget,
        } => print_json(&cmd_classify(&query, severity, history, budget)),
        Commands::Config => print_json(&cmd_config()?),
        Commands::Investigate {
            query,
            fixture,
            mode,
            severity,
        } => {
            let config = cmd_config()?;
            let result = cmd_investigate(config, &fixture, &query, mode, severity).await?;
            print_json(&result)
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let out = serde_json::to_string_pretty(value).context("Failed to encode output")?;
    println!("{out}");
    Ok(())
}

fn build_query(
    text: &str,
    severity: Option<Severity>,
    history: Vec<SignalType>,
    budget: Option<f64>,
) -> Query {
    let context = QueryContext {
        severity,
        history,
        budget: budget.map(|fraction| council_core::Budget {
            fraction_remaining: Some(fraction),
            ..Default::default()
        }),
        ..Default::default()
    };
    Query::new(text).with_context(context)
}

fn cmd_classify(
    text: &str,
    severity: Option<Severity>,
    history: Vec<SignalType>,
    budget: Option<f64>,
) -> Classification {
    let query = build_query(text, severity, history, budget);
    council_core::classify(&query.text, Some(&query.context))
}

fn cmd_config() -> Result<CouncilConfig> {
    CouncilConfig::from_env().context("Invalid COUNCIL_* configuration")
}

fn load_fixture(path: &Path) -> Result<ScriptFixture> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read fixture {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Invalid fixture {}", path.display()))
}

async fn cmd_investigate(
    config: CouncilConfig,
    fixture: &Path,
    text: &str,
    mode: Option<InvestigationMode>,
    severity: Option<Severity>,
) -> Result<CouncilResult> {
    let services = load_fixture(fixture)?.into_services();
    let orchestrator = Orchestrator::new(config, services);
    let query = build_query(text, severity, Vec::new(), None);

    let result = orchestrator.run_investigation(&query, mode).await;
    info!(
        status = %result.status,
        rounds = result.round_count,
        confidence = result.aggregate_confidence(),
        "investigation complete"
    );
    Ok(result)
}
