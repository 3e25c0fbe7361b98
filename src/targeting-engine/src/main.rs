//! Targeting Engine: replays a stream of site visits through the targeting
//! rules and persists per-visitor results.
//!
//! Reads one JSON visit per line (file or stdin), writes one JSON outcome per
//! line to stdout and logs to stderr.

mod pipeline;

use anyhow::Context;
use clap::Parser;
use pipeline::{VisitProcessor, VisitRecord};
use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::PathBuf;
use targeting_conditions::{Rule, RuleEvaluator};
use targeting_core::{StorageBackend, TargetingConfig};
use targeting_storage::open_storage;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "targeting-engine")]
#[command(about = "Replay site visits through targeting rules and persist the results")]
#[command(version)]
struct Cli {
    /// Visits file (JSON lines), `-` for stdin
    #[arg(default_value = "-")]
    visits: String,

    /// TOML configuration file
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Rules file (overrides config)
    #[arg(long, env = "TARGETING__RULES_PATH")]
    rules: Option<String>,

    /// SQLite database path (overrides config)
    #[arg(long, env = "TARGETING__STORAGE__SQLITE_PATH")]
    sqlite_path: Option<String>,

    /// Keep durable state in memory (dry run)
    #[arg(long, default_value_t = false)]
    in_memory: bool,

    /// Issue visitor IDs to anonymous visits
    #[arg(long, default_value_t = false)]
    issue_ids: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "targeting_engine=info,targeting_storage=info".into()),
        )
        .json()
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    // Load configuration; a missing explicit file is fatal, bad env is not.
    let mut config = match TargetingConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) if cli.config.is_none() => {
            warn!(error = %e, "Failed to load config, using defaults");
            TargetingConfig::default()
        }
        Err(e) => return Err(e).context("loading configuration file"),
    };

    // Apply CLI overrides
    if let Some(rules) = cli.rules {
        config.rules_path = rules;
    }
    if let Some(path) = cli.sqlite_path {
        config.storage.sqlite_path = path;
    }
    if cli.in_memory {
        config.storage.backend = StorageBackend::Session;
    }

    info!(
        rules = %config.rules_path,
        backend = %config.storage.backend,
        table = %config.storage.table_name,
        "Configuration loaded"
    );

    let rules_json = std::fs::read_to_string(&config.rules_path)
        .with_context(|| format!("reading rules from {}", config.rules_path))?;
    let rules = Rule::parse_all(&rules_json).context("parsing rules")?;
    info!(rules = rules.len(), "Rules loaded");

    let evaluator = RuleEvaluator::default();
    info!(providers = ?evaluator.registry().keys(), "Data providers registered");

    let storage = open_storage(&config.storage).context("opening targeting storage")?;
    let mut processor = VisitProcessor::new(evaluator, rules, storage, config.scopes.clone())
        .issue_ids(cli.issue_ids);

    let reader: Box<dyn BufRead> = if cli.visits == "-" {
        Box::new(io::stdin().lock())
    } else {
        let file = File::open(&cli.visits).with_context(|| format!("opening {}", cli.visits))?;
        Box::new(BufReader::new(file))
    };

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let mut processed = 0usize;
    let mut skipped = 0usize;
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record: VisitRecord = match serde_json::from_str(&line) {
            Ok(record) => record,
            Err(e) => {
                warn!(line = index + 1, error = %e, "Skipping malformed visit");
                skipped += 1;
                continue;
            }
        };
        let outcome = processor.process(record)?;
        serde_json::to_writer(&mut out, &outcome)?;
        writeln!(out)?;
        processed += 1;
    }
    out.flush()?;

    let migrated = processor.finish()?;
    info!(
        processed = processed,
        skipped = skipped,
        migrated = migrated,
        "Batch complete"
    );
    Ok(())
}
