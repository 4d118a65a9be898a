//! droughtwatch CLI - drought risk, mitigation recommendations and simulation

#![deny(warnings)]

// Global invariants enforced:
// - Deterministic output ordering
// - Identical input yields byte-for-byte identical output (timestamps aside)

use anyhow::Context;
use clap::{Parser, Subcommand};
use droughtwatch_core::config::{self, ResolvedConfig};
use droughtwatch_core::precipitation::JsonDirectorySource;
use droughtwatch_core::report::{
    render_assessment_text, render_assessments_text, render_history_text, render_json,
    render_recommendations_text, render_simulation_text, sort_assessments,
};
use droughtwatch_core::{Engine, Profile, RiskAssessment};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// Environment variable holding the log filter
const LOG_ENV: &str = "DROUGHTWATCH_LOG";

#[derive(Parser)]
#[command(name = "droughtwatch")]
#[command(about = "Drought risk assessment, mitigation recommendations and action-vs-no-action simulation")]
#[command(version = env!("DROUGHTWATCH_VERSION"))]
struct Cli {
    /// Path to config file (default: auto-discover)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory of <zone>.json precipitation files (overrides config file)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// SQLite database for assessment history and issued actions (overrides config file)
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// Raise log verbosity to debug
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Assess current drought risk for one or more zones
    Risk {
        /// Zone ids
        zones: Vec<String>,

        /// Assess every zone in the data directory
        #[arg(long, conflicts_with = "zones")]
        all: bool,

        /// Output format
        #[arg(long, default_value = "text")]
        format: OutputFormat,
    },
    /// Show stored assessments for a zone
    History {
        zone: String,

        /// Look-back window in days (overrides config file)
        #[arg(long)]
        days: Option<u32>,

        /// Output format
        #[arg(long, default_value = "text")]
        format: OutputFormat,
    },
    /// Recommend parameterized mitigation actions for a zone
    Recommend {
        zone: String,

        /// Decision lens used for ranking
        #[arg(long, default_value = "government")]
        profile: Profile,

        /// Also simulate every recommended action over this many days
        #[arg(long)]
        simulate_days: Option<u32>,

        /// Output format
        #[arg(long, default_value = "text")]
        format: OutputFormat,
    },
    /// Compare acting against not acting for previously issued actions
    Simulate {
        zone: String,

        /// Action instance id (repeatable)
        #[arg(long = "action")]
        actions: Vec<Uuid>,

        /// Projection horizon in days (overrides config file)
        #[arg(long)]
        days: Option<u32>,

        /// Output format
        #[arg(long, default_value = "text")]
        format: OutputFormat,
    },
    /// Validate or show configuration
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Validate a config file
    Validate {
        /// Path to config file (default: --config or auto-discover from current directory)
        #[arg(long)]
        path: Option<PathBuf>,
    },
    /// Show the resolved configuration (merged defaults + config file)
    Show {
        /// Path to config file (default: --config or auto-discover from current directory)
        #[arg(long)]
        path: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = run(cli) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let Cli {
        config: config_path,
        data_dir,
        store,
        command,
        ..
    } = cli;

    let load = |path: Option<PathBuf>| -> anyhow::Result<ResolvedConfig> {
        let project_root = std::env::current_dir()?;
        let mut resolved = config::load_and_resolve(&project_root, path.as_deref())
            .context("failed to load configuration")?;
        // CLI flags override config file values
        if let Some(dir) = data_dir.clone() {
            resolved.data_dir = dir;
        }
        if let Some(db) = store.clone() {
            resolved.store_path = Some(db);
        }
        Ok(resolved)
    };

    match command {
        Commands::Risk { zones, all, format } => {
            let config = load(config_path)?;
            let engine = Engine::from_config(&config)?;
            let zones = if all {
                list_zones(&config)?
            } else if zones.is_empty() {
                anyhow::bail!("no zones given (pass zone ids or --all)");
            } else {
                zones
            };

            if zones.len() == 1 && !all {
                let assessment = engine.get_current_risk(&zones[0])?;
                match format {
                    OutputFormat::Json => println!("{}", assessment.to_json()?),
                    OutputFormat::Text => print!("{}", render_assessment_text(&assessment)),
                }
                return Ok(());
            }

            let assessments = assess_zones(&engine, &zones, all)?;
            match format {
                OutputFormat::Json => println!("{}", render_json(&assessments)?),
                OutputFormat::Text => print!("{}", render_assessments_text(&assessments)),
            }
        }
        Commands::History { zone, days, format } => {
            let config = load(config_path)?;
            if config.store_path.is_none() {
                eprintln!("Warning: no store configured; history only covers this run");
            }
            let engine = Engine::from_config(&config)?;
            let history = engine.get_risk_history(&zone, days.unwrap_or(config.history_days))?;
            match format {
                OutputFormat::Json => println!("{}", render_json(&history)?),
                OutputFormat::Text => print!("{}", render_history_text(&zone, &history)),
            }
        }
        Commands::Recommend {
            zone,
            profile,
            simulate_days,
            format,
        } => {
            let config = load(config_path)?;
            let engine = Engine::from_config(&config)?;
            let set = engine.get_recommended_actions(&zone, profile)?;
            let simulation = match simulate_days {
                Some(days) => {
                    let ids: Vec<Uuid> = set.actions.iter().map(|a| a.instance_id).collect();
                    Some(engine.simulate(&zone, &ids, days)?)
                }
                None => None,
            };

            match format {
                OutputFormat::Json => {
                    let mut value = serde_json::to_value(&set)
                        .context("failed to serialize recommendations to JSON")?;
                    if let (Some(result), Some(object)) = (&simulation, value.as_object_mut()) {
                        object.insert(
                            "simulation".to_string(),
                            serde_json::to_value(result)
                                .context("failed to serialize simulation to JSON")?,
                        );
                    }
                    println!("{}", render_json(&value)?);
                }
                OutputFormat::Text => {
                    print!("{}", render_recommendations_text(&set));
                    if let Some(result) = &simulation {
                        println!();
                        print!("{}", render_simulation_text(result));
                    }
                }
            }
        }
        Commands::Simulate {
            zone,
            actions,
            days,
            format,
        } => {
            let config = load(config_path)?;
            if config.store_path.is_none() && !actions.is_empty() {
                anyhow::bail!(
                    "simulating issued actions needs a persistent store (pass --store or set \"store\" in the config file)"
                );
            }
            let engine = Engine::from_config(&config)?;
            let result = engine.simulate(&zone, &actions, days.unwrap_or(config.projection_days))?;
            match format {
                OutputFormat::Json => println!("{}", result.to_json()?),
                OutputFormat::Text => print!("{}", render_simulation_text(&result)),
            }
        }
        Commands::Config { action } => match action {
            ConfigAction::Validate { path } => {
                let resolved = load(path.or(config_path))?;
                match resolved.config_path {
                    Some(ref p) => println!("Config valid: {}", p.display()),
                    None => println!("No config file found. Using defaults."),
                }
            }
            ConfigAction::Show { path } => {
                let resolved = load(path.or(config_path))?;
                print_config(&resolved);
            }
        },
    }

    Ok(())
}

/// Zones in the data directory that pass the config include/exclude globs
fn list_zones(config: &ResolvedConfig) -> anyhow::Result<Vec<String>> {
    let zones: Vec<String> = JsonDirectorySource::new(&config.data_dir)
        .list_zones()?
        .into_iter()
        .filter(|zone| config.should_include_zone(zone))
        .collect();
    if zones.is_empty() {
        anyhow::bail!("no zones found in {}", config.data_dir.display());
    }
    Ok(zones)
}

/// Assess zones in parallel; output is sorted so thread scheduling never shows
fn assess_zones(engine: &Engine, zones: &[String], progress: bool) -> anyhow::Result<Vec<RiskAssessment>> {
    let bar = if progress {
        let bar = ProgressBar::new(zones.len() as u64);
        bar.set_style(
            ProgressStyle::with_template("{spinner} [{bar:30}] {pos}/{len} zones {msg}")
                .context("invalid progress template")?
                .progress_chars("=> "),
        );
        bar
    } else {
        ProgressBar::hidden()
    };

    let results: Vec<(String, droughtwatch_core::Result<RiskAssessment>)> = zones
        .par_iter()
        .map(|zone| {
            let result = engine.get_current_risk(zone);
            bar.inc(1);
            (zone.clone(), result)
        })
        .collect();
    bar.finish_and_clear();

    let mut assessments = Vec::with_capacity(results.len());
    let mut failed = 0usize;
    for (zone, result) in results {
        match result {
            Ok(assessment) => assessments.push(assessment),
            Err(e) => {
                eprintln!("Warning: {}: {}", zone, e);
                failed += 1;
            }
        }
    }
    if assessments.is_empty() && failed > 0 {
        anyhow::bail!("all {} zones failed", failed);
    }
    Ok(sort_assessments(assessments))
}

fn print_config(resolved: &ResolvedConfig) {
    println!("Configuration:");
    match resolved.config_path {
        Some(ref p) => println!("  Source: {}", p.display()),
        None => println!("  Source: defaults (no config file found)"),
    }
    println!();
    println!("AI:");
    println!("  mode: {:?}", resolved.ai.mode);
    println!("  endpoint: {}", resolved.ai.endpoint);
    println!("  model: {}", resolved.ai.model);
    println!("  api_key_env: {}", resolved.ai.api_key_env);
    println!("  timeout_ms: {}", resolved.ai.timeout.as_millis());
    println!("  max_tokens: {}", resolved.ai.max_tokens);
    println!();
    for profile in [Profile::Government, Profile::Industry] {
        println!("Weights ({}):", profile);
        for (name, value) in resolved.weights(profile).values() {
            println!("  {}: {}", name, value);
        }
        println!();
    }
    println!("Defaults:");
    println!("  projection_days: {}", resolved.projection_days);
    println!("  history_days: {}", resolved.history_days);
    println!();
    println!("Data:");
    println!("  data_dir: {}", resolved.data_dir.display());
    println!(
        "  store: {}",
        resolved
            .store_path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "in-memory".to_string())
    );
    println!(
        "  include: {}",
        if resolved.include.is_some() {
            "custom patterns"
        } else {
            "all zones"
        }
    );
}
