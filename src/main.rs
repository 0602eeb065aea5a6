use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::collections::HashSet;
use std::fs::File;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{info, warn};

use mtf_decision_core::streams::run_replay_stream;
use mtf_decision_core::trading_core::{
    CoreConfig, DecisionPipeline, DecisionResult, DetectorKind, EngineContext, LoggingExecutor, Orchestrator,
    PipelineConfig, TradeState,
};

#[derive(Parser, Debug)]
#[command(name = "mtf-decision-core")]
#[command(about = "Multi-timeframe bar aggregation and trade decisions")]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// Print verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Replay recorded bars or feed messages through the decision pipeline
    Replay {
        /// Input file (.csv, .jsonl, optionally .zst compressed)
        #[arg(short, long)]
        input: PathBuf,

        /// Signal policy preset, used when no config file is given
        #[arg(short, long, value_enum, default_value_t = Policy::Breakout)]
        policy: Policy,

        /// JSON config file with `engine` and `pipeline` sections
        #[arg(short, long, env = "MTF_CONFIG")]
        config: Option<PathBuf>,

        /// JSON array of instruments to trade; all instruments when absent
        #[arg(short, long)]
        universe: Option<PathBuf>,

        /// Base bar period in minutes (overrides the config file)
        #[arg(short, long)]
        base_period: Option<u32>,

        /// Write every PREPARE/EXECUTE decision to this CSV file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Policy {
    Breakout,
    Pullback,
}

impl From<Policy> for DetectorKind {
    fn from(policy: Policy) -> Self {
        match policy {
            Policy::Breakout => DetectorKind::Breakout,
            Policy::Pullback => DetectorKind::Pullback,
        }
    }
}

/// Flat CSV row for a decision
#[derive(Debug, Serialize)]
struct DecisionRow<'a> {
    timestamp: String,
    instrument: &'a str,
    state: String,
    score: f64,
    reason: &'a str,
    regime: f64,
    htf: f64,
    vwap: f64,
    structure: f64,
    volume: f64,
    volatility: f64,
    liquidity: f64,
    price_action: f64,
    location: f64,
    momentum: f64,
}

impl<'a> From<&'a DecisionResult> for DecisionRow<'a> {
    fn from(d: &'a DecisionResult) -> Self {
        let b = &d.breakdown;
        Self {
            timestamp: d.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
            instrument: &d.instrument,
            state: d.state.to_string(),
            score: d.score,
            reason: &d.reason,
            regime: b.regime,
            htf: b.htf,
            vwap: b.vwap + b.vwap_penalty,
            structure: b.structure,
            volume: b.volume,
            volatility: b.volatility,
            liquidity: b.liquidity,
            price_action: b.price_action,
            location: b.location,
            momentum: b.momentum,
        }
    }
}

fn load_config(path: Option<&Path>, policy: Policy) -> Result<CoreConfig> {
    let Some(path) = path else {
        return Ok(CoreConfig {
            pipeline: PipelineConfig::for_detector(policy.into()),
            ..Default::default()
        });
    };
    let file = File::open(path).with_context(|| format!("Failed to open config: {:?}", path))?;
    let config: CoreConfig =
        serde_json::from_reader(file).with_context(|| format!("Failed to parse config: {:?}", path))?;
    info!("Loaded config from {:?} ({} detector)", path, config.pipeline.detector);
    Ok(config)
}

fn load_universe(path: &Path) -> Result<HashSet<String>> {
    let file = File::open(path).with_context(|| format!("Failed to open universe: {:?}", path))?;
    let instruments: Vec<String> =
        serde_json::from_reader(file).with_context(|| format!("Universe must be a JSON array: {:?}", path))?;
    Ok(instruments.into_iter().collect())
}

async fn run_replay(
    input: PathBuf,
    policy: Policy,
    config: Option<PathBuf>,
    universe: Option<PathBuf>,
    base_period: Option<u32>,
    output: Option<PathBuf>,
) -> Result<()> {
    let mut config = load_config(config.as_deref(), policy)?;
    if let Some(minutes) = base_period {
        config.engine.base_period_minutes = minutes;
    }

    let ctx = EngineContext::new(&config.engine)?;
    let pipeline = DecisionPipeline::new(config.pipeline, config.engine.base_period_minutes)?;
    let mut orchestrator = Orchestrator::new(ctx, pipeline, Box::new(LoggingExecutor));
    if let Some(path) = universe {
        orchestrator = orchestrator.with_universe(load_universe(&path)?);
    }

    let mut writer = match &output {
        Some(path) => Some(csv::Writer::from_path(path).with_context(|| format!("Failed to create {:?}", path))?),
        None => None,
    };

    let (tx, mut rx) = mpsc::channel(1024);
    let stream = tokio::spawn(run_replay_stream(input, tx));

    while let Some(msg) = rx.recv().await {
        for decision in orchestrator.on_message(&msg) {
            if decision.state == TradeState::Ignore {
                continue;
            }
            if let Some(w) = writer.as_mut() {
                if let Err(e) = w.serialize(DecisionRow::from(&decision)) {
                    warn!("Failed to write decision: {}", e);
                }
            }
        }
    }

    let sent = stream.await.context("Replay stream task panicked")??;
    if let Some(mut w) = writer {
        w.flush()?;
    }

    let stats = orchestrator.stats();
    info!("Replay complete: {} messages", sent);
    info!("  Bars ingested: {}", stats.bars_ingested);
    info!("  Evaluations:   {}", stats.evaluations);
    info!("  IGNORE:        {}", stats.ignores);
    info!("  PREPARE:       {}", stats.prepares);
    info!("  EXECUTE:       {} ({} entries, {} duplicates)", stats.executes, stats.entries, stats.duplicates);
    info!("  Sessions:      {}", stats.sessions);
    if let Some(path) = output {
        info!("Decisions written to {:?}", path);
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("mtf_decision_core={level}"))),
        )
        .init();

    match args.command {
        Commands::Replay {
            input,
            policy,
            config,
            universe,
            base_period,
            output,
        } => {
            run_replay(input, policy, config, universe, base_period, output).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replay_defaults_to_breakout_preset() {
        let args = Args::try_parse_from(["mtf-decision-core", "replay", "--input", "bars.csv"]).unwrap();
        let Commands::Replay { policy, config, .. } = args.command;
        assert!(matches!(policy, Policy::Breakout));

        let core = load_config(config.as_deref(), policy).unwrap();
        assert_eq!(core.pipeline.detector, DetectorKind::Breakout);
        assert_eq!(core.pipeline.execute_threshold, PipelineConfig::default().execute_threshold);
    }
}
