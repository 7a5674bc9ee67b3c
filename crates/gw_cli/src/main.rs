//! Headless trial simulator
//!
//! Plays whole blocks of trials without a participant: a greedy stand-in
//! drives player 1 through the session driver while the configured partner
//! plays player 2. Snapshots also go out over an in-memory transport to an
//! observer, the same way a display would receive them.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use gw_core::engine::config::load_from_path;
use gw_core::engine::placement::balanced_sequence;
use gw_core::sync::{drive_greedy, SessionSetup, Transport};
use gw_core::{
    ChannelTransport, DistanceCondition, ExperimentConfig, ExperimentLog, ExperimentType,
    GoalCondition, JointPolicySolver, PartnerKind, PlayerId, PolicyCache, Position, Role,
    SoloCondition, SuccessThreshold, TrialDesign, TrialMachine, TrialOutcome, TrialRecord,
    TrialSession,
};

#[derive(Parser)]
#[command(name = "gw")]
#[command(about = "Run grid-world collaboration trials headlessly", long_about = None)]
struct Cli {
    /// Experiment config JSON (falls back to GW_CONFIG_PATH, then defaults)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Play a block of trials and print the records as JSON
    Simulate {
        /// Experiment type: 1P1G, 1P2G, 2P2G or 2P3G
        #[arg(long, default_value = "2P3G")]
        experiment: String,

        #[arg(long, default_value_t = 12)]
        trials: u32,

        #[arg(long, default_value_t = 0)]
        seed: u64,

        /// Player 2: joint or greedy
        #[arg(long, default_value = "joint")]
        partner: String,

        /// Stand-in input spacing in milliseconds
        #[arg(long, default_value_t = 20)]
        pace_ms: u64,

        /// Stop early once the success streak is reached
        #[arg(long, default_value = "false")]
        threshold: bool,

        /// Print full records (final states and histories) instead of a summary
        #[arg(long, default_value = "false")]
        full: bool,
    },

    /// Print a balanced goal-condition sequence
    Sequence {
        #[arg(long, default_value = "2P3G")]
        experiment: String,

        #[arg(long, default_value_t = 12)]
        trials: usize,

        #[arg(long, default_value_t = 0)]
        seed: u64,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;

    match cli.command {
        Commands::Simulate { experiment, trials, seed, partner, pace_ms, threshold, full } => {
            let experiment = parse_experiment(&experiment)?;
            let partner: PartnerKind = partner.parse().context("unknown partner")?;
            if !partner.is_artificial() {
                bail!("the simulator needs an artificial partner (joint or greedy)");
            }

            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .context("failed to start runtime")?;
            let log = runtime.block_on(simulate(SimulateArgs {
                config,
                experiment,
                trials,
                seed,
                partner,
                pace: Duration::from_millis(pace_ms),
                threshold,
            }))?;

            let json = if full {
                log.to_json()?
            } else {
                serde_json::to_string_pretty(&Summary::from_log(experiment, &log))?
            };
            println!("{json}");
        }

        Commands::Sequence { experiment, trials, seed } => {
            let experiment = parse_experiment(&experiment)?;
            if !experiment.injects_goal() {
                bail!("{experiment} has no goal-injection conditions");
            }
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let names: Vec<String> =
                conditions_for(experiment, trials, &mut rng).iter().map(ToString::to_string).collect();
            println!("{}", serde_json::to_string_pretty(&names)?);
        }
    }

    Ok(())
}

fn load_config(path: Option<&PathBuf>) -> Result<ExperimentConfig> {
    let config = match path {
        Some(path) => {
            let path = path.to_str().context("config path is not valid UTF-8")?;
            load_from_path(path)?
        }
        None => ExperimentConfig::from_env()?,
    };
    config.validate().context("experiment config rejected")?;
    Ok(config)
}

fn parse_experiment(name: &str) -> Result<ExperimentType> {
    name.parse().with_context(|| format!("bad --experiment '{name}'"))
}

fn conditions_for(experiment: ExperimentType, n: usize, rng: &mut ChaCha8Rng) -> Vec<GoalCondition> {
    match experiment {
        ExperimentType::TwoP3G => {
            balanced_sequence(n, &DistanceCondition::ALL, rng).into_iter().map(GoalCondition::Pair).collect()
        }
        ExperimentType::OneP2G => {
            balanced_sequence(n, &SoloCondition::ALL, rng).into_iter().map(GoalCondition::Solo).collect()
        }
        _ => vec![GoalCondition::default(); n],
    }
}

// ============================================================================
// Simulation
// ============================================================================

struct SimulateArgs {
    config: ExperimentConfig,
    experiment: ExperimentType,
    trials: u32,
    seed: u64,
    partner: PartnerKind,
    pace: Duration,
    threshold: bool,
}

async fn simulate(args: SimulateArgs) -> Result<ExperimentLog> {
    let SimulateArgs { mut config, experiment, trials, seed, partner, pace, threshold } = args;
    // The stand-in never types faster than the throttle allows.
    let pace_ms = pace.as_millis() as u64;
    config.sync.move_throttle_ms = config.sync.move_throttle_ms.min(pace_ms);

    let design = TrialDesign::fallback(experiment);
    design
        .validate(config.grid.size)
        .with_context(|| format!("built-in {experiment} layout does not fit a {0}x{0} grid", config.grid.size))?;

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let conditions = conditions_for(experiment, trials as usize, &mut rng);
    let solver = JointPolicySolver::new(config.grid.size, config.solver.clone());
    let cache = Arc::new(PolicyCache::new(solver, config.solver.cache_capacity));

    let machine = |index: u32| -> Result<TrialMachine> {
        let condition = conditions.get(index as usize).copied().unwrap_or_default();
        Ok(TrialMachine::new(index, &design, &config.grid, condition)?)
    };

    let (link, mut observer) = ChannelTransport::pair();
    let observer_task = tokio::spawn(async move {
        let mut seen = 0u64;
        while let Some(message) = observer.recv().await {
            seen += 1;
            debug!(event = message.event_name(), trial = message.trial(), "observer received");
        }
        seen
    });

    let setup = SessionSetup {
        local: PlayerId::Player1,
        role: Role::Host,
        partner,
        transport: Some(link),
        seed,
    };
    let mut session = TrialSession::new(setup, config.clone(), Arc::clone(&cache), machine(0)?)?;

    let (input_tx, mut inputs) = mpsc::channel(4);
    let stand_in = tokio::spawn(drive_greedy(session.subscribe(), PlayerId::Player1, input_tx, pace));

    let mut log = ExperimentLog::new(SuccessThreshold { enabled: threshold, ..SuccessThreshold::default() });
    info!(%experiment, trials, partner = session.partner_label(), "simulation started");
    for index in 0..trials {
        if index > 0 {
            session.load_trial(machine(index)?);
        }
        let record = session.run(&mut inputs).await.with_context(|| format!("trial {index} failed"))?;
        log.push(record);
        if log.should_end_block(experiment) {
            break;
        }
    }

    stand_in.abort();
    drop(session);
    let observed = observer_task.await.unwrap_or_default();
    let stats = cache.stats();
    info!(
        trials = log.len(),
        success_rate = log.success_rate(),
        observed,
        cache_hits = stats.hits,
        cache_misses = stats.misses,
        "simulation finished"
    );
    Ok(log)
}

// ============================================================================
// Summary output
// ============================================================================

#[derive(Serialize)]
struct Summary {
    experiment: ExperimentType,
    trials: usize,
    success_rate: f64,
    ended_early: bool,
    records: Vec<RecordSummary>,
}

#[derive(Serialize)]
struct RecordSummary {
    trial: u32,
    condition: String,
    partner: String,
    outcome: Option<TrialOutcome>,
    success: bool,
    steps: u32,
    duration_ms: i64,
    new_goal: Option<Position>,
    fallbacks: usize,
}

impl Summary {
    fn from_log(experiment: ExperimentType, log: &ExperimentLog) -> Self {
        Self {
            experiment,
            trials: log.len(),
            success_rate: log.success_rate(),
            ended_early: log.ended_early(),
            records: log.records().iter().map(RecordSummary::from).collect(),
        }
    }
}

impl From<&TrialRecord> for RecordSummary {
    fn from(r: &TrialRecord) -> Self {
        Self {
            trial: r.trial_index,
            condition: r.condition.to_string(),
            partner: r.partner.clone(),
            outcome: r.outcome,
            success: r.success,
            steps: r.steps,
            duration_ms: r.duration_ms(),
            new_goal: r.state.new_goal.as_ref().map(|g| g.position),
            fallbacks: r.fallback_incidents.len(),
        }
    }
}
