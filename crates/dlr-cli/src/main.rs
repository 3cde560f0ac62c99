mod config;
mod logging;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use dlr_core::{EventCategory, StagingArea};
use dlr_recovery::sources::LISTENER_LANE;
use dlr_recovery::{JobOutcome, JobParameters, JobRegistry, JobRunner};
use dlr_storage::{CanonicalStore, JobRunStore, QueueStore, RecoveryStore, StagingStore};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "dlr")]
#[command(about = "Dead-letter activity recovery jobs", long_about = None)]
struct Cli {
    /// Config file (otherwise $DLR_CONFIG, then the user config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[arg(long, global = true, default_value_t = false)]
    debug: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one recovery job to completion
    Run(RunArgs),
    /// List registered jobs
    Jobs,
    /// Push a raw message file onto the tail of a queue lane
    Enqueue { lane: String, file: PathBuf },
    /// Show holding area backlogs and recent runs
    Status {
        #[arg(long, default_value_t = 10)]
        runs: usize,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    job: String,
    #[arg(long)]
    run_id: Option<String>,
    #[arg(long)]
    chunk_size: Option<usize>,
    #[arg(long)]
    retention_days: Option<i64>,
    #[arg(long)]
    stale_hours: Option<i64>,
    #[arg(long)]
    editing_stale_minutes: Option<i64>,
    #[arg(long)]
    failure_dir: Option<PathBuf>,
}

impl RunArgs {
    fn parameters(&self) -> JobParameters {
        JobParameters {
            requested_at: Utc::now(),
            run_id: self.run_id.clone(),
            chunk_size: self.chunk_size,
            retention_days: self.retention_days,
            stale_hours: self.stale_hours,
            editing_stale_minutes: self.editing_stale_minutes,
            failure_dir: self.failure_dir.clone(),
        }
    }
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let config = config::load(cli.config.as_deref())?;
    let _log_guard = logging::init_logging(&config, cli.debug);

    match cli.command {
        Commands::Jobs => {
            for job in JobRegistry::standard().jobs() {
                println!(
                    "{:<38} chunk={:<4} {} -> {}",
                    job.name, job.default_chunk_size, job.source, job.sink
                );
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Run(args) => {
            let store = open_store(&config)?;
            let runner = JobRunner::new(&store, config.settings());
            let outcome = runner
                .run(&args.job, &args.parameters())
                .with_context(|| format!("job {} did not run", args.job))?;
            print_outcome(&outcome)?;
            if outcome.is_completed() {
                Ok(ExitCode::SUCCESS)
            } else {
                Ok(ExitCode::FAILURE)
            }
        }
        Commands::Enqueue { lane, file } => {
            let lane = if lane == LISTENER_LANE {
                lane
            } else {
                match lane.parse::<EventCategory>() {
                    Ok(category) => category.as_str().to_string(),
                    Err(_) => bail!(
                        "unknown lane '{lane}': expected an event category or '{LISTENER_LANE}'"
                    ),
                }
            };
            let contents = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let message: serde_json::Value = serde_json::from_str(&contents)
                .with_context(|| format!("{} is not JSON", file.display()))?;
            let store = open_store(&config)?;
            store.push_back(&lane, &message.to_string())?;
            info!(event = "message_enqueued", lane = %lane, file = %file.display());
            println!("enqueued onto {lane} (length {})", store.queue_len(&lane)?);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Status { runs } => {
            let store = open_store(&config)?;
            print_status(&store, runs)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn open_store(config: &config::RecoveryConfig) -> Result<RecoveryStore> {
    if let Some(parent) = config.database_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
    }
    RecoveryStore::open(&config.database_path)
        .with_context(|| format!("failed to open {}", config.database_path.display()))
}

fn print_outcome(outcome: &JobOutcome) -> Result<()> {
    println!("{} {} run_id={}", outcome.job, outcome.status, outcome.run_id);
    if let Some(message) = &outcome.message {
        println!("reason: {message}");
    }
    println!("{}", serde_json::to_string_pretty(&outcome.report)?);
    Ok(())
}

fn print_status(store: &RecoveryStore, runs: usize) -> Result<()> {
    println!("staging (not completed)");
    for area in StagingArea::ALL {
        println!("  {:<24} {}", area.as_str(), store.count_not_completed(area)?);
    }

    println!("queue lanes");
    let lanes = store.lane_lengths()?;
    if lanes.is_empty() {
        println!("  (empty)");
    }
    for (lane, length) in lanes {
        println!("  {lane:<24} {length}");
    }

    println!("canonical activities: {}", store.activity_count()?);

    println!("recent runs");
    for run in store.recent_runs(runs)? {
        let finished = run
            .finished_at
            .map(|at| at.to_rfc3339())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  {:<38} {:<10} {} started={} finished={}",
            run.job,
            run.state.as_str(),
            run.run_id,
            run.started_at.to_rfc3339(),
            finished
        );
    }
    Ok(())
}
