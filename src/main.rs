//! Command-line interface for getl.
//!
//! # Usage Examples
//!
//! ```bash
//! # One-shot sync, run once and exit
//! getl run --job job.json
//!
//! # Periodic sync on job.syncInterval seconds, until Ctrl-C
//! getl schedule --job job.json
//!
//! # Stream a job's source rows onto a Kafka topic
//! getl kafka produce --job job.json
//!
//! # Load a job's destination table from a Kafka topic
//! getl kafka consume --job job.json
//! ```

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use getl_core::JobConfig;
use getl_scheduler::CheckOutcome;
use getl::pipeline::{self, RunOutcome, RunState};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "getl")]
#[command(about = "Configurable ETL engine for syncing tabular data across heterogeneous relational databases")]
#[command(long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a job once and exit.
    Run(JobArgs),
    /// Run a job on its configured interval until interrupted.
    Schedule(JobArgs),
    /// Kafka Bridge: produce to or consume from a topic.
    Kafka {
        #[command(subcommand)]
        command: KafkaCommand,
    },
}

#[derive(Args)]
struct JobArgs {
    /// Path to a job descriptor file (JSON, YAML, or TOML, by extension).
    #[arg(long)]
    job: PathBuf,
}

#[derive(Subcommand)]
enum KafkaCommand {
    /// Extract a job's source rows and produce one message per row.
    Produce(JobArgs),
    /// Consume messages from a job's topic and load them into its destination.
    Consume {
        #[command(flatten)]
        job: JobArgs,
        /// Stop after this many messages instead of consuming indefinitely.
        #[arg(long)]
        max_messages: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = run().await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}

async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => run_once(args).await?,
        Commands::Schedule(args) => run_scheduled(args).await?,
        Commands::Kafka { command } => match command {
            KafkaCommand::Produce(args) => run_kafka_produce(args).await?,
            KafkaCommand::Consume { job, max_messages } => {
                run_kafka_consume(job, max_messages).await?
            }
        },
    }

    Ok(())
}

fn load_job(args: &JobArgs) -> anyhow::Result<getl_core::Job> {
    JobConfig::load(&args.job)
        .with_context(|| format!("loading job descriptor '{}'", args.job.display()))
}

async fn run_once(args: JobArgs) -> anyhow::Result<()> {
    let job = load_job(&args)?;
    let outcome = pipeline::run_job(&job)
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))
        .with_context(|| format!("running job '{}' -> '{}'", job.source_table, job.destination_table))?;
    report_outcome(&outcome);
    Ok(())
}

fn report_outcome(outcome: &RunOutcome) {
    match outcome.state {
        RunState::Done => {
            tracing::info!(rows_loaded = outcome.rows_loaded, "sync run complete");
        }
        RunState::PartialFailure => {
            tracing::warn!(
                rows_loaded = outcome.rows_loaded,
                reason = outcome.partial_failure_reason.as_deref().unwrap_or(""),
                "sync run loaded rows but failed to persist watermark; next run will re-deliver"
            );
        }
        _ => unreachable!("run_job only returns Done or PartialFailure on success"),
    }
}

async fn run_scheduled(args: JobArgs) -> anyhow::Result<()> {
    let job = load_job(&args)?;
    let interval_secs = job
        .sync_interval
        .ok_or_else(|| anyhow::anyhow!("job has no syncInterval; cannot schedule"))?;

    let cancel = CancellationToken::new();
    let cancel_for_signal = cancel.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("received Ctrl-C, stopping scheduler");
        cancel_for_signal.cancel();
    });

    let need_check = job.need_check;
    let state_path = getl_incremental::state_path(&job);
    let check_job = job.clone();
    let run_job_clone = job.clone();

    getl_scheduler::start(
        std::time::Duration::from_secs(interval_secs),
        cancel,
        move || {
            let job = check_job.clone();
            let state_path = state_path.clone();
            async move {
                if !need_check {
                    return Ok(CheckOutcome::Changed);
                }
                let previous_hash = getl_state_store::load(&state_path)
                    .ok()
                    .flatten()
                    .and_then(|s| s.last_row_hash);
                let (outcome, hash) = getl_scheduler::row_hash_check(&job, previous_hash).await?;
                let mut state = getl_state_store::load(&state_path)?.unwrap_or_else(|| {
                    let strategy = match job.incremental_sync.as_ref().map(|s| s.strategy) {
                        Some(getl_core::IncrementalStrategy::Full) | None => "full",
                        Some(getl_core::IncrementalStrategy::Timestamp) => "timestamp",
                        Some(getl_core::IncrementalStrategy::PrimaryKey) => "primary_key",
                        Some(getl_core::IncrementalStrategy::Hash) => "hash",
                    };
                    getl_state_store::SyncState::empty(&job.source_table, &job.destination_table, strategy)
                });
                state.last_row_hash = Some(hash);
                getl_state_store::save(&state_path, &state)?;
                Ok(outcome)
            }
        },
        move || {
            let job = run_job_clone.clone();
            async move {
                let outcome = pipeline::run_job(&job)
                    .await
                    .map_err(|e| anyhow::anyhow!("{e}"))?;
                report_outcome(&outcome);
                Ok(())
            }
        },
    )
    .await;

    Ok(())
}

async fn run_kafka_produce(args: JobArgs) -> anyhow::Result<()> {
    let job = load_job(&args)?;
    let report = getl_kafka_bridge::produce(&job)
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))
        .context("producing to kafka")?;
    tracing::info!(rows_sent = report.rows_sent, "kafka produce complete");
    Ok(())
}

async fn run_kafka_consume(args: JobArgs, max_messages: Option<usize>) -> anyhow::Result<()> {
    let job = load_job(&args)?;
    let report = getl_kafka_bridge::consume(&job, max_messages)
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))
        .context("consuming from kafka")?;
    tracing::info!(
        rows_loaded = report.rows_loaded,
        rows_skipped_deserialize = report.rows_skipped_deserialize,
        rows_failed_load = report.rows_failed_load,
        "kafka consume complete"
    );
    Ok(())
}
