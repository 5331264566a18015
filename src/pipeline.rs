//! Drives one end-to-end synchronization run: the state machine in the
//! core specification's §4 closing note, wired through every component
//! crate in the fixed order Planning → Extracting → Transforming →
//! Ensuring → Loading → Persisting → Done.
//!
//! This module holds no global state of its own — every call to
//! [`run_job`] opens its own connections and closes them before returning,
//! per the core specification's "no cross-run pooling" resource policy
//! (§5). Per-job mutual exclusion (at most one active run per job) is
//! enforced by [`JobLocks`], held by the CLI/Scheduler layer rather than
//! by the pipeline itself.

use getl_core::{GetlError, Job, Row};
use getl_loader::RowSink;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// One arm of the linear pipeline-run state machine (core specification
/// §4 closing note). Terminal states are `Done` and `PartialFailure`; every
/// other non-`Idle` state that does not reach `Done` corresponds to the
/// stage recorded in a returned [`RunError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Planning,
    Extracting,
    Transforming,
    Ensuring,
    Loading,
    Persisting,
    Done,
    /// Load succeeded but the state write afterward failed: data moved,
    /// the watermark did not advance. The next run will re-deliver at
    /// least the last batch.
    PartialFailure,
}

/// A pipeline run that reached a terminal, non-error state.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub state: RunState,
    pub rows_loaded: usize,
    /// Set only when `state == PartialFailure`: why the state write failed.
    pub partial_failure_reason: Option<String>,
}

/// A pipeline run that aborted partway through, naming which stage failed
/// and the underlying error. The transaction (if one was open) has
/// already been rolled back and state has not advanced by the time this
/// is returned.
#[derive(Debug, thiserror::Error)]
#[error("getl run failed during {state:?}: {source}")]
pub struct RunError {
    pub state: RunState,
    #[source]
    pub source: GetlError,
}

fn stage_err(state: RunState) -> impl Fn(GetlError) -> RunError {
    move |source| RunError { state, source }
}

/// Runs `job` end to end: plans (incremental watermark rewrite), extracts,
/// transforms, ensures the destination schema, loads within a single
/// transaction, optionally writes a File-Sink copy, and persists the
/// advanced watermark. Matches the linear state machine in the core
/// specification §4: on any error the open transaction (if any) is rolled
/// back and state is not advanced.
pub async fn run_job(job: &Job) -> Result<RunOutcome, RunError> {
    // Planning
    let state_path = getl_incremental::state_path(job);
    let previous_state =
        getl_state_store::load(&state_path).map_err(stage_err(RunState::Planning))?;
    let planned_job =
        getl_incremental::plan(job, previous_state.as_ref()).map_err(stage_err(RunState::Planning))?;

    // Extracting
    let (source, columns) = getl_extractor::extract(&planned_job)
        .await
        .map_err(stage_err(RunState::Extracting))?;
    let extracted_rows = getl_extractor::collect_all(source)
        .await
        .map_err(stage_err(RunState::Extracting))?;

    // Transforming
    let rows = getl_transformer::transform(extracted_rows, &planned_job.transformations)
        .map_err(stage_err(RunState::Transforming))?;

    // Ensuring
    let mut destination = getl_schema_sync::connect(&planned_job)
        .await
        .map_err(stage_err(RunState::Ensuring))?;
    getl_schema_sync::ensure(
        &mut destination,
        &planned_job.destination_table,
        &columns,
        planned_job.update_key.as_deref(),
    )
    .await
    .map_err(stage_err(RunState::Ensuring))?;

    // Loading
    let mut loader = getl_loader::Loader::new(
        destination,
        planned_job.destination_table.clone(),
        planned_job.update_key.clone(),
    );
    load_rows(&mut loader, &rows)
        .await
        .map_err(stage_err(RunState::Loading))?;

    write_file_sink(&planned_job, &rows).map_err(stage_err(RunState::Loading))?;

    // Persisting
    match getl_incremental::compute_next_state(&planned_job, previous_state.as_ref(), &rows) {
        None => Ok(RunOutcome {
            state: RunState::Done,
            rows_loaded: rows.len(),
            partial_failure_reason: None,
        }),
        Some(next_state) => match getl_state_store::save(&state_path, &next_state) {
            Ok(()) => Ok(RunOutcome {
                state: RunState::Done,
                rows_loaded: rows.len(),
                partial_failure_reason: None,
            }),
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    rows_loaded = rows.len(),
                    "state write failed after a successful load; next run will re-deliver this batch"
                );
                Ok(RunOutcome {
                    state: RunState::PartialFailure,
                    rows_loaded: rows.len(),
                    partial_failure_reason: Some(e.to_string()),
                })
            }
        },
    }
}

async fn load_rows(loader: &mut getl_loader::Loader, rows: &[Row]) -> Result<(), GetlError> {
    loader.begin().await?;
    match loader.write(rows).await {
        Ok(()) => loader.commit().await,
        Err(e) => {
            let _ = loader.rollback().await;
            Err(e)
        }
    }
}

fn write_file_sink(job: &Job, rows: &[Row]) -> Result<(), GetlError> {
    let (Some(path), Some(format_token)) = (&job.output_path, &job.output_format) else {
        return Ok(());
    };
    let format = getl_file_sink::Format::from_token(format_token)?;
    getl_file_sink::save(Path::new(path), rows, format)
}

/// Per-job mutual exclusion: at most one active run per job identity at a
/// time (core specification §5). Identity is the `(source_table,
/// destination_table)` pair, matching the same pair `getl-state-store`
/// derives its default state path from.
#[derive(Default)]
pub struct JobLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl JobLocks {
    pub fn new() -> JobLocks {
        JobLocks::default()
    }

    fn identity(job: &Job) -> String {
        format!("{}->{}", job.source_table, job.destination_table)
    }

    /// Acquires the lock for `job`'s identity, blocking until any other
    /// in-flight run of the same job releases it. Runs of *different*
    /// jobs proceed concurrently, unaffected by this call.
    pub async fn acquire(&self, job: &Job) -> OwnedMutexGuard<()> {
        let entry = {
            let mut locks = self.locks.lock().await;
            locks
                .entry(Self::identity(job))
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        entry.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_job() -> Job {
        serde_json::from_value(serde_json::json!({
            "sourceType": "sqlite",
            "sourceConnectionString": "file:src.db",
            "destinationType": "sqlite",
            "destinationConnectionString": "file:dst.db",
            "sourceTable": "users",
            "destinationTable": "users"
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn job_locks_serialize_same_job_identity() {
        let locks = Arc::new(JobLocks::new());
        let job = sample_job();

        let guard1 = locks.acquire(&job).await;
        let locks2 = locks.clone();
        let job_ref = job.clone();
        let acquired_second = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let acquired_second2 = acquired_second.clone();

        let handle = tokio::spawn(async move {
            let _guard2 = locks2.acquire(&job_ref).await;
            acquired_second2.store(true, std::sync::atomic::Ordering::SeqCst);
        });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!acquired_second.load(std::sync::atomic::Ordering::SeqCst));

        drop(guard1);
        handle.await.unwrap();
        assert!(acquired_second.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn job_locks_different_identities_do_not_block() {
        let locks = JobLocks::new();
        let mut job_a = sample_job();
        job_a.destination_table = "a".to_string();
        let mut job_b = sample_job();
        job_b.destination_table = "b".to_string();

        let _guard_a = locks.acquire(&job_a).await;
        let guard_b = tokio::time::timeout(std::time::Duration::from_millis(50), locks.acquire(&job_b)).await;
        assert!(guard_b.is_ok());
    }
}
