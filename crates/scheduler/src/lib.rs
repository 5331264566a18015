//! Periodically triggers a job on a fixed interval.
//!
//! `start` is a blocking loop: at each tick it invokes a change check, and
//! invokes the pipeline only when the check reports `Changed`. Ticks are
//! fixed-period, not drift-compensated (core specification §4.11) — this
//! crate does not attempt to account for how long a run takes before
//! scheduling the next tick. Stop happens via `tokio_util`'s
//! `CancellationToken`, the same cancellation primitive already in the
//! workspace's dependency stack for cooperative shutdown elsewhere.

use getl_core::{GetlError, Job};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// The result of a scheduler change check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOutcome {
    Changed,
    Unchanged,
}

/// Blocks, ticking every `interval`, until `cancel` is triggered. At each
/// tick, calls `check_fn`; if it reports `CheckOutcome::Changed`, calls
/// `run_fn`. Errors from either callback are logged and do not stop the
/// scheduler — only cancellation does.
pub async fn start<C, CFut, R, RFut>(
    interval: Duration,
    cancel: CancellationToken,
    mut check_fn: C,
    mut run_fn: R,
) where
    C: FnMut() -> CFut,
    CFut: Future<Output = anyhow::Result<CheckOutcome>>,
    R: FnMut() -> RFut,
    RFut: Future<Output = anyhow::Result<()>>,
{
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("scheduler stopped via cancellation");
                return;
            }
            _ = ticker.tick() => {
                match check_fn().await {
                    Ok(CheckOutcome::Changed) => {
                        if let Err(e) = run_fn().await {
                            tracing::error!(error = %e, "scheduled pipeline run failed");
                        }
                    }
                    Ok(CheckOutcome::Unchanged) => {
                        tracing::debug!("scheduler check reported no change, skipping run");
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "scheduler change check failed");
                    }
                }
            }
        }
    }
}

/// A change check that always reports `Changed` — the default when a job
/// does not opt into `needCheck`, so the pipeline runs on every tick.
pub async fn always_changed() -> anyhow::Result<CheckOutcome> {
    Ok(CheckOutcome::Changed)
}

/// The default `needCheck`/`checkMethod` implementation (core
/// specification §9 Open Question, resolved in SPEC_FULL.md §4.11): hashes
/// the rows the source currently reports and compares against
/// `previous_hash`. Returns the outcome alongside the hash so the caller
/// can persist it into `SyncState.last_row_hash` for the next tick.
pub async fn row_hash_check(job: &Job, previous_hash: Option<u64>) -> Result<(CheckOutcome, u64), GetlError> {
    let (source, _columns) = getl_extractor::extract(job).await?;
    let rows = getl_extractor::collect_all(source).await?;
    let hash = hash_rows(&rows);
    let outcome = match previous_hash {
        Some(prev) if prev == hash => CheckOutcome::Unchanged,
        _ => CheckOutcome::Changed,
    };
    Ok((outcome, hash))
}

const FNV_OFFSET_BASIS: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x100000001b3;

/// FNV-1a over every row's `format_for_hash()` rendering, concatenated in
/// row order — deterministic for a fixed row sequence, which is what lets
/// the row-hash check detect "nothing changed" across ticks.
pub fn hash_rows(rows: &[getl_core::Row]) -> u64 {
    let mut hash = FNV_OFFSET_BASIS;
    for row in rows {
        for byte in row.format_for_hash().as_bytes() {
            hash ^= *byte as u64;
            hash = hash.wrapping_mul(FNV_PRIME);
        }
    }
    hash
}
