//! Rewrites a job's `SELECT` to restrict extraction to unseen rows, and
//! computes the post-run watermark advance.
//!
//! `plan` is called once at the start of a run, before the Extractor opens
//! its source connection; `compute_next_state` is called once after the
//! Loader commits, with the rows actually loaded. The two halves are kept
//! separate rather than fused into one stateful object, matching the
//! core specification's framing of the Planner as "rewrite, then a
//! post-run callback" (§4.9) rather than a component that outlives a run.

use chrono::Utc;
use getl_core::{GetlError, IncrementalStrategy, Job, Row};
use getl_state_store::SyncState;
use std::path::PathBuf;

/// Resolves the state file path for `job`: `incrementalSync.stateFile` when
/// set, otherwise the derived default from the source/destination table
/// pair (core specification §6).
pub fn state_path(job: &Job) -> PathBuf {
    if let Some(configured) = job
        .incremental_sync
        .as_ref()
        .and_then(|i| i.state_file.as_deref())
    {
        return PathBuf::from(configured);
    }
    getl_state_store::default_state_path(&job.source_table, &job.destination_table)
}

/// Rewrites `job`'s `WHERE`/`ORDER BY` to restrict extraction to rows not
/// yet seen, per `job.incremental_sync.strategy` and the previously
/// persisted `state`. Returns `job` unchanged when incremental sync is
/// disabled, absent, or the strategy is `full`/`hash` (`hash` is reserved
/// and currently aliases `full`, per spec.md §4.9/§9).
pub fn plan(job: &Job, state: Option<&SyncState>) -> Result<Job, GetlError> {
    let Some(incremental) = job.incremental_sync.as_ref().filter(|i| i.enabled) else {
        return Ok(job.clone());
    };

    match incremental.strategy {
        IncrementalStrategy::Full | IncrementalStrategy::Hash => Ok(job.clone()),
        IncrementalStrategy::Timestamp => {
            let field = incremental.timestamp_field.as_deref().ok_or_else(|| {
                GetlError::BadConfig(
                    "incremental strategy timestamp requires incrementalSync.timestampField"
                        .to_string(),
                )
            })?;
            let mut planned = job.clone();
            let last_value = state.and_then(|s| s.last_sync_value.as_deref());
            append_watermark_clause(&mut planned, field, last_value, true);
            Ok(planned)
        }
        IncrementalStrategy::PrimaryKey => {
            let field = job.primary_key.as_deref().ok_or_else(|| {
                GetlError::BadConfig(
                    "incremental strategy primary_key requires primaryKey".to_string(),
                )
            })?;
            let mut planned = job.clone();
            let last_value = state.and_then(|s| s.last_sync_value.as_deref());
            append_watermark_clause(&mut planned, field, last_value, false);
            Ok(planned)
        }
    }
}

/// Appends `<field> > <last_value>` to `job`'s `WHERE` clause (introducing
/// one if absent, conjoining with `AND` otherwise) when a prior watermark
/// exists, and ensures `ORDER BY` mentions `field` so watermark advance
/// stays monotonic end-to-end. `quote` controls whether `last_value` is
/// rendered as a quoted string literal (timestamp strategy) or a bare
/// numeric literal (primary-key strategy).
fn append_watermark_clause(job: &mut Job, field: &str, last_value: Option<&str>, quote: bool) {
    if let Some(value) = last_value {
        let rendered = if quote {
            format!("'{value}'")
        } else {
            value.to_string()
        };
        let clause = format!("{field} > {rendered}");
        job.where_clause = Some(match job.where_clause.take() {
            Some(existing) => format!("{existing} AND {clause}"),
            None => clause,
        });
    }

    match &mut job.order_by {
        None => job.order_by = Some(field.to_string()),
        Some(existing) => {
            if !existing.split(',').any(|c| c.trim().eq_ignore_ascii_case(field)) {
                existing.push_str(&format!(", {field}"));
            }
        }
    }
}

/// Computes the watermark advance after a successful load, or `None` when
/// state must be left unchanged: `full`/`hash` strategies never advance
/// state, and `timestamp`/`primary_key` leave state unchanged when the
/// batch loaded zero rows (core specification §4.9).
///
/// The caller is responsible for persisting the returned state via
/// `getl-state-store::save`; if that write fails, the run is
/// `PartialFailure` and this function must not be called again for the
/// same batch (the next run re-derives the watermark from whatever state
/// was last successfully persisted).
pub fn compute_next_state(
    job: &Job,
    previous: Option<&SyncState>,
    loaded_rows: &[Row],
) -> Option<SyncState> {
    let incremental = job.incremental_sync.as_ref().filter(|i| i.enabled)?;

    let field = match incremental.strategy {
        IncrementalStrategy::Full | IncrementalStrategy::Hash => return None,
        IncrementalStrategy::Timestamp => incremental.timestamp_field.as_deref()?,
        IncrementalStrategy::PrimaryKey => job.primary_key.as_deref()?,
    };

    if loaded_rows.is_empty() {
        return None;
    }

    let max_value = match incremental.strategy {
        IncrementalStrategy::Timestamp => max_by_lexical_or_parsed_time(loaded_rows, field)?,
        IncrementalStrategy::PrimaryKey => max_by_numeric(loaded_rows, field)?,
        IncrementalStrategy::Full | IncrementalStrategy::Hash => unreachable!(),
    };

    let strategy_token = match incremental.strategy {
        IncrementalStrategy::Full => "full",
        IncrementalStrategy::Timestamp => "timestamp",
        IncrementalStrategy::PrimaryKey => "primary_key",
        IncrementalStrategy::Hash => "hash",
    };

    let mut next = previous.cloned().unwrap_or_else(|| {
        SyncState::empty(&job.source_table, &job.destination_table, strategy_token)
    });
    next.last_sync_value = Some(max_value);
    next.last_sync_time = Some(Utc::now());
    next.records_processed = loaded_rows.len() as u64;
    next.total_records = next.total_records.saturating_add(loaded_rows.len() as u64);
    Some(next)
}

/// The maximum value of `field` across `rows`, compared as an RFC 3339
/// timestamp when every value parses as one, falling back to lexical
/// string comparison otherwise (e.g. a source that reports timestamps as
/// opaque driver-formatted text).
fn max_by_lexical_or_parsed_time(rows: &[Row], field: &str) -> Option<String> {
    let rendered: Vec<String> = rows
        .iter()
        .filter_map(|r| r.get(field))
        .map(|v| v.format_for_hash())
        .collect();
    if rendered.is_empty() {
        return None;
    }

    let all_parse = rendered
        .iter()
        .all(|s| chrono::DateTime::parse_from_rfc3339(s).is_ok());
    if all_parse {
        rendered
            .iter()
            .max_by_key(|s| chrono::DateTime::parse_from_rfc3339(s).unwrap())
            .cloned()
    } else {
        rendered.into_iter().max()
    }
}

/// The maximum value of `field` across `rows`, compared numerically.
fn max_by_numeric(rows: &[Row], field: &str) -> Option<String> {
    rows.iter()
        .filter_map(|r| r.get(field))
        .filter_map(|v| match v {
            getl_core::Value::Int(i) => Some(*i),
            getl_core::Value::Text(s) => s.trim().parse::<i64>().ok(),
            _ => None,
        })
        .max()
        .map(|n| n.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use getl_core::{IncrementalSync, Value};

    fn base_job() -> Job {
        serde_json::from_value(serde_json::json!({
            "sourceType": "sqlite",
            "sourceConnectionString": "file:src.db",
            "destinationType": "sqlite",
            "destinationConnectionString": "file:dst.db",
            "sourceTable": "events",
            "destinationTable": "events"
        }))
        .unwrap()
    }

    fn row(id: i64, ts: &str) -> Row {
        Row::new(
            vec!["id".into(), "ts".into()],
            vec![Value::Int(id), Value::Text(ts.into())],
        )
    }

    #[test]
    fn full_strategy_does_not_rewrite() {
        let mut job = base_job();
        job.incremental_sync = Some(IncrementalSync {
            enabled: true,
            strategy: IncrementalStrategy::Full,
            timestamp_field: None,
            last_sync_value: None,
            state_file: None,
            batch_size: None,
        });
        let planned = plan(&job, None).unwrap();
        assert_eq!(planned.where_clause, None);
        assert_eq!(planned.order_by, None);
    }

    #[test]
    fn disabled_incremental_sync_does_not_rewrite() {
        let job = base_job();
        let planned = plan(&job, None).unwrap();
        assert_eq!(planned, job);
    }

    #[test]
    fn scenario_s3_first_run_no_prior_state_adds_order_by_only() {
        let mut job = base_job();
        job.incremental_sync = Some(IncrementalSync {
            enabled: true,
            strategy: IncrementalStrategy::Timestamp,
            timestamp_field: Some("ts".into()),
            last_sync_value: None,
            state_file: None,
            batch_size: None,
        });
        let planned = plan(&job, None).unwrap();
        assert_eq!(planned.where_clause, None);
        assert_eq!(planned.order_by.as_deref(), Some("ts"));
    }

    #[test]
    fn scenario_s3_second_run_filters_on_prior_watermark() {
        let mut job = base_job();
        job.incremental_sync = Some(IncrementalSync {
            enabled: true,
            strategy: IncrementalStrategy::Timestamp,
            timestamp_field: Some("ts".into()),
            last_sync_value: None,
            state_file: None,
            batch_size: None,
        });
        let state = SyncState {
            last_sync_value: Some("2024-01-01T00:00:03Z".into()),
            ..SyncState::empty("events", "events", "timestamp")
        };
        let planned = plan(&job, Some(&state)).unwrap();
        assert_eq!(
            planned.where_clause.as_deref(),
            Some("ts > '2024-01-01T00:00:03Z'")
        );
    }

    #[test]
    fn existing_where_clause_is_conjoined_with_and() {
        let mut job = base_job();
        job.where_clause = Some("active = 1".into());
        job.incremental_sync = Some(IncrementalSync {
            enabled: true,
            strategy: IncrementalStrategy::Timestamp,
            timestamp_field: Some("ts".into()),
            last_sync_value: None,
            state_file: None,
            batch_size: None,
        });
        let state = SyncState {
            last_sync_value: Some("2024-01-01T00:00:03Z".into()),
            ..SyncState::empty("events", "events", "timestamp")
        };
        let planned = plan(&job, Some(&state)).unwrap();
        assert_eq!(
            planned.where_clause.as_deref(),
            Some("active = 1 AND ts > '2024-01-01T00:00:03Z'")
        );
    }

    #[test]
    fn primary_key_strategy_compares_numerically_without_quotes() {
        let mut job = base_job();
        job.primary_key = Some("id".into());
        job.incremental_sync = Some(IncrementalSync {
            enabled: true,
            strategy: IncrementalStrategy::PrimaryKey,
            timestamp_field: None,
            last_sync_value: None,
            state_file: None,
            batch_size: None,
        });
        let state = SyncState {
            last_sync_value: Some("5".into()),
            ..SyncState::empty("events", "events", "primary_key")
        };
        let planned = plan(&job, Some(&state)).unwrap();
        assert_eq!(planned.where_clause.as_deref(), Some("id > 5"));
    }

    #[test]
    fn compute_next_state_zero_rows_leaves_state_unchanged() {
        let mut job = base_job();
        job.incremental_sync = Some(IncrementalSync {
            enabled: true,
            strategy: IncrementalStrategy::Timestamp,
            timestamp_field: Some("ts".into()),
            last_sync_value: None,
            state_file: None,
            batch_size: None,
        });
        assert!(compute_next_state(&job, None, &[]).is_none());
    }

    #[test]
    fn compute_next_state_timestamp_takes_max_loaded_value() {
        let mut job = base_job();
        job.incremental_sync = Some(IncrementalSync {
            enabled: true,
            strategy: IncrementalStrategy::Timestamp,
            timestamp_field: Some("ts".into()),
            last_sync_value: None,
            state_file: None,
            batch_size: None,
        });
        let rows = vec![
            row(1, "2024-01-01T00:00:01Z"),
            row(2, "2024-01-01T00:00:03Z"),
            row(3, "2024-01-01T00:00:02Z"),
        ];
        let next = compute_next_state(&job, None, &rows).unwrap();
        assert_eq!(next.last_sync_value.as_deref(), Some("2024-01-01T00:00:03Z"));
        assert_eq!(next.records_processed, 3);
    }

    #[test]
    fn compute_next_state_full_strategy_never_advances() {
        let mut job = base_job();
        job.incremental_sync = Some(IncrementalSync {
            enabled: true,
            strategy: IncrementalStrategy::Full,
            timestamp_field: None,
            last_sync_value: None,
            state_file: None,
            batch_size: None,
        });
        let rows = vec![row(1, "2024-01-01T00:00:01Z")];
        assert!(compute_next_state(&job, None, &rows).is_none());
    }

    #[test]
    fn state_path_prefers_configured_state_file() {
        let mut job = base_job();
        job.incremental_sync = Some(IncrementalSync {
            enabled: true,
            strategy: IncrementalStrategy::Full,
            timestamp_field: None,
            last_sync_value: None,
            state_file: Some("/tmp/custom-state.json".into()),
            batch_size: None,
        });
        assert_eq!(state_path(&job), PathBuf::from("/tmp/custom-state.json"));
    }

    #[test]
    fn state_path_falls_back_to_default_derivation() {
        let job = base_job();
        let path = state_path(&job);
        assert!(path.to_str().unwrap().contains("getl-state-events-events"));
    }
}
