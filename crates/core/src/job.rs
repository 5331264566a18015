//! The declarative unit of work loaded from a job descriptor file.
//!
//! A [`Job`] fully describes one synchronization run: source and
//! destination connections, the table/query pair to extract, the joins and
//! filters the Query-Builder assembles, the transformations to apply, an
//! optional incremental-sync configuration, and the optional File-Sink and
//! Kafka-Bridge configuration. [`JobConfig`] is the on-disk loader for this
//! type.

use crate::error::GetlError;
use crate::types::Vendor;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One entry in a job's `transformations` list: which destination column
/// it produces, from which source column, and by which operation.
///
/// `op` is kept as a raw string rather than a closed enum here: the
/// operator set is closed by contract (`getl-transformer` rejects anything
/// outside `copy, none, uppercase, base64, toInt` with `UnknownOp`), but an
/// unrecognized operation in a job descriptor must surface that error
/// *from the transformer at run time*, naming the operation that was
/// requested, rather than fail job parsing itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transformation {
    pub destination: String,
    pub op: String,
    /// Source column to read. Required for every operation except `none`,
    /// which reads the source column matching `destination`'s name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// A join the Query-Builder appends to the generated `SELECT`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Join {
    /// `INNER`, `LEFT`, or `RIGHT` (case-insensitive).
    pub join_type: String,
    pub table: String,
    /// The `ON` condition, passed through verbatim.
    pub on: String,
}

/// The closed set of incremental-sync strategies.
///
/// `Hash` is accepted in job descriptors but currently behaves as `Full`
/// (see `getl-incremental`); it is recognized rather than rejected so that
/// job descriptors naming it keep working once it gains a real
/// implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncrementalStrategy {
    Full,
    Timestamp,
    PrimaryKey,
    Hash,
}

/// Incremental-sync configuration for a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncrementalSync {
    #[serde(default)]
    pub enabled: bool,
    pub strategy: IncrementalStrategy,
    /// Column the `timestamp` strategy advances on. Required when
    /// `strategy == timestamp`, ignored otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp_field: Option<String>,
    /// Watermark value seeded from config rather than from the state
    /// store; usually left unset and populated by `getl-state-store` at
    /// run time instead.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,
}

/// The full description of one synchronization job, as loaded from a job
/// descriptor file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub source_type: Vendor,
    pub source_connection_string: String,
    pub destination_type: Vendor,
    pub destination_connection_string: String,

    pub source_table: String,
    pub destination_table: String,

    /// A raw SQL query that, when present, the Query-Builder returns
    /// unchanged instead of composing one from `source_table`/joins/where.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sql_query: Option<String>,

    /// Columns to select from the source. An empty list means "all
    /// columns", resolved against source metadata at extraction time.
    #[serde(default)]
    pub fields: Vec<String>,

    #[serde(default)]
    pub joins: Vec<Join>,
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "where")]
    pub where_clause: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_by: Option<String>,

    #[serde(default)]
    pub transformations: Vec<Transformation>,

    /// The column the `primary_key` incremental strategy advances on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_key: Option<String>,

    /// The column (or comma-joined column list) the Loader upserts on. A
    /// plain append-only insert is used when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub incremental_sync: Option<IncrementalSync>,

    /// Whether the Scheduler should run a row-hash change check before
    /// invoking the pipeline (core specification §4.11, the
    /// `needCheck`/`checkMethod` design).
    #[serde(default)]
    pub need_check: bool,
    /// Reserved for a future non-hash check method; currently only the
    /// row-hash check is implemented, so any value here is informational.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check_method: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_format: Option<String>,

    /// Inert pass-through configuration for database triggers/DDL hooks,
    /// not invoked by the sync pipeline (core specification §9 Open
    /// Question, resolved as "keep, don't invoke").
    #[serde(default)]
    pub triggers: Vec<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_table: Option<String>,

    /// Scheduler tick interval in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_interval: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kafka_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kafka_topic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kafka_group_id: Option<String>,
}

/// Loads and validates a [`Job`] from a job descriptor file.
///
/// The format is selected by file extension: `.yaml`/`.yml` parses as
/// YAML, `.toml` parses as TOML, and everything else (including `.json`
/// and no extension at all) parses as JSON, which remains the canonical
/// format.
pub struct JobConfig;

impl JobConfig {
    /// Reads `path`, parses it according to its extension, and validates
    /// the required connection fields are non-empty.
    pub fn load(path: &Path) -> Result<Job, GetlError> {
        let text = std::fs::read_to_string(path).map_err(|e| GetlError::IoFailed {
            path: path.display().to_string(),
            source: e,
        })?;
        let job = Self::parse(&text, path)?;
        Self::validate(&job)?;
        Ok(job)
    }

    fn parse(text: &str, path: &Path) -> Result<Job, GetlError> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => serde_yaml::from_str(text)
                .map_err(|e| GetlError::BadConfig(format!("invalid YAML job descriptor: {e}"))),
            Some("toml") => toml::from_str(text)
                .map_err(|e| GetlError::BadConfig(format!("invalid TOML job descriptor: {e}"))),
            _ => serde_json::from_str(text)
                .map_err(|e| GetlError::BadConfig(format!("invalid JSON job descriptor: {e}"))),
        }
    }

    fn validate(job: &Job) -> Result<(), GetlError> {
        if job.source_connection_string.trim().is_empty() {
            return Err(GetlError::BadConfig(
                "sourceConnectionString must not be empty".to_string(),
            ));
        }
        if job.destination_connection_string.trim().is_empty() {
            return Err(GetlError::BadConfig(
                "destinationConnectionString must not be empty".to_string(),
            ));
        }
        if job.source_table.trim().is_empty() && job.sql_query.is_none() {
            return Err(GetlError::BadConfig(
                "sourceTable must not be empty unless sqlQuery is set".to_string(),
            ));
        }
        if job.destination_table.trim().is_empty() {
            return Err(GetlError::BadConfig(
                "destinationTable must not be empty".to_string(),
            ));
        }
        if let Some(incremental) = &job.incremental_sync {
            match incremental.strategy {
                IncrementalStrategy::Timestamp if incremental.timestamp_field.is_none() => {
                    return Err(GetlError::BadConfig(
                        "incremental strategy timestamp requires incrementalSync.timestampField"
                            .to_string(),
                    ));
                }
                IncrementalStrategy::PrimaryKey if job.primary_key.is_none() => {
                    return Err(GetlError::BadConfig(
                        "incremental strategy primary_key requires primaryKey".to_string(),
                    ));
                }
                _ => {}
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample_json() -> &'static str {
        r#"{
            "sourceType": "sqlite",
            "sourceConnectionString": "file:src.db",
            "destinationType": "postgres",
            "destinationConnectionString": "postgres://localhost/dst",
            "sourceTable": "users",
            "destinationTable": "users",
            "fields": ["id", "name"],
            "transformations": [
                {"destination": "name", "op": "uppercase", "source": "name"}
            ],
            "updateKey": "id"
        }"#
    }

    #[test]
    fn loads_json_by_default_extension() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        file.write_all(sample_json().as_bytes()).unwrap();
        let job = JobConfig::load(file.path()).unwrap();
        assert_eq!(job.source_type, Vendor::Sqlite);
        assert_eq!(job.destination_type, Vendor::Postgres);
        assert_eq!(job.transformations.len(), 1);
    }

    #[test]
    fn rejects_empty_connection_string() {
        let bad = sample_json().replace(
            "\"sourceConnectionString\": \"file:src.db\"",
            "\"sourceConnectionString\": \"\"",
        );
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        file.write_all(bad.as_bytes()).unwrap();
        let err = JobConfig::load(file.path()).unwrap_err();
        assert_eq!(err.kind(), "BadConfig");
    }

    #[test]
    fn timestamp_strategy_requires_timestamp_field() {
        let mut job: Job = serde_json::from_str(sample_json()).unwrap();
        job.incremental_sync = Some(IncrementalSync {
            enabled: true,
            strategy: IncrementalStrategy::Timestamp,
            timestamp_field: None,
            last_sync_value: None,
            state_file: None,
            batch_size: None,
        });
        let err = JobConfig::validate(&job).unwrap_err();
        assert_eq!(err.kind(), "BadConfig");
    }

    #[test]
    fn sql_query_exempts_source_table_from_validation() {
        let mut job: Job = serde_json::from_str(sample_json()).unwrap();
        job.source_table = String::new();
        job.sql_query = Some("SELECT * FROM users".to_string());
        assert!(JobConfig::validate(&job).is_ok());
    }
}
