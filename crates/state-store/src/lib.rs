//! Atomic per-job watermark persistence.
//!
//! A [`SyncState`] is the durable record of how far a job's incremental
//! sync has progressed. It is read once at the start of a run (by
//! `getl-incremental`) and written once after a successful load. The store
//! is single-writer per path — concurrent runs of the same job are the
//! caller's responsibility to prevent (core specification §5).

use chrono::{DateTime, Utc};
use getl_core::GetlError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The persisted watermark for one job, per the core specification's §3
/// data model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncState {
    pub source_table: String,
    pub destination_table: String,
    pub strategy: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub records_processed: u64,
    #[serde(default)]
    pub total_records: u64,
    /// FNV-1a hash of the last extracted batch, used by the Scheduler's
    /// `needCheck`/`checkMethod` row-hash change detection. Additive: a
    /// state file written before this field existed deserializes with
    /// `None` here.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_row_hash: Option<u64>,
}

impl SyncState {
    /// A fresh, empty state for `source_table`/`destination_table` under
    /// `strategy`, as used the first time a job runs.
    pub fn empty(source_table: &str, destination_table: &str, strategy: &str) -> SyncState {
        SyncState {
            source_table: source_table.to_string(),
            destination_table: destination_table.to_string(),
            strategy: strategy.to_string(),
            last_sync_value: None,
            last_sync_time: None,
            records_processed: 0,
            total_records: 0,
            last_row_hash: None,
        }
    }
}

/// Derives the default state file path for a job when
/// `incrementalSync.stateFile` is not set, per core specification §6:
/// `<tmp>/getl-state-<source>-<destination>.json`.
pub fn default_state_path(source_table: &str, destination_table: &str) -> PathBuf {
    std::env::temp_dir().join(format!(
        "getl-state-{source_table}-{destination_table}.json"
    ))
}

/// Reads the state at `path`. A missing file is empty state, not an error —
/// this is the first-run case. A present-but-unparseable file is an error.
pub fn load(path: &Path) -> Result<Option<SyncState>, GetlError> {
    match std::fs::read_to_string(path) {
        Ok(text) => {
            let state = serde_json::from_str(&text).map_err(|e| GetlError::IoFailed {
                path: path.display().to_string(),
                source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
            })?;
            Ok(Some(state))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(GetlError::IoFailed {
            path: path.display().to_string(),
            source: e,
        }),
    }
}

/// Writes `state` to `path` atomically (temp file in the same directory,
/// then rename), creating intermediate directories with mode 0755 and the
/// file with mode 0644 on Unix. A crash mid-write leaves either the old
/// file or the new one intact, never a half-written file — this is what
/// lets property 5 (at-least-once delivery) hold in the direction "state
/// advanced but unreadable" rather than silently losing the watermark.
pub fn save(path: &Path, state: &SyncState) -> Result<(), GetlError> {
    let to_io_err = |e: std::io::Error| GetlError::IoFailed {
        path: path.display().to_string(),
        source: e,
    };

    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            create_dir_all_0755(dir).map_err(to_io_err)?;
        }
    }

    let json = serde_json::to_string_pretty(state).map_err(|e| GetlError::IoFailed {
        path: path.display().to_string(),
        source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
    })?;

    let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| Path::new("."));
    let tmp_path = dir.join(format!(
        ".{}.tmp",
        path.file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("getl-state")
    ));

    std::fs::write(&tmp_path, json.as_bytes()).map_err(to_io_err)?;
    set_file_mode_0644(&tmp_path).map_err(to_io_err)?;
    std::fs::rename(&tmp_path, path).map_err(to_io_err)?;

    tracing::debug!(path = %path.display(), "wrote sync state");
    Ok(())
}

#[cfg(unix)]
fn create_dir_all_0755(dir: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    std::fs::DirBuilder::new()
        .recursive(true)
        .mode(0o755)
        .create(dir)
}

#[cfg(not(unix))]
fn create_dir_all_0755(dir: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)
}

#[cfg(unix)]
fn set_file_mode_0644(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o644))
}

#[cfg(not(unix))]
fn set_file_mode_0644(_path: &Path) -> std::io::Result<()> {
    Ok(())
}
