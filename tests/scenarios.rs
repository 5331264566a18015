//! End-to-end synchronization scenarios, driven entirely against in-process
//! SQLite databases so the suite needs no external services.
//!
//! Each test exercises one of the core specification's testable properties
//! (S1-S6) through [`getl::pipeline::run_job`], the same entry point the
//! CLI's `run` subcommand calls.

use getl::pipeline;
use getl_core::{IncrementalStrategy, IncrementalSync, Job, Transformation, Vendor};
use rusqlite::Connection;
use tempfile::tempdir;

fn job(source_db: &str, dest_db: &str) -> Job {
    serde_json::from_value(serde_json::json!({
        "sourceType": "sqlite",
        "sourceConnectionString": format!("file:{source_db}"),
        "destinationType": "sqlite",
        "destinationConnectionString": format!("file:{dest_db}"),
        "sourceTable": "users",
        "destinationTable": "users"
    }))
    .unwrap()
}

fn dest_rows(dest_db: &str, sql: &str) -> Vec<(i64, String)> {
    let conn = Connection::open(dest_db).unwrap();
    let mut stmt = conn.prepare(sql).unwrap();
    stmt.query_map([], |r| Ok((r.get(0)?, r.get(1)?)))
        .unwrap()
        .map(|r| r.unwrap())
        .collect()
}

/// S1: a full, non-incremental sync creates the destination table and
/// copies every source row.
#[tokio::test]
async fn s1_full_sync_creates_table_and_copies_all_rows() {
    let dir = tempdir().unwrap();
    let source_db = dir.path().join("src.db");
    let dest_db = dir.path().join("dst.db");

    let conn = Connection::open(&source_db).unwrap();
    conn.execute("CREATE TABLE users (id INTEGER, name TEXT)", [])
        .unwrap();
    conn.execute("INSERT INTO users VALUES (1, 'alice'), (2, 'bob')", [])
        .unwrap();
    drop(conn);

    let j = job(source_db.to_str().unwrap(), dest_db.to_str().unwrap());
    let outcome = pipeline::run_job(&j).await.unwrap();
    assert_eq!(outcome.state, pipeline::RunState::Done);
    assert_eq!(outcome.rows_loaded, 2);

    let rows = dest_rows(dest_db.to_str().unwrap(), "SELECT id, name FROM users ORDER BY id");
    assert_eq!(rows, vec![(1, "alice".to_string()), (2, "bob".to_string())]);
}

/// S2: running the same full sync twice with an update key does not
/// duplicate rows, it upserts them.
#[tokio::test]
async fn s2_repeated_full_sync_with_update_key_upserts_not_duplicates() {
    let dir = tempdir().unwrap();
    let source_db = dir.path().join("src.db");
    let dest_db = dir.path().join("dst.db");

    let conn = Connection::open(&source_db).unwrap();
    conn.execute("CREATE TABLE users (id INTEGER, name TEXT)", [])
        .unwrap();
    conn.execute("INSERT INTO users VALUES (1, 'alice')", []).unwrap();
    drop(conn);

    let mut j = job(source_db.to_str().unwrap(), dest_db.to_str().unwrap());
    j.update_key = Some("id".to_string());

    pipeline::run_job(&j).await.unwrap();
    pipeline::run_job(&j).await.unwrap();

    let rows = dest_rows(dest_db.to_str().unwrap(), "SELECT id, name FROM users");
    assert_eq!(rows.len(), 1);
}

/// S3: timestamp-based incremental sync only extracts rows newer than the
/// previously persisted watermark on the second run.
#[tokio::test]
async fn s3_timestamp_incremental_sync_only_loads_new_rows_on_second_run() {
    let dir = tempdir().unwrap();
    let source_db = dir.path().join("src.db");
    let dest_db = dir.path().join("dst.db");
    let state_file = dir.path().join("state.json");

    let conn = Connection::open(&source_db).unwrap();
    conn.execute(
        "CREATE TABLE users (id INTEGER, name TEXT, updated_at TEXT)",
        [],
    )
    .unwrap();
    conn.execute(
        "INSERT INTO users VALUES (1, 'alice', '2024-01-01T00:00:00Z')",
        [],
    )
    .unwrap();
    drop(conn);

    let mut j = job(source_db.to_str().unwrap(), dest_db.to_str().unwrap());
    j.update_key = Some("id".to_string());
    j.incremental_sync = Some(IncrementalSync {
        enabled: true,
        strategy: IncrementalStrategy::Timestamp,
        timestamp_field: Some("updated_at".to_string()),
        last_sync_value: None,
        state_file: Some(state_file.to_str().unwrap().to_string()),
        batch_size: None,
    });

    let first = pipeline::run_job(&j).await.unwrap();
    assert_eq!(first.rows_loaded, 1);

    let conn = Connection::open(&source_db).unwrap();
    conn.execute(
        "INSERT INTO users VALUES (2, 'bob', '2024-01-02T00:00:00Z')",
        [],
    )
    .unwrap();
    drop(conn);

    let second = pipeline::run_job(&j).await.unwrap();
    assert_eq!(second.rows_loaded, 1);

    let rows = dest_rows(dest_db.to_str().unwrap(), "SELECT id, name FROM users ORDER BY id");
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[1].1, "bob");
}

/// S4: a declared `uppercase` transformation is applied before load.
#[tokio::test]
async fn s4_transformation_is_applied_before_load() {
    let dir = tempdir().unwrap();
    let source_db = dir.path().join("src.db");
    let dest_db = dir.path().join("dst.db");

    let conn = Connection::open(&source_db).unwrap();
    conn.execute("CREATE TABLE users (id INTEGER, name TEXT)", [])
        .unwrap();
    conn.execute("INSERT INTO users VALUES (1, 'alice')", []).unwrap();
    drop(conn);

    let mut j = job(source_db.to_str().unwrap(), dest_db.to_str().unwrap());
    j.fields = vec!["id".to_string(), "name".to_string()];
    j.transformations = vec![Transformation {
        destination: "name".to_string(),
        op: "uppercase".to_string(),
        source: None,
    }];

    pipeline::run_job(&j).await.unwrap();

    let rows = dest_rows(dest_db.to_str().unwrap(), "SELECT id, name FROM users");
    assert_eq!(rows[0].1, "ALICE");
}

/// S5: a failed load rolls back the transaction and leaves the
/// destination table exactly as it was before the run.
#[tokio::test]
async fn s5_failed_transformation_rolls_back_and_destination_is_untouched() {
    let dir = tempdir().unwrap();
    let source_db = dir.path().join("src.db");
    let dest_db = dir.path().join("dst.db");

    let conn = Connection::open(&source_db).unwrap();
    conn.execute("CREATE TABLE users (id INTEGER, name TEXT)", [])
        .unwrap();
    conn.execute(
        "INSERT INTO users VALUES (1, 'alice'), (2, 'bob')",
        [],
    )
    .unwrap();
    drop(conn);

    let conn = Connection::open(&dest_db).unwrap();
    conn.execute("CREATE TABLE users (id INTEGER, name TEXT)", [])
        .unwrap();
    conn.execute("INSERT INTO users VALUES (99, 'preexisting')", [])
        .unwrap();
    drop(conn);

    let mut j = job(source_db.to_str().unwrap(), dest_db.to_str().unwrap());
    j.transformations = vec![Transformation {
        destination: "name".to_string(),
        op: "toInt".to_string(),
        source: Some("name".to_string()),
    }];

    let err = pipeline::run_job(&j).await.unwrap_err();
    assert_eq!(err.state, pipeline::RunState::Transforming);

    let rows = dest_rows(dest_db.to_str().unwrap(), "SELECT id, name FROM users");
    assert_eq!(rows, vec![(99, "preexisting".to_string())]);
}

/// S6: a File-Sink copy is written alongside the database load, in the
/// job's declared output format.
#[tokio::test]
async fn s6_file_sink_copy_is_written_alongside_database_load() {
    let dir = tempdir().unwrap();
    let source_db = dir.path().join("src.db");
    let dest_db = dir.path().join("dst.db");
    let output_path = dir.path().join("out.json");

    let conn = Connection::open(&source_db).unwrap();
    conn.execute("CREATE TABLE users (id INTEGER, name TEXT)", [])
        .unwrap();
    conn.execute("INSERT INTO users VALUES (1, 'alice')", []).unwrap();
    drop(conn);

    let mut j = job(source_db.to_str().unwrap(), dest_db.to_str().unwrap());
    j.output_path = Some(output_path.to_str().unwrap().to_string());
    j.output_format = Some("json".to_string());

    pipeline::run_job(&j).await.unwrap();

    assert!(output_path.exists());
    let text = std::fs::read_to_string(&output_path).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(parsed[0]["name"], "alice");

    let rows = dest_rows(dest_db.to_str().unwrap(), "SELECT id, name FROM users");
    assert_eq!(rows, vec![(1, "alice".to_string())]);
}

/// Spec scenario: an INSERT that fails partway through a batch rolls back
/// the whole transaction — the destination is left exactly as it was
/// before the run, not partially loaded.
#[tokio::test]
async fn loader_rollback_leaves_destination_untouched_on_exec_failure() {
    let dir = tempdir().unwrap();
    let source_db = dir.path().join("src.db");
    let dest_db = dir.path().join("dst.db");

    let conn = Connection::open(&source_db).unwrap();
    conn.execute("CREATE TABLE users (id INTEGER, name TEXT)", [])
        .unwrap();
    conn.execute("INSERT INTO users VALUES (1, 'alice'), (99, 'clash')", [])
        .unwrap();
    drop(conn);

    let conn = Connection::open(&dest_db).unwrap();
    conn.execute("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT)", [])
        .unwrap();
    conn.execute("INSERT INTO users VALUES (99, 'preexisting')", [])
        .unwrap();
    drop(conn);

    let j = job(source_db.to_str().unwrap(), dest_db.to_str().unwrap());
    let err = pipeline::run_job(&j).await.unwrap_err();
    assert_eq!(err.state, pipeline::RunState::Loading);

    let rows = dest_rows(dest_db.to_str().unwrap(), "SELECT id, name FROM users ORDER BY id");
    assert_eq!(rows, vec![(99, "preexisting".to_string())]);
}

/// A destination-vendor mismatch in the job descriptor is rejected before
/// any I/O, via the ordinary `serde`/validation path every run goes through.
#[test]
fn job_descriptor_round_trips_vendor_enum() {
    let dir = tempdir().unwrap();
    let j = job(
        dir.path().join("src.db").to_str().unwrap(),
        dir.path().join("dst.db").to_str().unwrap(),
    );
    assert_eq!(j.source_type, Vendor::Sqlite);
    assert_eq!(j.destination_type, Vendor::Sqlite);
}
