//! Serializes rows to JSON, YAML, XML, or CSV, writing the file atomically.
//!
//! Every format writes to a temp path in the target's directory, then
//! renames over the destination — the same atomic-write shape
//! `getl-state-store` uses for the sync-state file, so a crash mid-write
//! never leaves a half-written file sink behind.

use getl_core::{GetlError, Row, Value};
use std::io::Write;
use std::path::Path;

/// The closed set of File-Sink output formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Json,
    Yaml,
    Xml,
    Csv,
}

impl Format {
    /// Parses a format token from the job descriptor's `outputFormat`
    /// field, case-insensitively. Unrecognized tokens fail with
    /// `BadFormat`.
    pub fn from_token(token: &str) -> Result<Format, GetlError> {
        match token.to_ascii_lowercase().as_str() {
            "json" => Ok(Format::Json),
            "yaml" | "yml" => Ok(Format::Yaml),
            "xml" => Ok(Format::Xml),
            "csv" => Ok(Format::Csv),
            other => Err(GetlError::BadFormat(other.to_string())),
        }
    }
}

/// Serializes `rows` to `path` in `format`, truncating and rewriting the
/// file atomically.
pub fn save(path: &Path, rows: &[Row], format: Format) -> Result<(), GetlError> {
    let body = match format {
        Format::Json => to_json(rows)?,
        Format::Yaml => to_yaml(rows)?,
        Format::Xml => to_xml(rows),
        Format::Csv => to_csv(rows)?,
    };
    write_atomic(path, body.as_bytes())?;
    tracing::debug!(path = %path.display(), rows = rows.len(), format = ?format, "wrote file sink");
    Ok(())
}

fn row_to_json_map(row: &Row) -> serde_json::Map<String, serde_json::Value> {
    let mut map = serde_json::Map::with_capacity(row.columns.len());
    for (column, value) in row.columns.iter().zip(row.values.iter()) {
        map.insert(column.clone(), value_to_json(value));
    }
    map
}

fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Int(i) => serde_json::Value::from(*i),
        Value::Real(r) => serde_json::json!(r),
        Value::Bool(b) => serde_json::Value::from(*b),
        Value::Text(s) => serde_json::Value::from(s.clone()),
        Value::Bytes(b) => {
            use base64::Engine;
            serde_json::Value::from(base64::engine::general_purpose::STANDARD.encode(b))
        }
        Value::Timestamp(ts) => serde_json::Value::from(ts.to_rfc3339()),
    }
}

fn to_json(rows: &[Row]) -> Result<String, GetlError> {
    let array: Vec<serde_json::Value> = rows
        .iter()
        .map(|r| serde_json::Value::Object(row_to_json_map(r)))
        .collect();
    serde_json::to_string_pretty(&array).map_err(|e| GetlError::BadFormat(format!("json: {e}")))
}

fn to_yaml(rows: &[Row]) -> Result<String, GetlError> {
    let array: Vec<serde_json::Value> = rows
        .iter()
        .map(|r| serde_json::Value::Object(row_to_json_map(r)))
        .collect();
    serde_yaml::to_string(&array).map_err(|e| GetlError::BadFormat(format!("yaml: {e}")))
}

/// A `<data>` root with one `<record>` per row and one `<field name="..">`
/// per column. No XML crate is pulled in for writing: escaping is the
/// only correctness requirement, and it is implemented directly below.
fn to_xml(rows: &[Row]) -> String {
    let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<data>\n");
    for row in rows {
        out.push_str("  <record>\n");
        for (column, value) in row.columns.iter().zip(row.values.iter()) {
            let text = match value {
                Value::Null => String::new(),
                Value::Bytes(b) => {
                    use base64::Engine;
                    base64::engine::general_purpose::STANDARD.encode(b)
                }
                other => other.format_for_hash(),
            };
            out.push_str(&format!(
                "    <field name=\"{}\">{}</field>\n",
                xml_escape(column),
                xml_escape(&text)
            ));
        }
        out.push_str("  </record>\n");
    }
    out.push_str("</data>\n");
    out
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

/// Header row from the union of keys in declaration order (the first
/// row's column order, extended with any columns seen only in later
/// rows); missing values in a given row emit an empty cell.
fn to_csv(rows: &[Row]) -> Result<String, GetlError> {
    let mut header: Vec<String> = Vec::new();
    for row in rows {
        for column in &row.columns {
            if !header.contains(column) {
                header.push(column.clone());
            }
        }
    }

    let mut writer = csv::WriterBuilder::new().from_writer(Vec::new());
    writer
        .write_record(&header)
        .map_err(|e| GetlError::BadFormat(format!("csv: {e}")))?;

    for row in rows {
        let record: Vec<String> = header
            .iter()
            .map(|column| {
                row.get(column)
                    .map(csv_cell)
                    .unwrap_or_default()
            })
            .collect();
        writer
            .write_record(&record)
            .map_err(|e| GetlError::BadFormat(format!("csv: {e}")))?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| GetlError::BadFormat(format!("csv: {e}")))?;
    String::from_utf8(bytes).map_err(|e| GetlError::BadFormat(format!("csv: {e}")))
}

fn csv_cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bytes(b) => {
            use base64::Engine;
            base64::engine::general_purpose::STANDARD.encode(b)
        }
        other => other.format_for_hash(),
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), GetlError> {
    let to_io_err = |e: std::io::Error| GetlError::IoFailed {
        path: path.display().to_string(),
        source: e,
    };

    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(dir).map_err(to_io_err)?;
        }
    }

    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let tmp_path = dir.join(format!(
        ".{}.tmp",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("getl-sink")
    ));

    let mut file = std::fs::File::create(&tmp_path).map_err(to_io_err)?;
    file.write_all(bytes).map_err(to_io_err)?;
    file.sync_all().map_err(to_io_err)?;
    std::fs::rename(&tmp_path, path).map_err(to_io_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_rows() -> Vec<Row> {
        vec![
            Row::new(
                vec!["id".into(), "name".into()],
                vec![Value::Int(1), Value::Text("a".into())],
            ),
            Row::new(
                vec!["id".into(), "name".into()],
                vec![Value::Int(2), Value::Text("b".into())],
            ),
        ]
    }

    #[test]
    fn unknown_format_token_fails() {
        let err = Format::from_token("parquet").unwrap_err();
        assert_eq!(err.kind(), "BadFormat");
    }

    #[test]
    fn json_round_trips_through_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");
        save(&path, &sample_rows(), Format::Json).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed[0]["id"], 1);
        assert_eq!(parsed[1]["name"], "b");
    }

    #[test]
    fn yaml_round_trips_through_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.yaml");
        save(&path, &sample_rows(), Format::Yaml).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let parsed: serde_yaml::Value = serde_yaml::from_str(&text).unwrap();
        assert_eq!(parsed[0]["name"], serde_yaml::Value::from("a"));
    }

    #[test]
    fn xml_escapes_and_nulls_render_empty() {
        let rows = vec![Row::new(
            vec!["name".into(), "note".into()],
            vec![Value::Text("a & b".into()), Value::Null],
        )];
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.xml");
        save(&path, &rows, Format::Xml).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("<field name=\"name\">a &amp; b</field>"));
        assert!(text.contains("<field name=\"note\"></field>"));
        assert!(text.starts_with("<?xml"));
    }

    #[test]
    fn csv_header_is_union_of_keys_missing_values_are_empty_cells() {
        let rows = vec![
            Row::new(vec!["id".into()], vec![Value::Int(1)]),
            Row::new(
                vec!["id".into(), "name".into()],
                vec![Value::Int(2), Value::Text("b".into())],
            ),
        ];
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        save(&path, &rows, Format::Csv).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next().unwrap(), "id,name");
        assert_eq!(lines.next().unwrap(), "1,");
        assert_eq!(lines.next().unwrap(), "2,b");
    }

    #[test]
    fn save_overwrites_existing_file_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");
        std::fs::write(&path, b"stale").unwrap();
        save(&path, &sample_rows(), Format::Json).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"id\": 1"));
    }
}
