//! Applies a job's declared per-column transformations to extracted rows.
//!
//! This is a pure function, no I/O, deterministic for fixed inputs (core
//! specification's testable property 2): the same `(rows, transformations)`
//! pair always produces bit-identical output rows.

use base64::Engine;
use getl_core::{GetlError, Row, Transformation, Value};

/// Applies `transformations` to every row in `rows`, in declared order, and
/// returns the transformed rows.
///
/// For each row, each transformation reads its source field (falling back
/// to the destination name for `none`/`copy` when no source is given) and
/// writes the operation's result to the destination field. An empty
/// `transformations` list is a pass-through: rows and their column names
/// are returned unchanged.
pub fn transform(rows: Vec<Row>, transformations: &[Transformation]) -> Result<Vec<Row>, GetlError> {
    if transformations.is_empty() {
        return Ok(rows);
    }

    rows.into_iter()
        .map(|row| transform_row(row, transformations))
        .collect()
}

fn transform_row(mut row: Row, transformations: &[Transformation]) -> Result<Row, GetlError> {
    for t in transformations {
        let source_field = t.source.as_deref().unwrap_or(&t.destination);
        let source_value = row.get(source_field).cloned().ok_or_else(|| {
            GetlError::MissingSourceField {
                field: source_field.to_string(),
            }
        })?;

        let result = apply_op(&t.op, source_field, source_value)?;
        row.set(&t.destination, result);
    }
    Ok(row)
}

fn apply_op(op: &str, field: &str, value: Value) -> Result<Value, GetlError> {
    match op {
        "copy" | "none" => Ok(value),
        "uppercase" => match value {
            Value::Text(s) => Ok(Value::Text(s.to_uppercase())),
            other => Err(GetlError::TypeMismatch {
                field: field.to_string(),
                expected: format!("Text, got {}", other.kind()),
            }),
        },
        "base64" => match value {
            Value::Text(s) => Ok(Value::Text(
                base64::engine::general_purpose::STANDARD.encode(s.as_bytes()),
            )),
            other => Err(GetlError::TypeMismatch {
                field: field.to_string(),
                expected: format!("Text, got {}", other.kind()),
            }),
        },
        "toInt" => match value {
            Value::Text(s) => s
                .trim()
                .parse::<i64>()
                .map(Value::Int)
                .map_err(|e| GetlError::BadConversion {
                    field: field.to_string(),
                    reason: format!("'{s}' is not a decimal integer: {e}"),
                }),
            other => Err(GetlError::TypeMismatch {
                field: field.to_string(),
                expected: format!("Text, got {}", other.kind()),
            }),
        },
        other => Err(GetlError::UnknownOp(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(columns: &[&str], values: Vec<Value>) -> Row {
        Row::new(columns.iter().map(|s| s.to_string()).collect(), values)
    }

    fn t(dst: &str, op: &str, src: Option<&str>) -> Transformation {
        Transformation {
            destination: dst.to_string(),
            op: op.to_string(),
            source: src.map(|s| s.to_string()),
        }
    }

    #[test]
    fn empty_transformations_is_pass_through() {
        let rows = vec![row(&["id"], vec![Value::Int(1)])];
        let out = transform(rows.clone(), &[]).unwrap();
        assert_eq!(out, rows);
    }

    #[test]
    fn scenario_s4_uppercase() {
        let rows = vec![row(&["name"], vec![Value::Text("foo".into())])];
        let transforms = vec![t("name_u", "uppercase", Some("name"))];
        let out = transform(rows, &transforms).unwrap();
        assert_eq!(out[0].get("name_u"), Some(&Value::Text("FOO".into())));
    }

    #[test]
    fn base64_encodes_standard_padded() {
        let rows = vec![row(&["name"], vec![Value::Text("hi".into())])];
        let transforms = vec![t("name_b64", "base64", Some("name"))];
        let out = transform(rows, &transforms).unwrap();
        assert_eq!(out[0].get("name_b64"), Some(&Value::Text("aGk=".into())));
    }

    #[test]
    fn to_int_parses_decimal() {
        let rows = vec![row(&["age"], vec![Value::Text("42".into())])];
        let transforms = vec![t("age", "toInt", None)];
        let out = transform(rows, &transforms).unwrap();
        assert_eq!(out[0].get("age"), Some(&Value::Int(42)));
    }

    #[test]
    fn to_int_failure_is_bad_conversion() {
        let rows = vec![row(&["age"], vec![Value::Text("not-int".into())])];
        let transforms = vec![t("age", "toInt", None)];
        let err = transform(rows, &transforms).unwrap_err();
        assert_eq!(err.kind(), "BadConversion");
    }

    #[test]
    fn uppercase_on_non_string_is_type_mismatch() {
        let rows = vec![row(&["age"], vec![Value::Int(5)])];
        let transforms = vec![t("age", "uppercase", None)];
        let err = transform(rows, &transforms).unwrap_err();
        assert_eq!(err.kind(), "TypeMismatch");
    }

    #[test]
    fn unknown_op_fails() {
        let rows = vec![row(&["x"], vec![Value::Int(1)])];
        let transforms = vec![t("x", "reverse", None)];
        let err = transform(rows, &transforms).unwrap_err();
        assert_eq!(err.kind(), "UnknownOp");
    }

    #[test]
    fn missing_source_field_fails_before_any_write() {
        let rows = vec![row(&["id"], vec![Value::Int(1)])];
        let transforms = vec![t("name", "copy", Some("name"))];
        let err = transform(rows, &transforms).unwrap_err();
        assert_eq!(err.kind(), "MissingSourceField");
    }

    #[test]
    fn transformation_determinism() {
        let rows = vec![row(&["name"], vec![Value::Text("foo".into())])];
        let transforms = vec![t("name_u", "uppercase", Some("name"))];
        let a = transform(rows.clone(), &transforms).unwrap();
        let b = transform(rows, &transforms).unwrap();
        assert_eq!(a, b);
    }
}
