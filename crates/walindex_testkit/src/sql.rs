//! Evaluator for reconstruction queries.
//!
//! Understands the projection-only `SELECT <literal> AS <column>, ...` form
//! the decoder produces, with SQL string, number, boolean and `NULL`
//! literals.

use serde_json::{Number, Value};
use walindex_engine::{CdcError, CdcResult, Row};

/// Evaluates a projection query into its single row.
pub fn evaluate_projection(query: &str) -> CdcResult<Row> {
    let projection = query
        .strip_prefix("SELECT ")
        .ok_or_else(|| failure(query, "not a SELECT"))?;

    let mut row = Row::new();
    for item in split_items(projection) {
        let (literal, column) = item
            .rsplit_once(" AS ")
            .ok_or_else(|| failure(query, &format!("no alias in [{item}]")))?;
        let value = evaluate_literal(literal).ok_or_else(|| {
            failure(query, &format!("unsupported expression [{literal}]"))
        })?;
        row.insert(column.to_string(), value);
    }
    Ok(row)
}

/// Evaluates one SQL literal.
pub fn evaluate_literal(literal: &str) -> Option<Value> {
    if literal.len() >= 2 && literal.starts_with('\'') && literal.ends_with('\'') {
        let inner = &literal[1..literal.len() - 1];
        return Some(Value::String(inner.replace("''", "'")));
    }
    if literal.eq_ignore_ascii_case("null") {
        return Some(Value::Null);
    }
    if literal.eq_ignore_ascii_case("true") {
        return Some(Value::Bool(true));
    }
    if literal.eq_ignore_ascii_case("false") {
        return Some(Value::Bool(false));
    }
    if let Ok(n) = literal.parse::<i64>() {
        return Some(Value::Number(n.into()));
    }
    literal
        .parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
}

/// Splits a projection list on `, ` outside of quoted literals.
fn split_items(projection: &str) -> Vec<&str> {
    let mut items = Vec::new();
    let mut in_quote = false;
    let mut start = 0;
    let bytes = projection.as_bytes();

    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\'' => in_quote = !in_quote,
            b',' if !in_quote && bytes.get(i + 1) == Some(&b' ') => {
                items.push(&projection[start..i]);
                start = i + 2;
                i += 1;
            }
            _ => {}
        }
        i += 1;
    }
    if start < projection.len() {
        items.push(&projection[start..]);
    }
    items
}

fn failure(query: &str, message: &str) -> CdcError {
    CdcError::Reconstruction {
        query: query.to_string(),
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn evaluates_decoder_projection() {
        let row = evaluate_projection(
            "SELECT 1 AS id, 'prod1' AS name, NULL AS description, 100.5 AS price",
        )
        .unwrap();
        assert_eq!(row.get("id"), Some(&json!(1)));
        assert_eq!(row.get("name"), Some(&json!("prod1")));
        assert_eq!(row.get("description"), Some(&Value::Null));
        assert_eq!(row.get("price"), Some(&json!(100.5)));
    }

    #[test]
    fn quoted_literals_keep_separators() {
        let row =
            evaluate_projection("SELECT 'O''Hara, Inc AS x' AS name, 'a, b' AS tags").unwrap();
        assert_eq!(row.get("name"), Some(&json!("O'Hara, Inc AS x")));
        assert_eq!(row.get("tags"), Some(&json!("a, b")));
    }

    #[test]
    fn lower_case_null_and_booleans() {
        let row = evaluate_projection("SELECT null AS a, true AS b, FALSE AS c, '' AS d").unwrap();
        assert_eq!(row.get("a"), Some(&Value::Null));
        assert_eq!(row.get("b"), Some(&json!(true)));
        assert_eq!(row.get("c"), Some(&json!(false)));
        assert_eq!(row.get("d"), Some(&json!("")));
    }

    #[test]
    fn rejects_other_queries() {
        assert!(matches!(
            evaluate_projection("DELETE FROM product"),
            Err(CdcError::Reconstruction { .. })
        ));
        assert!(evaluate_projection("SELECT 1").is_err());
        assert!(evaluate_projection("SELECT name AS name").is_err());
    }
}
