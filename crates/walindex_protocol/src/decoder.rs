//! Decoder for `test_decoding` record text.
//!
//! A table record is parsed in two passes: a header pattern extracts the
//! table and the operation keyword, then a column pattern is matched
//! repeatedly over the remainder. Each match must start where the previous
//! one ended and the matches must consume the whole remainder. Column names
//! are plain identifiers or double-quoted ones, so sections such as the
//! `old-key:` of a key-changing UPDATE are left over and rejected.

use crate::error::{DecodeError, DecodeResult};
use crate::operation::{ColumnValue, Operation, OperationKind};
use crate::record::{Lsn, WalRecord};
use regex::Regex;
use std::sync::LazyLock;
use tracing::debug;

const BEGIN_PREFIX: &str = "BEGIN ";
const COMMIT_PREFIX: &str = "COMMIT ";
const TABLE_PREFIX: &str = "table ";
const PROJECTION_DELIM: &str = ", ";

#[allow(clippy::expect_used)] // literal pattern
static HEADER_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^table (?P<table>[^:]+): (?P<operation>[^:]+):(?: |$)")
        .expect("header pattern compiles")
});

#[allow(clippy::expect_used)] // literal pattern
static COLUMN_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"^(?P<column>"(?:[^"]|"")+"|[^\[\s,:"]+)\[(?P<type>[^\]]+)\]:(?P<value>'(?:[^']|'')*'|[^'\s,][^\s,]*)(?:, | )?"#,
    )
    .expect("column pattern compiles")
});

/// Lookup of the declared non-id columns of a table.
///
/// The decoder uses it to project columns the record did not carry (a
/// DELETE only carries the key) as `NULL` in the reconstruction query.
pub trait ColumnCatalog {
    /// Returns the ordered non-id columns of `table`, or an empty slice if
    /// the table is unknown.
    fn non_id_columns(&self, table: &str) -> &[String];
}

/// A catalog that knows no table.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoColumns;

impl ColumnCatalog for NoColumns {
    fn non_id_columns(&self, _table: &str) -> &[String] {
        &[]
    }
}

/// Result of decoding one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedRecord {
    /// A transaction starts.
    Begin {
        /// Transaction id.
        xid: String,
    },
    /// A transaction commits.
    Commit {
        /// Transaction id.
        xid: String,
        /// Position of the COMMIT record.
        lsn: Lsn,
    },
    /// A row-level change inside the open transaction.
    Operation(Operation),
}

/// Parser for raw `test_decoding` records.
#[derive(Debug, Clone)]
pub struct Decoder {
    header: Regex,
    column: Regex,
}

impl Decoder {
    /// Creates a decoder.
    pub fn new() -> Self {
        Self {
            header: HEADER_PATTERN.clone(),
            column: COLUMN_PATTERN.clone(),
        }
    }

    /// Decodes one record.
    pub fn decode(
        &self,
        record: &WalRecord,
        catalog: &dyn ColumnCatalog,
    ) -> DecodeResult<DecodedRecord> {
        let data = record.data.as_str();

        if let Some(xid) = data.strip_prefix(BEGIN_PREFIX) {
            check_xid("BEGIN", xid, &record.xid)?;
            return Ok(DecodedRecord::Begin { xid: xid.to_string() });
        }

        if let Some(xid) = data.strip_prefix(COMMIT_PREFIX) {
            check_xid("COMMIT", xid, &record.xid)?;
            return Ok(DecodedRecord::Commit {
                xid: xid.to_string(),
                lsn: record.lsn.clone(),
            });
        }

        if data.starts_with(TABLE_PREFIX) {
            return self
                .decode_operation(data, catalog)
                .map(DecodedRecord::Operation);
        }

        Err(DecodeError::UnrecognizedRecordFormat {
            data: data.to_string(),
        })
    }

    /// Parses the text of a `table ` record into an operation.
    pub fn decode_operation(
        &self,
        data: &str,
        catalog: &dyn ColumnCatalog,
    ) -> DecodeResult<Operation> {
        let header = self
            .header
            .captures(data)
            .ok_or_else(|| DecodeError::MalformedHeader {
                data: data.to_string(),
            })?;

        let qualified = header.name("table").map_or("", |m| m.as_str());
        let table = qualified
            .split_once('.')
            .map_or(qualified, |(_schema, name)| name);

        let keyword = header.name("operation").map_or("", |m| m.as_str());
        let kind =
            OperationKind::from_keyword(keyword).ok_or_else(|| DecodeError::UnknownOperation {
                operation: keyword.to_string(),
                data: data.to_string(),
            })?;

        let body_start = header.get(0).map_or(data.len(), |m| m.end());
        let mut rest = &data[body_start..];
        let mut columns: Vec<ColumnValue> = Vec::new();
        let mut projections: Vec<String> = Vec::new();

        while let Some(caps) = self.column.captures(rest) {
            let end = caps.get(0).map_or(0, |m| m.end());
            if end == 0 {
                break;
            }

            let column = caps.name("column").map_or("", |m| m.as_str());
            let data_type = caps.name("type").map_or("", |m| m.as_str());
            let literal = caps.name("value").map_or("", |m| m.as_str());

            if columns.iter().any(|c| c.column == column) {
                return Err(DecodeError::DuplicateColumn {
                    column: column.to_string(),
                    data: data.to_string(),
                });
            }

            projections.push(format!("{literal} AS {column}"));
            let value = strip_outer_quotes(literal);
            debug!(table, column, data_type, value, "decoded column");

            columns.push(ColumnValue {
                column: column.to_string(),
                data_type: data_type.to_string(),
                value: value.to_string(),
            });
            rest = &rest[end..];
        }

        if !rest.is_empty() {
            return Err(DecodeError::TrailingGarbage {
                tail: rest.to_string(),
                data: data.to_string(),
            });
        }

        // DELETE records carry the key only; the rest of the row is NULL.
        for column in catalog.non_id_columns(table) {
            if !columns.iter().any(|c| &c.column == column) {
                projections.push(format!("NULL AS {column}"));
            }
        }

        let query = format!("SELECT {}", projections.join(PROJECTION_DELIM));
        Ok(Operation::new(kind, table, columns, query))
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

fn check_xid(kind: &'static str, line_xid: &str, record_xid: &str) -> DecodeResult<()> {
    if line_xid != record_xid {
        return Err(DecodeError::ProtocolMismatch {
            kind,
            line_xid: line_xid.to_string(),
            record_xid: record_xid.to_string(),
        });
    }
    Ok(())
}

/// Removes the outer quotes of a quoted literal and nothing else.
fn strip_outer_quotes(literal: &str) -> &str {
    if literal.len() >= 2 && literal.starts_with('\'') && literal.ends_with('\'') {
        &literal[1..literal.len() - 1]
    } else {
        literal
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct Tables(HashMap<String, Vec<String>>);

    impl Tables {
        fn product() -> Self {
            let columns = ["name", "description", "brand", "category_id", "owner_id", "price"]
                .iter()
                .map(|c| c.to_string())
                .collect();
            Self(HashMap::from([("product".to_string(), columns)]))
        }
    }

    impl ColumnCatalog for Tables {
        fn non_id_columns(&self, table: &str) -> &[String] {
            self.0.get(table).map(Vec::as_slice).unwrap_or(&[])
        }
    }

    fn record(xid: &str, data: &str) -> WalRecord {
        WalRecord::new(Lsn::new("0/16B3748"), xid, data)
    }

    fn decode_op(data: &str) -> Operation {
        match Decoder::new().decode(&record("7", data), &Tables::product()) {
            Ok(DecodedRecord::Operation(op)) => op,
            other => panic!("expected operation, got {other:?}"),
        }
    }

    #[test]
    fn begin_and_commit() {
        let decoder = Decoder::new();

        let begin = decoder.decode(&record("529", "BEGIN 529"), &NoColumns).unwrap();
        assert_eq!(begin, DecodedRecord::Begin { xid: "529".into() });

        let commit = decoder
            .decode(&record("529", "COMMIT 529"), &NoColumns)
            .unwrap();
        assert_eq!(
            commit,
            DecodedRecord::Commit {
                xid: "529".into(),
                lsn: Lsn::new("0/16B3748"),
            }
        );
    }

    #[test]
    fn boundary_xid_must_match_record() {
        let decoder = Decoder::new();

        let err = decoder
            .decode(&record("530", "BEGIN 529"), &NoColumns)
            .unwrap_err();
        assert!(matches!(
            err,
            DecodeError::ProtocolMismatch { kind: "BEGIN", .. }
        ));

        let err = decoder
            .decode(&record("530", "COMMIT 529"), &NoColumns)
            .unwrap_err();
        assert!(matches!(
            err,
            DecodeError::ProtocolMismatch { kind: "COMMIT", .. }
        ));
    }

    #[test]
    fn insert_is_parsed_and_completed() {
        let op = decode_op("table public.product: INSERT: id[int8]:1 name[varchar]:'prod1'");

        assert_eq!(op.kind(), OperationKind::Insert);
        assert_eq!(op.table(), "product");
        assert_eq!(op.value("id"), Some("1"));
        assert_eq!(op.value("name"), Some("prod1"));
        assert_eq!(op.columns().len(), 2);
        assert_eq!(
            op.reconstruction_query(),
            "SELECT 1 AS id, 'prod1' AS name, NULL AS description, NULL AS brand, \
             NULL AS category_id, NULL AS owner_id, NULL AS price"
        );
    }

    #[test]
    fn delete_projects_every_missing_column_as_null() {
        let op = decode_op("table public.product: DELETE: id[bigint]:42");

        assert_eq!(op.kind(), OperationKind::Delete);
        assert_eq!(op.columns().len(), 1);
        for column in Tables::product().non_id_columns("product") {
            assert!(op
                .reconstruction_query()
                .contains(&format!("NULL AS {column}")));
        }
    }

    #[test]
    fn unknown_table_gets_no_completion() {
        let op = decode_op("table public.audit: UPDATE: id[integer]:3 note[text]:'x'");
        assert_eq!(op.table(), "audit");
        assert_eq!(op.reconstruction_query(), "SELECT 3 AS id, 'x' AS note");
    }

    #[test]
    fn quoted_value_keeps_inner_quotes() {
        let op = decode_op("table public.product: UPDATE: id[bigint]:5 name[text]:'O''Hara'");
        assert_eq!(op.value("name"), Some("O''Hara"));
        assert!(op.reconstruction_query().contains("'O''Hara' AS name"));
    }

    #[test]
    fn quoted_value_may_contain_spaces_and_separators() {
        let op = decode_op(
            "table public.product: INSERT: id[bigint]:6 description[text]:'big, red: [new] box' price[bigint]:100",
        );
        assert_eq!(op.value("description"), Some("big, red: [new] box"));
        assert_eq!(op.value("price"), Some("100"));
    }

    #[test]
    fn comma_separated_columns() {
        let op = decode_op("table public.product: INSERT: id[int8]:1, name[varchar]:'prod1', price[int8]:100");
        assert_eq!(op.value("id"), Some("1"));
        assert_eq!(op.value("name"), Some("prod1"));
        assert_eq!(op.value("price"), Some("100"));
    }

    #[test]
    fn type_names_with_spaces() {
        let op = decode_op(
            "table public.product: INSERT: id[bigint]:1 updated[timestamp without time zone]:'2022-07-18 10:00:00' price[double precision]:1.5",
        );
        assert_eq!(op.columns()[1].data_type, "timestamp without time zone");
        assert_eq!(op.value("updated"), Some("2022-07-18 10:00:00"));
        assert_eq!(op.value("price"), Some("1.5"));
    }

    #[test]
    fn null_and_empty_values() {
        let op = decode_op("table public.product: INSERT: id[bigint]:2 brand[text]:null name[text]:''");
        assert_eq!(op.value("brand"), Some("null"));
        assert_eq!(op.value("name"), Some(""));
        assert!(op.reconstruction_query().contains("null AS brand"));
    }

    #[test]
    fn table_without_schema_prefix() {
        let op = decode_op("table product: DELETE: id[bigint]:1");
        assert_eq!(op.table(), "product");
    }

    #[test]
    fn unknown_operation_is_rejected() {
        let err = Decoder::new()
            .decode(&record("7", "table public.product: TRUNCATE: "), &NoColumns)
            .unwrap_err();
        assert!(matches!(err, DecodeError::UnknownOperation { ref operation, .. } if operation == "TRUNCATE"));
    }

    #[test]
    fn trailing_garbage_is_rejected() {
        let err = Decoder::new()
            .decode(
                &record("7", "table public.product: DELETE: (no-tuple-data)"),
                &NoColumns,
            )
            .unwrap_err();
        assert!(matches!(err, DecodeError::TrailingGarbage { ref tail, .. } if tail == "(no-tuple-data)"));

        let err = Decoder::new()
            .decode(
                &record("7", "table public.product: INSERT: id[bigint]:1 name[text]:'unterminated"),
                &NoColumns,
            )
            .unwrap_err();
        assert!(matches!(err, DecodeError::TrailingGarbage { .. }));
    }

    #[test]
    fn key_changing_update_is_rejected() {
        let data = "table public.product: UPDATE: old-key: id[bigint]:1 new-tuple: id[bigint]:2 name[text]:'x'";
        let err = Decoder::new()
            .decode(&record("7", data), &Tables::product())
            .unwrap_err();
        assert!(matches!(err, DecodeError::TrailingGarbage { ref tail, .. } if tail.starts_with("old-key:")));

        let data = "table public.product: UPDATE: id[bigint]:2 new-tuple: name[text]:'x'";
        let err = Decoder::new()
            .decode(&record("7", data), &Tables::product())
            .unwrap_err();
        assert!(matches!(err, DecodeError::TrailingGarbage { ref tail, .. } if tail.starts_with("new-tuple:")));
    }

    #[test]
    fn quoted_column_names() {
        let op = decode_op(r#"table public.product: INSERT: id[bigint]:1 "Display Name"[text]:'x' "a""b"[integer]:2"#);
        assert_eq!(op.columns().len(), 3);
        assert_eq!(op.value(r#""Display Name""#), Some("x"));
        assert_eq!(op.value(r#""a""b""#), Some("2"));
        assert!(op
            .reconstruction_query()
            .contains(r#"'x' AS "Display Name", 2 AS "a""b""#));
    }

    #[test]
    fn duplicate_column_is_rejected() {
        let err = Decoder::new()
            .decode(
                &record("7", "table public.product: INSERT: id[bigint]:1 id[bigint]:2"),
                &NoColumns,
            )
            .unwrap_err();
        assert!(matches!(err, DecodeError::DuplicateColumn { ref column, .. } if column == "id"));
    }

    #[test]
    fn malformed_header_is_rejected() {
        let err = Decoder::new()
            .decode(&record("7", "table public.product INSERT"), &NoColumns)
            .unwrap_err();
        assert!(matches!(err, DecodeError::MalformedHeader { .. }));
    }

    #[test]
    fn unrecognized_prefix_is_rejected() {
        for data in ["ROLLBACK 7", "message: transactional: 1", "begin 7", ""] {
            let err = Decoder::new().decode(&record("7", data), &NoColumns).unwrap_err();
            assert!(matches!(err, DecodeError::UnrecognizedRecordFormat { .. }));
        }
    }

    #[test]
    fn strip_outer_quotes_only() {
        assert_eq!(strip_outer_quotes("'abc'"), "abc");
        assert_eq!(strip_outer_quotes("''"), "");
        assert_eq!(strip_outer_quotes("'''x'''"), "''x''");
        assert_eq!(strip_outer_quotes("12"), "12");
        assert_eq!(strip_outer_quotes("'"), "'");
    }
}
