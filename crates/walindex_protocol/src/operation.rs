//! Row-level operations parsed from table records.

use serde::Serialize;
use std::fmt;

/// Kind of a row-level change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OperationKind {
    /// Row was inserted.
    Insert,
    /// Row was updated.
    Update,
    /// Row was deleted.
    Delete,
}

impl OperationKind {
    /// Returns the keyword used by the output plugin.
    pub fn keyword(&self) -> &'static str {
        match self {
            OperationKind::Insert => "INSERT",
            OperationKind::Update => "UPDATE",
            OperationKind::Delete => "DELETE",
        }
    }

    /// Parses the keyword used by the output plugin.
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword {
            "INSERT" => Some(OperationKind::Insert),
            "UPDATE" => Some(OperationKind::Update),
            "DELETE" => Some(OperationKind::Delete),
            _ => None,
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

/// One `<column>[<type>]:<value>` pair of a table record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnValue {
    /// Column name as printed by the plugin.
    pub column: String,
    /// Type name as printed by the plugin.
    pub data_type: String,
    /// Value with the outer quotes of a quoted literal removed.
    pub value: String,
}

/// A parsed row-level change.
///
/// An operation is immutable once built. Columns keep the order in which
/// they appeared in the record and names are unique. The reconstruction
/// query is a `SELECT` projection that yields the full row of the affected
/// entity when run against the system-of-record, with columns missing from
/// the record projected as `NULL`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Operation {
    kind: OperationKind,
    table: String,
    columns: Vec<ColumnValue>,
    reconstruction_query: String,
}

impl Operation {
    /// Creates an operation.
    pub fn new(
        kind: OperationKind,
        table: impl Into<String>,
        columns: Vec<ColumnValue>,
        reconstruction_query: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            table: table.into(),
            columns,
            reconstruction_query: reconstruction_query.into(),
        }
    }

    /// Returns the operation kind.
    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    /// Returns the table name without its schema prefix.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Returns the parsed columns in record order.
    pub fn columns(&self) -> &[ColumnValue] {
        &self.columns
    }

    /// Returns the textual value of a column, if the record carried it.
    pub fn value(&self, column: &str) -> Option<&str> {
        self.columns
            .iter()
            .find(|c| c.column == column)
            .map(|c| c.value.as_str())
    }

    /// Returns `true` if the record carried the column.
    pub fn contains(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c.column == column)
    }

    /// Returns the values of `id_columns`, in that order.
    pub fn key_values(&self, id_columns: &[String]) -> Vec<Option<&str>> {
        id_columns.iter().map(|c| self.value(c)).collect()
    }

    /// Returns the query that materializes the affected row.
    pub fn reconstruction_query(&self) -> &str {
        &self.reconstruction_query
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.table)?;
        for c in &self.columns {
            write!(f, " {}={}", c.column, c.value)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column(name: &str, value: &str) -> ColumnValue {
        ColumnValue {
            column: name.into(),
            data_type: "text".into(),
            value: value.into(),
        }
    }

    #[test]
    fn keyword_roundtrip() {
        for kind in [
            OperationKind::Insert,
            OperationKind::Update,
            OperationKind::Delete,
        ] {
            assert_eq!(OperationKind::from_keyword(kind.keyword()), Some(kind));
        }
        assert_eq!(OperationKind::from_keyword("TRUNCATE"), None);
        assert_eq!(OperationKind::from_keyword("insert"), None);
    }

    #[test]
    fn key_values_follow_id_order() {
        let op = Operation::new(
            OperationKind::Delete,
            "order_line",
            vec![column("line_no", "3"), column("order_id", "10")],
            "SELECT 3 AS line_no, 10 AS order_id",
        );

        let ids = vec!["order_id".to_string(), "line_no".to_string()];
        assert_eq!(op.key_values(&ids), vec![Some("10"), Some("3")]);

        let missing = vec!["tenant".to_string()];
        assert_eq!(op.key_values(&missing), vec![None]);
    }

    #[test]
    fn display_lists_columns() {
        let op = Operation::new(
            OperationKind::Insert,
            "product",
            vec![column("id", "1"), column("name", "prod1")],
            "SELECT 1 AS id, 'prod1' AS name",
        );
        assert_eq!(op.to_string(), "INSERT product id=1 name=prod1");
        assert!(op.contains("name"));
        assert!(!op.contains("price"));
    }
}
