//! Decode command implementation.
//!
//! Reads one record per line. A line is either raw plugin output, or the
//! tab-separated `lsn, xid, data` triple printed by
//! `psql -At -F $'\t' -c "SELECT * FROM pg_logical_slot_peek_changes(...)"`.
//! Raw operation lines take the xid of the enclosing BEGIN.

use serde::Serialize;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;
use walindex_engine::{SchemaCatalog, TransactionContext};
use walindex_protocol::{ColumnCatalog, DecodedRecord, Decoder, Lsn, Operation, WalRecord};

/// One decoded line.
#[derive(Debug, Serialize)]
#[serde(tag = "record", rename_all = "snake_case")]
pub enum DecodedLine {
    /// A BEGIN record.
    Begin {
        /// Transaction id.
        xid: String,
    },
    /// A COMMIT record.
    Commit {
        /// Transaction id.
        xid: String,
        /// Position of the record.
        lsn: Lsn,
    },
    /// A row change.
    Operation {
        /// Transaction id.
        xid: String,
        /// The parsed change.
        operation: Operation,
    },
}

/// Summary of a decoded input.
#[derive(Debug, Serialize)]
pub struct DecodeSummary {
    /// Decoded lines, in input order.
    pub records: Vec<DecodedLine>,
    /// Records counted by the transaction context.
    pub scanned: u64,
    /// Transactions closed.
    pub transactions: u64,
}

/// Runs the decode command.
pub fn run(
    catalog: &Path,
    input: Option<&Path>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let catalog = SchemaCatalog::from_json_file(catalog)?;
    let summary = match input {
        Some(path) => decode_lines(BufReader::new(File::open(path)?), &catalog)?,
        None => decode_lines(io::stdin().lock(), &catalog)?,
    };

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&summary)?),
        _ => print_text_output(&summary),
    }
    Ok(())
}

/// Decodes every line of `reader`, driving a transaction context.
pub fn decode_lines(
    reader: impl BufRead,
    catalog: &dyn ColumnCatalog,
) -> Result<DecodeSummary, Box<dyn std::error::Error>> {
    let decoder = Decoder::new();
    let mut context = TransactionContext::new();
    let mut records = Vec::new();

    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let number = index + 1;
        let record = parse_line(&line, number, context.open_xid());

        let decoded = decoder
            .decode(&record, catalog)
            .map_err(|e| format!("line {number}: {e}"))?;
        let step = match decoded {
            DecodedRecord::Begin { xid } => context
                .open_transaction(&xid)
                .map(|()| DecodedLine::Begin { xid }),
            DecodedRecord::Commit { xid, lsn } => context
                .close_transaction(&xid, lsn.clone())
                .map(|()| DecodedLine::Commit { xid, lsn }),
            DecodedRecord::Operation(operation) => {
                context
                    .add_operation(&record.xid)
                    .map(|()| DecodedLine::Operation {
                        xid: record.xid.clone(),
                        operation,
                    })
            }
        };
        records.push(step.map_err(|e| format!("line {number}: {e}"))?);
    }

    context.require_no_open_transaction()?;

    Ok(DecodeSummary {
        records,
        scanned: context.scanned(),
        transactions: context.transactions(),
    })
}

fn parse_line(line: &str, number: usize, open_xid: Option<&str>) -> WalRecord {
    let mut fields = line.splitn(3, '\t');
    if let (Some(lsn), Some(xid), Some(data)) = (fields.next(), fields.next(), fields.next()) {
        return WalRecord::new(Lsn::new(lsn), xid, data);
    }

    let xid = line
        .strip_prefix("BEGIN ")
        .or_else(|| line.strip_prefix("COMMIT "))
        .or(open_xid)
        .unwrap_or_default();
    WalRecord::new(Lsn::from_position(number as u64), xid, line)
}

fn print_text_output(summary: &DecodeSummary) {
    for record in &summary.records {
        match record {
            DecodedLine::Begin { xid } => println!("BEGIN {xid}"),
            DecodedLine::Commit { xid, lsn } => println!("COMMIT {xid} at {lsn}"),
            DecodedLine::Operation { operation, .. } => {
                println!("  {operation}");
                println!("    {}", operation.reconstruction_query());
            }
        }
    }
    println!();
    println!(
        "{} records, {} transactions",
        summary.scanned, summary.transactions
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use walindex_engine::CdcError;
    use walindex_protocol::OperationKind;
    use walindex_testkit::product_catalog;

    const RAW: &str = "\
BEGIN 500
table public.product: INSERT: id[bigint]:1 name[character varying]:'prod1' price[numeric]:100
table public.product: DELETE: id[bigint]:1
COMMIT 500
";

    #[test]
    fn raw_lines_take_the_enclosing_xid() {
        let summary = decode_lines(RAW.as_bytes(), &product_catalog()).unwrap();
        assert_eq!(summary.scanned, 4);
        assert_eq!(summary.transactions, 1);

        let DecodedLine::Operation { xid, operation } = &summary.records[2] else {
            panic!("expected an operation");
        };
        assert_eq!(xid, "500");
        assert_eq!(operation.kind(), OperationKind::Delete);
        assert!(operation.reconstruction_query().contains("NULL AS name"));
    }

    #[test]
    fn tab_separated_triples() {
        let input = "0/16B3748\t501\tBEGIN 501\n\
                     0/16B3748\t501\ttable public.product: UPDATE: id[bigint]:7 name[text]:'x'\n\
                     0/16B3820\t501\tCOMMIT 501\n";
        let summary = decode_lines(input.as_bytes(), &product_catalog()).unwrap();
        assert_eq!(summary.transactions, 1);
        assert!(matches!(
            &summary.records[2],
            DecodedLine::Commit { lsn, .. } if lsn.as_str() == "0/16B3820"
        ));
    }

    #[test]
    fn unterminated_transaction_is_reported() {
        let input = "BEGIN 500\ntable public.product: DELETE: id[bigint]:1\n";
        let err = decode_lines(input.as_bytes(), &product_catalog()).unwrap_err();
        let err = err.downcast::<CdcError>().unwrap();
        assert!(matches!(*err, CdcError::DanglingTransaction { .. }));
    }

    #[test]
    fn errors_name_the_line() {
        let input = "BEGIN 500\ntable public.product: TRUNCATE: (no-flags)\nCOMMIT 500\n";
        let err = decode_lines(input.as_bytes(), &product_catalog()).unwrap_err();
        assert!(err.to_string().starts_with("line 2:"));
    }

    #[test]
    fn catalog_file_is_loaded() {
        let file = walindex_testkit::catalog_file(&product_catalog());
        let catalog = SchemaCatalog::from_json_file(file.path()).unwrap();
        let summary = decode_lines(RAW.as_bytes(), &catalog).unwrap();
        assert_eq!(summary.records.len(), 4);
    }
}
