//! Benchmark utilities.

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde_json::{json, Map, Value};
use walindex_protocol::{Lsn, WalRecord};

/// Generate random text of the specified length.
pub fn random_text(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// A product INSERT record with a description of `description_len` characters.
pub fn insert_line(id: u64, description_len: usize) -> String {
    format!(
        "table public.product: INSERT: id[bigint]:{id} name[character varying]:'prod{id}' \
         description[character varying]:'{}' brand[character varying]:'O''Hara' \
         category_id[bigint]:2 owner_id[bigint]:null price[numeric]:100.50 \
         updated[timestamp without time zone]:'2022-07-18 10:00:00'",
        random_text(description_len)
    )
}

/// A product DELETE record.
pub fn delete_line(id: u64) -> String {
    format!("table public.product: DELETE: id[bigint]:{id}")
}

/// One transaction of `operations` inserts, framed by BEGIN and COMMIT.
pub fn transaction_records(xid: u64, operations: u64) -> Vec<WalRecord> {
    let xid_text = xid.to_string();
    let base = xid * 0x1000;
    let mut records = vec![WalRecord::new(
        Lsn::from_position(base),
        xid_text.clone(),
        format!("BEGIN {xid}"),
    )];
    for n in 0..operations {
        records.push(WalRecord::new(
            Lsn::from_position(base + n + 1),
            xid_text.clone(),
            insert_line(n + 1, 32),
        ));
    }
    records.push(WalRecord::new(
        Lsn::from_position(base + operations + 1),
        xid_text,
        format!("COMMIT {xid}"),
    ));
    records
}

/// A product row for the in-memory database.
pub fn product_row() -> Map<String, Value> {
    let mut row = Map::new();
    row.insert("name".into(), json!(random_text(12)));
    row.insert("description".into(), json!(random_text(64)));
    row.insert("category_id".into(), json!(2));
    row.insert("price".into(), json!(100.5));
    row
}
