//! Peek command implementation.

use walindex_engine::{EngineConfig, ReplicationSlot};
use walindex_postgres::PgSource;
use walindex_protocol::WalRecord;

/// Runs the peek command.
pub fn run(
    url: &str,
    slot: &str,
    limit: Option<usize>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = EngineConfig::new(slot);
    config.validate()?;

    let source = PgSource::connect(url)?;
    let records = source
        .peek(slot, config.fetch_size)?
        .take(limit.unwrap_or(usize::MAX))
        .collect::<Result<Vec<WalRecord>, _>>()?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&records)?),
        _ => print_text_output(&records),
    }
    Ok(())
}

fn print_text_output(records: &[WalRecord]) {
    println!("Pending records ({} shown)", records.len());
    println!("================");
    println!();

    for record in records {
        println!("[{:>12}] {:>8} {}", record.lsn.as_str(), record.xid, record.data);
    }
}
