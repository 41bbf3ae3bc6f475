//! Check-slot command implementation.

use serde::Serialize;
use std::sync::Arc;
use walindex_engine::{CdcEngine, EngineConfig, EntityRegistry, ReplicationSlot, SchemaCatalog};
use walindex_postgres::PgSource;

/// Slot check result.
#[derive(Debug, Serialize)]
pub struct SlotReport {
    /// Slot name.
    pub slot_name: String,
    /// Output plugin of the slot.
    pub plugin: String,
    /// Slot type.
    pub slot_type: String,
    /// Records visible through peek.
    pub pending_records: u64,
}

/// Runs the check-slot command.
pub fn run(url: &str, slot: &str, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let source = Arc::new(PgSource::connect(url)?);
    let info = source
        .describe(slot)?
        .ok_or_else(|| format!("replication slot {slot} does not exist"))?;

    // Building an engine applies the same checks as `run`.
    let registry = EntityRegistry::build(&SchemaCatalog::default(), Vec::new());
    let engine = CdcEngine::new(
        EngineConfig::new(slot),
        source.clone(),
        source,
        Arc::new(registry),
    )?;

    let report = SlotReport {
        slot_name: info.slot_name,
        plugin: info.plugin,
        slot_type: info.slot_type,
        pending_records: engine.pending_records()?,
    };

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&report)?),
        _ => print_text_output(&report),
    }
    Ok(())
}

fn print_text_output(report: &SlotReport) {
    println!("Replication slot {}", report.slot_name);
    println!("================");
    println!("type:            {}", report.slot_type);
    println!("plugin:          {}", report.plugin);
    println!("pending records: {}", report.pending_records);
}
