//! Run command implementation.

use crate::sink::JsonLinesSink;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{error, info, warn};
use walindex_engine::{
    CdcEngine, CdcError, CycleScheduler, EngineConfig, EntityRegistry, RetryConfig,
    SchemaCatalog, SinkAdapter,
};
use walindex_postgres::PgSource;

/// Options of the run command.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Run one cycle and exit.
    pub once: bool,
    /// Pause between cycles in milliseconds.
    pub interval_ms: u64,
    /// Attempts per cycle on transient errors.
    pub max_attempts: u32,
}

/// Runs the run command.
pub fn run(
    url: &str,
    slot: &str,
    catalog: &Path,
    options: &RunOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    let catalog = SchemaCatalog::from_json_file(catalog)?;
    let registry = EntityRegistry::build(&catalog, stdout_sinks(&catalog));
    if registry.is_empty() {
        return Err("the catalog maps no table that can be indexed".into());
    }

    let config = EngineConfig::new(slot).with_retry(RetryConfig::new(options.max_attempts));
    let source = Arc::new(PgSource::connect(url)?);
    let engine = CdcEngine::new(config, source.clone(), source, Arc::new(registry))?;
    let scheduler = CycleScheduler::start(engine)?;

    let interval = Duration::from_millis(options.interval_ms);
    loop {
        match scheduler.run_cycle(scheduler.cycle_timeout()) {
            Ok(report) => info!(
                transactions = report.transactions,
                acknowledged = report.acknowledged,
                dispatched = report.dispatched,
                skipped = report.skipped,
                "cycle completed"
            ),
            Err(e) if stops_the_loop(&e) => {
                scheduler.shutdown();
                return Err(e.into());
            }
            Err(CdcError::CycleTimeout { timeout }) => {
                warn!(?timeout, "cycle still running, waiting for it");
            }
            Err(e) => error!(error = %e, "cycle failed, records kept for the next cycle"),
        }

        if options.once {
            break;
        }
        thread::sleep(interval);
    }

    let stats = scheduler.stats();
    info!(
        cycles = stats.cycles_completed,
        failed = stats.cycles_failed,
        acknowledged = stats.records_acknowledged,
        "stopping"
    );
    scheduler.shutdown();
    Ok(())
}

/// One printing sink per declared entity type.
fn stdout_sinks(catalog: &SchemaCatalog) -> Vec<Arc<dyn SinkAdapter>> {
    catalog
        .entities
        .iter()
        .map(|e| Arc::new(JsonLinesSink::stdout(e.entity_type.clone())) as Arc<dyn SinkAdapter>)
        .collect()
}

/// Protocol drift and count mismatches need an operator.
fn stops_the_loop(e: &CdcError) -> bool {
    e.is_protocol() || e.is_consistency() || matches!(e, CdcError::WorkerClosed)
}
