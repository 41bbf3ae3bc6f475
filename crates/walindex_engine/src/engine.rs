//! The CDC engine: one peek, decode, dispatch and acknowledge cycle.

use crate::config::EngineConfig;
use crate::context::TransactionContext;
use crate::error::{CdcError, CdcResult};
use crate::registry::EntityRegistry;
use crate::sink::Entity;
use crate::slot::{ReplicationSlot, SourceDatabase};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use walindex_protocol::{DecodedRecord, Decoder, Lsn, Operation, OperationKind};

/// Statistics about CDC cycles.
#[derive(Debug, Clone, Default)]
pub struct EngineStats {
    /// Cycles that acknowledged the slot.
    pub cycles_completed: u64,
    /// Cycles that failed.
    pub cycles_failed: u64,
    /// Transactions processed by completed cycles.
    pub transactions_processed: u64,
    /// Records removed from the slot.
    pub records_acknowledged: u64,
    /// Operations handed to a sink.
    pub operations_dispatched: u64,
    /// Operations outside the registry.
    pub operations_skipped: u64,
    /// Retries after transient errors.
    pub retries: u64,
    /// When the last cycle completed.
    pub last_cycle_at: Option<Instant>,
    /// Message of the last failure, cleared by the next completed cycle.
    pub last_error: Option<String>,
}

/// Result of a completed cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleReport {
    /// Transactions closed by the cycle.
    pub transactions: u64,
    /// Records scanned, boundaries included.
    pub scanned: u64,
    /// Records removed from the slot.
    pub acknowledged: u64,
    /// Operations handed to a sink.
    pub dispatched: u64,
    /// Operations outside the registry.
    pub skipped: u64,
    /// LSN of the last COMMIT, if any.
    pub last_lsn: Option<Lsn>,
    /// Wall time of the cycle.
    pub duration: Duration,
}

/// What happened to one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The operation reached a sink.
    Dispatched,
    /// The table or its entity type has no sink.
    Skipped,
}

/// Keeps the search index in step with a replication slot.
///
/// The engine is not safe to run from two threads at once: two cycles would
/// peek the same pending records. Use [`CycleScheduler`](crate::CycleScheduler)
/// to serialize cycles.
pub struct CdcEngine<S: ReplicationSlot, D: SourceDatabase> {
    config: EngineConfig,
    slot: Arc<S>,
    database: Arc<D>,
    registry: Arc<EntityRegistry>,
    decoder: Decoder,
    stats: Arc<RwLock<EngineStats>>,
}

impl<S: ReplicationSlot, D: SourceDatabase> CdcEngine<S, D> {
    /// Creates an engine after checking the configuration and the slot.
    ///
    /// Fails if the slot does not exist, is not a logical slot or decodes
    /// with another plugin than the configured one.
    pub fn new(
        config: EngineConfig,
        slot: Arc<S>,
        database: Arc<D>,
        registry: Arc<EntityRegistry>,
    ) -> CdcResult<Self> {
        config.validate()?;

        let info = slot
            .describe(&config.slot_name)?
            .ok_or_else(|| CdcError::SlotNotFound {
                slot: config.slot_name.clone(),
            })?;
        if !info.is_logical() {
            return Err(CdcError::SlotNotLogical {
                slot: info.slot_name,
                slot_type: info.slot_type,
            });
        }
        if info.plugin != config.plugin {
            return Err(CdcError::SlotPluginMismatch {
                slot: info.slot_name,
                expected: config.plugin.clone(),
                actual: info.plugin,
            });
        }

        info!(
            slot = %config.slot_name,
            plugin = %config.plugin,
            tables = registry.len(),
            "CDC engine ready"
        );

        Ok(Self {
            config,
            slot,
            database,
            registry,
            decoder: Decoder::new(),
            stats: Arc::new(RwLock::new(EngineStats::default())),
        })
    }

    /// Returns the configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Returns the registry.
    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    /// Gets the current stats.
    pub fn stats(&self) -> EngineStats {
        self.stats.read().clone()
    }

    /// Returns a handle on the stats that stays valid after the engine moves.
    pub fn stats_handle(&self) -> Arc<RwLock<EngineStats>> {
        Arc::clone(&self.stats)
    }

    /// Runs one cycle.
    ///
    /// Every pending record is decoded and every operation is dispatched as
    /// it is read. Once the scan ends outside a transaction, the slot is
    /// acknowledged up to the last COMMIT and the number of removed records
    /// must equal the number scanned. Any failure before the acknowledgement
    /// leaves the slot untouched, so the next cycle dispatches the same
    /// operations again.
    pub fn run_cycle(&self) -> CdcResult<CycleReport> {
        let start = Instant::now();

        match self.scan_and_acknowledge() {
            Ok(mut report) => {
                report.duration = start.elapsed();
                {
                    let mut stats = self.stats.write();
                    stats.cycles_completed += 1;
                    stats.transactions_processed += report.transactions;
                    stats.records_acknowledged += report.acknowledged;
                    stats.operations_dispatched += report.dispatched;
                    stats.operations_skipped += report.skipped;
                    stats.last_cycle_at = Some(Instant::now());
                    stats.last_error = None;
                }
                debug!(
                    transactions = report.transactions,
                    scanned = report.scanned,
                    last_lsn = report.last_lsn.as_ref().map(Lsn::as_str),
                    "cycle completed"
                );
                Ok(report)
            }
            Err(e) => {
                self.handle_error(&e);
                Err(e)
            }
        }
    }

    /// Runs a cycle, retrying transient slot and database errors.
    pub fn run_cycle_with_retry(&self) -> CdcResult<CycleReport> {
        let retry_config = &self.config.retry;
        let attempts = retry_config.max_attempts.max(1);

        for attempt in 0..attempts {
            if attempt > 0 {
                let delay = retry_config.delay_for_attempt(attempt);
                std::thread::sleep(delay);
                self.stats.write().retries += 1;
            }

            match self.run_cycle() {
                Ok(report) => return Ok(report),
                Err(e) if e.is_retryable() && attempt + 1 < attempts => {
                    warn!(attempt, error = %e, "cycle failed, retrying");
                }
                Err(e) => return Err(e),
            }
        }

        Err(CdcError::slot_fatal("no cycle attempt made"))
    }

    /// Counts the records currently pending in the slot without consuming them.
    pub fn pending_records(&self) -> CdcResult<u64> {
        self.slot
            .peek(&self.config.slot_name, self.config.fetch_size)?
            .try_fold(0u64, |count, record| record.map(|_| count + 1))
    }

    /// Hands one operation to the sink of its entity type.
    ///
    /// Tables outside the registry and entity types without a sink are
    /// logged and skipped. A record lacking one of the id columns fails with
    /// [`CdcError::MissingKey`]. Otherwise the row is reconstructed and
    /// routed by kind: INSERT to `create`, UPDATE to `update`, DELETE to
    /// `delete`.
    pub fn dispatch(&self, op: &Operation) -> CdcResult<DispatchOutcome> {
        let Some(entry) = self.registry.resolve_by_table(op.table()) else {
            warn!(table = op.table(), "table not registered, skipping operation");
            return Ok(DispatchOutcome::Skipped);
        };
        let Some(sink) = self.registry.sink_for(&entry.entity_type) else {
            warn!(
                table = op.table(),
                entity_type = %entry.entity_type,
                "no sink for entity type, skipping operation"
            );
            return Ok(DispatchOutcome::Skipped);
        };

        let key = entry
            .id_columns
            .iter()
            .zip(op.key_values(&entry.id_columns))
            .map(|(column, value)| {
                value
                    .map(str::to_string)
                    .ok_or_else(|| CdcError::MissingKey {
                        table: op.table().to_string(),
                        column: column.clone(),
                    })
            })
            .collect::<CdcResult<Vec<_>>>()?;
        let fields = self.database.reconstruct(op.reconstruction_query())?;
        let entity = Entity {
            entity_type: entry.entity_type.clone(),
            table: entry.table.clone(),
            key,
            fields,
        };

        match op.kind() {
            OperationKind::Insert => sink.create(&entity)?,
            OperationKind::Update => sink.update(&entity)?,
            OperationKind::Delete => sink.delete(&entity)?,
        }

        debug!(
            operation = %op,
            entity_type = %entity.entity_type,
            key = %entity.key_string(),
            "dispatched operation"
        );
        Ok(DispatchOutcome::Dispatched)
    }

    fn scan_and_acknowledge(&self) -> CdcResult<CycleReport> {
        let slot_name = self.config.slot_name.as_str();
        let mut ctx = TransactionContext::new();
        let mut dispatched = 0u64;
        let mut skipped = 0u64;

        // The stream is dropped before acknowledging.
        {
            let records = self.slot.peek(slot_name, self.config.fetch_size)?;
            for record in records {
                let record = record?;
                match self.decoder.decode(&record, &*self.registry)? {
                    DecodedRecord::Begin { xid } => ctx.open_transaction(&xid)?,
                    DecodedRecord::Commit { xid, lsn } => ctx.close_transaction(&xid, lsn)?,
                    DecodedRecord::Operation(op) => {
                        ctx.add_operation(&record.xid)?;
                        match self.dispatch(&op)? {
                            DispatchOutcome::Dispatched => dispatched += 1,
                            DispatchOutcome::Skipped => skipped += 1,
                        }
                    }
                }
            }
        }

        ctx.require_no_open_transaction()?;

        let acknowledged = match ctx.last_lsn() {
            Some(lsn) => self.slot.consume_up_to(slot_name, lsn)?,
            None => 0,
        };
        if acknowledged != ctx.scanned() {
            return Err(CdcError::AcknowledgementMismatch {
                scanned: ctx.scanned(),
                acknowledged,
            });
        }

        Ok(CycleReport {
            transactions: ctx.transactions(),
            scanned: ctx.scanned(),
            acknowledged,
            dispatched,
            skipped,
            last_lsn: ctx.last_lsn().cloned(),
            duration: Duration::ZERO,
        })
    }

    fn handle_error(&self, error: &CdcError) {
        let mut stats = self.stats.write();
        stats.cycles_failed += 1;
        stats.last_error = Some(error.to_string());
    }
}
