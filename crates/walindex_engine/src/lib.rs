//! # walindex Engine
//!
//! Change-data-capture engine that keeps a search index consistent with a
//! PostgreSQL logical replication slot.
//!
//! This crate provides:
//! - Transaction-boundary state machine (idle → in transaction → idle)
//! - Declarative schema catalog and entity metadata registry
//! - Sink adapter capability with exact-then-supertype lookup
//! - The peek → decode → dispatch → acknowledge cycle
//! - Single-worker scheduler with a bounded caller wait
//! - Retry with exponential backoff for transient slot and database errors
//!
//! ## Architecture
//!
//! A cycle reads every pending record of the slot without consuming it,
//! dispatches each row change to its sink as it is read, and only then
//! consumes the slot up to the last COMMIT:
//! 1. Peek the slot through a forward-only stream
//! 2. Decode each record and advance the transaction context
//! 3. Reconstruct and dispatch each operation
//! 4. Acknowledge up to the last COMMIT and compare counts
//!
//! ## Key Invariants
//!
//! - At most one transaction is open during a scan
//! - Every record scanned is acknowledged exactly once
//! - At most one cycle runs at a time
//! - A failed cycle leaves the slot untouched (delivery is at-least-once)
//! - Sinks are idempotent

#![deny(unsafe_code)]
#![warn(missing_docs)]
// Production code MUST NOT use panic!/unwrap()/expect()
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod catalog;
mod config;
mod context;
mod engine;
mod error;
mod registry;
mod scheduler;
mod sink;
mod slot;

pub use catalog::{CatalogBuilder, EntityMapping, SchemaCatalog, TableMapping};
pub use config::{EngineConfig, RetryConfig};
pub use context::{TransactionContext, TxState};
pub use engine::{CdcEngine, CycleReport, DispatchOutcome, EngineStats};
pub use error::{CdcError, CdcResult};
pub use registry::{EntityRegistry, RegistryEntry, RegistryWarning};
pub use scheduler::{CycleScheduler, PendingCycle};
pub use sink::{Entity, MemorySink, SinkAdapter, SinkCall};
pub use slot::{RecordStream, ReplicationSlot, Row, SlotInfo, SourceDatabase};
