//! # walindex Postgres
//!
//! PostgreSQL access for the walindex engine.
//!
//! This crate provides:
//! - A replication slot over `pg_logical_slot_peek_changes` and
//!   `pg_logical_slot_get_changes`
//! - A source database that reconstructs rows with the decoder's projections
//! - SQLSTATE classification for retry decisions
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use walindex_engine::{CdcEngine, EngineConfig, EntityRegistry};
//! use walindex_postgres::PgSource;
//!
//! let source = Arc::new(PgSource::connect("postgres://localhost/shop")?);
//! let engine = CdcEngine::new(
//!     EngineConfig::new("elk_slot"),
//!     source.clone(),
//!     source,
//!     Arc::new(registry),
//! )?;
//! let report = engine.run_cycle()?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod queries;
mod source;

pub use source::{is_transient, PgSource};
