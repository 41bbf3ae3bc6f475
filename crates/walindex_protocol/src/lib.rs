//! # walindex Protocol
//!
//! Record model and parser for the `test_decoding` logical-decoding output.
//!
//! This crate provides:
//! - `WalRecord` and `Lsn` for rows read from a logical replication slot
//! - `Operation` for one parsed row-level change
//! - `Decoder` that turns raw record text into transaction boundaries or operations
//! - `ColumnCatalog` for the column-completion lookup the decoder needs
//!
//! This is a pure protocol crate with no I/O operations.
//!
//! ## Record format
//!
//! ```text
//! BEGIN 529
//! table public.product: INSERT: id[bigint]:1 name[character varying]:'prod1'
//! table public.product: DELETE: id[bigint]:1
//! COMMIT 529
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
// Production code MUST NOT use panic!/unwrap()/expect()
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod decoder;
mod error;
mod operation;
mod record;

pub use decoder::{ColumnCatalog, DecodedRecord, Decoder, NoColumns};
pub use error::{DecodeError, DecodeResult};
pub use operation::{ColumnValue, Operation, OperationKind};
pub use record::{Lsn, WalRecord};

/// The only logical-decoding output plugin the decoder understands.
pub const DECODING_PLUGIN: &str = "test_decoding";
