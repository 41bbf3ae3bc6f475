//! # walindex Testkit
//!
//! Test utilities for walindex.
//!
//! This crate provides:
//! - An in-memory system-of-record that writes `test_decoding` records
//!   through an in-memory replication slot
//! - An evaluator for the decoder's reconstruction queries
//! - Product fixtures and a harness running a scheduler
//! - A CDC-backed product write path
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use walindex_testkit::prelude::*;
//!
//! #[test]
//! fn create_is_indexed() {
//!     let harness = CdcHarness::products();
//!     let service = ProductService::from_harness(&harness);
//!     let product = service.create(&Product::new("prod1", 2, 100.0)).unwrap();
//!     assert!(product.is_some());
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod memory;
pub mod service;
pub mod sql;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::memory::*;
    pub use crate::service::*;
    pub use crate::sql::*;
}

pub use fixtures::*;
pub use generators::*;
pub use memory::*;
pub use service::*;
pub use sql::*;
