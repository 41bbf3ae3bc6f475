//! CLI command implementations.

pub mod check_slot;
pub mod decode;
pub mod peek;
pub mod run;
