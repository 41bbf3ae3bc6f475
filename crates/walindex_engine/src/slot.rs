//! Seams to the system-of-record: the replication slot and the reconstruction queries.

use crate::error::CdcResult;
use serde::Serialize;
use walindex_protocol::{Lsn, WalRecord};

/// A reconstructed row, column name to JSON value.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Records yielded by a peek, in slot (LSN) order.
pub type RecordStream<'a> = Box<dyn Iterator<Item = CdcResult<WalRecord>> + 'a>;

/// Catalog data of a replication slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotInfo {
    /// Slot name.
    pub slot_name: String,
    /// Output plugin the slot decodes with.
    pub plugin: String,
    /// `logical` or `physical`.
    pub slot_type: String,
}

impl SlotInfo {
    /// Creates slot info for a logical slot.
    pub fn logical(slot_name: impl Into<String>, plugin: impl Into<String>) -> Self {
        Self {
            slot_name: slot_name.into(),
            plugin: plugin.into(),
            slot_type: "logical".to_string(),
        }
    }

    /// Returns true if the slot is a logical slot.
    pub fn is_logical(&self) -> bool {
        self.slot_type == "logical"
    }
}

/// A logical replication slot.
///
/// Only one consumer may read a slot at a time; the engine guarantees this
/// for itself by running cycles on a single worker.
pub trait ReplicationSlot: Send + Sync {
    /// Looks up a slot, returning `None` if it does not exist.
    fn describe(&self, slot: &str) -> CdcResult<Option<SlotInfo>>;

    /// Streams all pending records without consuming them.
    ///
    /// The stream is forward-only and holds at most `fetch_size` records in
    /// memory. It must be dropped before the slot is acknowledged.
    fn peek<'a>(&'a self, slot: &str, fetch_size: u32) -> CdcResult<RecordStream<'a>>;

    /// Consumes all records up to and including `upto`, returning how many
    /// were removed.
    fn consume_up_to(&self, slot: &str, upto: &Lsn) -> CdcResult<u64>;
}

/// The system-of-record the reconstruction queries run against.
pub trait SourceDatabase: Send + Sync {
    /// Runs a reconstruction query and returns its single row.
    fn reconstruct(&self, query: &str) -> CdcResult<Row>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logical_slot_info() {
        let info = SlotInfo::logical("elk_slot", "test_decoding");
        assert!(info.is_logical());
        assert_eq!(info.plugin, "test_decoding");

        let physical = SlotInfo {
            slot_type: "physical".into(),
            ..info
        };
        assert!(!physical.is_logical());
    }
}
