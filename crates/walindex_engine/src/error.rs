//! Error types for the CDC engine.

use std::time::Duration;
use thiserror::Error;
use walindex_protocol::DecodeError;

/// Result type for CDC operations.
pub type CdcResult<T> = Result<T, CdcError>;

/// Errors that can occur while running the CDC engine.
#[derive(Error, Debug)]
pub enum CdcError {
    /// A record could not be decoded.
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// BEGIN seen while another transaction is open.
    #[error("transaction {open_xid} is not committed, cannot begin {xid}")]
    TransactionAlreadyOpen {
        /// Xid of the open transaction.
        open_xid: String,
        /// Xid of the BEGIN record.
        xid: String,
    },

    /// Operation or COMMIT seen outside of a transaction.
    #[error("no open transaction for record of xid {xid}")]
    NoOpenTransaction {
        /// Xid of the record.
        xid: String,
    },

    /// Record xid differs from the open transaction.
    #[error("context xid ({open_xid}) <> record xid ({xid})")]
    XidMismatch {
        /// Xid of the open transaction.
        open_xid: String,
        /// Xid of the record.
        xid: String,
    },

    /// The cursor was exhausted inside a transaction.
    #[error("transaction {xid} is still open at the end of the scan")]
    DanglingTransaction {
        /// Xid of the open transaction.
        xid: String,
    },

    /// A registered table's record did not carry one of its id columns.
    #[error("record of table [{table}] lacks id column [{column}]")]
    MissingKey {
        /// Table of the record.
        table: String,
        /// The missing id column.
        column: String,
    },

    /// The acknowledgement removed a different number of records than scanned.
    #[error("scanned records ({scanned}) <> acknowledged records ({acknowledged})")]
    AcknowledgementMismatch {
        /// Records scanned by the cycle.
        scanned: u64,
        /// Records removed from the slot.
        acknowledged: u64,
    },

    /// The configured replication slot does not exist.
    #[error("replication slot [{slot}] not found")]
    SlotNotFound {
        /// Slot name.
        slot: String,
    },

    /// The slot uses an output plugin the decoder does not understand.
    #[error("replication slot [{slot}] uses plugin [{actual}], expected [{expected}]")]
    SlotPluginMismatch {
        /// Slot name.
        slot: String,
        /// Expected plugin.
        expected: String,
        /// Plugin reported by the slot.
        actual: String,
    },

    /// The slot is not a logical slot.
    #[error("replication slot [{slot}] is of type [{slot_type}], expected logical")]
    SlotNotLogical {
        /// Slot name.
        slot: String,
        /// Slot type reported by the database.
        slot_type: String,
    },

    /// Reading or acknowledging the slot failed.
    #[error("replication slot error: {message}")]
    Slot {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// A query against the system-of-record failed.
    #[error("database error: {message}")]
    Database {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// The reconstruction query did not yield a row.
    #[error("could not reconstruct row with [{query}]: {message}")]
    Reconstruction {
        /// The reconstruction query.
        query: String,
        /// Error message.
        message: String,
    },

    /// A sink rejected an entity.
    #[error("sink for {entity_type} failed: {message}")]
    Sink {
        /// Entity type the sink serves.
        entity_type: String,
        /// Error message.
        message: String,
    },

    /// The schema catalog is inconsistent.
    #[error("catalog error: {0}")]
    Catalog(String),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// The cycle did not finish within the caller's wait.
    #[error("cycle still in flight after {timeout:?}; increase the timeout and retry without writes")]
    CycleTimeout {
        /// The wait that elapsed.
        timeout: Duration,
    },

    /// The request queue is full and the caller did not wait for a slot.
    #[error("CDC request queue is full ({capacity} cycles waiting)")]
    QueueFull {
        /// Capacity of the request queue.
        capacity: usize,
    },

    /// The worker thread is gone.
    #[error("CDC worker is not running")]
    WorkerClosed,

    /// The worker thread could not be started.
    #[error("failed to spawn CDC worker: {0}")]
    WorkerSpawn(#[source] std::io::Error),
}

impl CdcError {
    /// Creates a retryable slot error.
    pub fn slot_retryable(message: impl Into<String>) -> Self {
        Self::Slot {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable slot error.
    pub fn slot_fatal(message: impl Into<String>) -> Self {
        Self::Slot {
            message: message.into(),
            retryable: false,
        }
    }

    /// Creates a retryable database error.
    pub fn database_retryable(message: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable database error.
    pub fn database_fatal(message: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if the record stream drifted from the supported format
    /// or broke a transaction-boundary invariant.
    pub fn is_protocol(&self) -> bool {
        matches!(
            self,
            CdcError::Decode(_)
                | CdcError::TransactionAlreadyOpen { .. }
                | CdcError::NoOpenTransaction { .. }
                | CdcError::XidMismatch { .. }
                | CdcError::DanglingTransaction { .. }
                | CdcError::MissingKey { .. }
        )
    }

    /// Returns true if the scan and the acknowledgement disagree.
    ///
    /// This needs an operator: it means a decoder bug or a second consumer
    /// on the slot.
    pub fn is_consistency(&self) -> bool {
        matches!(self, CdcError::AcknowledgementMismatch { .. })
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            CdcError::Slot { retryable, .. } | CdcError::Database { retryable, .. } => *retryable,
            _ => false,
        }
    }
}
