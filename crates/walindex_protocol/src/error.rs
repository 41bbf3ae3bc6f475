//! Decoding errors.
//!
//! Every variant means the record text drifted from the format the decoder
//! supports. They are fatal for the cycle that hit them: skipping a record
//! would break the scanned/acknowledged count.

use thiserror::Error;

/// Result type for decoding operations.
pub type DecodeResult<T> = Result<T, DecodeError>;

/// Errors raised while decoding a raw record.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The xid written in a BEGIN/COMMIT line differs from the record's xid.
    #[error("{kind} xid [{line_xid}] does not match record xid [{record_xid}]")]
    ProtocolMismatch {
        /// `BEGIN` or `COMMIT`.
        kind: &'static str,
        /// Xid parsed from the line.
        line_xid: String,
        /// Xid column of the record.
        record_xid: String,
    },

    /// A `table ` line without a recognizable table/operation header.
    #[error("could not find the table name or the operation in [{data}]")]
    MalformedHeader {
        /// The raw record text.
        data: String,
    },

    /// The header named an operation other than INSERT, UPDATE or DELETE.
    #[error("unknown operation [{operation}] in [{data}]")]
    UnknownOperation {
        /// The operation keyword found.
        operation: String,
        /// The raw record text.
        data: String,
    },

    /// Text left over after the last column/value pair.
    #[error("unexpected tail [{tail}] in [{data}]")]
    TrailingGarbage {
        /// The unparsed remainder.
        tail: String,
        /// The raw record text.
        data: String,
    },

    /// The same column appeared twice in one record.
    #[error("column [{column}] repeated in [{data}]")]
    DuplicateColumn {
        /// The repeated column.
        column: String,
        /// The raw record text.
        data: String,
    },

    /// The line is neither BEGIN, COMMIT nor a table change.
    #[error("unrecognized record format [{data}]")]
    UnrecognizedRecordFormat {
        /// The raw record text.
        data: String,
    },
}
