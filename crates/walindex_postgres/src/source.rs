//! Blocking PostgreSQL access for the engine.

use crate::queries;
use std::collections::VecDeque;
use std::future::Future;
use tokio::runtime::{Builder, Runtime};
use tokio_postgres::error::SqlState;
use tokio_postgres::{Client, NoTls};
use tracing::{debug, error, warn};
use walindex_engine::{
    CdcError, CdcResult, RecordStream, ReplicationSlot, Row, SlotInfo, SourceDatabase,
};
use walindex_protocol::{Lsn, WalRecord};

/// A PostgreSQL connection serving as replication slot and source database.
///
/// Owns a current-thread runtime that drives the connection while a call
/// blocks. Peek cursors and reconstruction queries share the connection, so
/// a peek stream must be dropped before the slot is acknowledged.
pub struct PgSource {
    runtime: Runtime,
    client: Client,
}

impl PgSource {
    /// Connects to `url`, a `postgres://` URL or a key-value connection string.
    pub fn connect(url: &str) -> CdcResult<Self> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| CdcError::database_fatal(format!("failed to build runtime: {e}")))?;

        let (client, connection) = runtime
            .block_on(tokio_postgres::connect(url, NoTls))
            .map_err(database_error)?;
        runtime.spawn(async move {
            if let Err(e) = connection.await {
                error!(error = %e, "postgres connection closed");
            }
        });

        debug!("connected to postgres");
        Ok(Self { runtime, client })
    }

    fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }

    fn fetch(&self, fetch_size: u32) -> CdcResult<Vec<WalRecord>> {
        let rows = self
            .block_on(self.client.query(&queries::fetch_peek_cursor(fetch_size), &[]))
            .map_err(slot_error)?;

        rows.iter()
            .map(|row| {
                let lsn: String = row.try_get(0).map_err(slot_error)?;
                let xid: String = row.try_get(1).map_err(slot_error)?;
                let data: String = row.try_get(2).map_err(slot_error)?;
                Ok(WalRecord::new(Lsn::new(lsn), xid, data))
            })
            .collect()
    }

    fn close_cursor(&self, commit: bool) {
        if let Err(e) = self.block_on(
            self.client
                .batch_execute(&queries::close_peek_cursor(commit)),
        ) {
            warn!(error = %e, "failed to close peek cursor");
        }
    }
}

impl ReplicationSlot for PgSource {
    fn describe(&self, slot: &str) -> CdcResult<Option<SlotInfo>> {
        let row = self
            .block_on(self.client.query_opt(queries::DESCRIBE_SLOT, &[&slot]))
            .map_err(slot_error)?;

        row.map(|row| {
            Ok(SlotInfo {
                slot_name: row.try_get(0).map_err(slot_error)?,
                plugin: row.try_get(1).map_err(slot_error)?,
                slot_type: row.try_get(2).map_err(slot_error)?,
            })
        })
        .transpose()
    }

    fn peek<'a>(&'a self, slot: &str, fetch_size: u32) -> CdcResult<RecordStream<'a>> {
        self.block_on(
            self.client
                .batch_execute(&queries::open_peek_cursor(slot)),
        )
        .map_err(slot_error)?;

        Ok(Box::new(PeekCursor {
            source: self,
            fetch_size: fetch_size.max(1),
            buffer: VecDeque::new(),
            exhausted: false,
            open: true,
        }))
    }

    fn consume_up_to(&self, slot: &str, upto: &Lsn) -> CdcResult<u64> {
        let row = self
            .block_on(
                self.client
                    .query_one(queries::CONSUME_UP_TO, &[&slot, &upto.as_str()]),
            )
            .map_err(slot_error)?;
        let count: i64 = row.try_get(0).map_err(slot_error)?;
        Ok(u64::try_from(count).unwrap_or_default())
    }
}

impl SourceDatabase for PgSource {
    fn reconstruct(&self, query: &str) -> CdcResult<Row> {
        let row = self
            .block_on(self.client.query_one(&queries::row_as_json(query), &[]))
            .map_err(database_error)?;
        let json: String = row.try_get(0).map_err(database_error)?;

        match serde_json::from_str(&json) {
            Ok(serde_json::Value::Object(row)) => Ok(row),
            Ok(other) => Err(CdcError::Reconstruction {
                query: query.to_string(),
                message: format!("expected a JSON object, got {other}"),
            }),
            Err(e) => Err(CdcError::Reconstruction {
                query: query.to_string(),
                message: e.to_string(),
            }),
        }
    }
}

/// Forward-only stream over the peek cursor.
struct PeekCursor<'a> {
    source: &'a PgSource,
    fetch_size: u32,
    buffer: VecDeque<WalRecord>,
    exhausted: bool,
    open: bool,
}

impl PeekCursor<'_> {
    fn close(&mut self, commit: bool) {
        if self.open {
            self.open = false;
            self.source.close_cursor(commit);
        }
    }
}

impl Iterator for PeekCursor<'_> {
    type Item = CdcResult<WalRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(record) = self.buffer.pop_front() {
            return Some(Ok(record));
        }
        if self.exhausted {
            return None;
        }

        match self.source.fetch(self.fetch_size) {
            Ok(records) => {
                // A short batch is the last one.
                if records.len() < self.fetch_size as usize {
                    self.exhausted = true;
                }
                self.buffer.extend(records);
                match self.buffer.pop_front() {
                    Some(record) => Some(Ok(record)),
                    None => {
                        self.exhausted = true;
                        self.close(true);
                        None
                    }
                }
            }
            Err(e) => {
                self.exhausted = true;
                self.close(false);
                Some(Err(e))
            }
        }
    }
}

impl Drop for PeekCursor<'_> {
    fn drop(&mut self) {
        // Exhausting the cursor commits; an abandoned scan rolls back.
        let commit = self.exhausted && self.buffer.is_empty();
        self.close(commit);
    }
}

/// Returns true for SQLSTATEs that describe a condition that may clear up.
pub fn is_transient(state: &SqlState) -> bool {
    let code = state.code();
    code.starts_with("08")
        || code.starts_with("53")
        || code == SqlState::ADMIN_SHUTDOWN.code()
        || code == SqlState::CRASH_SHUTDOWN.code()
        || code == SqlState::CANNOT_CONNECT_NOW.code()
        || code == SqlState::T_R_SERIALIZATION_FAILURE.code()
        || code == SqlState::T_R_DEADLOCK_DETECTED.code()
        || code == SqlState::OBJECT_IN_USE.code()
}

fn retryable(e: &tokio_postgres::Error) -> bool {
    e.is_closed() || e.code().is_some_and(is_transient)
}

fn slot_error(e: tokio_postgres::Error) -> CdcError {
    CdcError::Slot {
        retryable: retryable(&e),
        message: e.to_string(),
    }
}

fn database_error(e: tokio_postgres::Error) -> CdcError {
    CdcError::Database {
        retryable: retryable(&e),
        message: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_states() {
        assert!(is_transient(&SqlState::CONNECTION_FAILURE));
        assert!(is_transient(&SqlState::ADMIN_SHUTDOWN));
        assert!(is_transient(&SqlState::OBJECT_IN_USE));
        assert!(is_transient(&SqlState::TOO_MANY_CONNECTIONS));
        assert!(!is_transient(&SqlState::UNDEFINED_OBJECT));
        assert!(!is_transient(&SqlState::SYNTAX_ERROR));
        assert!(!is_transient(&SqlState::INSUFFICIENT_PRIVILEGE));
    }
}
