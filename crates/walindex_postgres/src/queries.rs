//! SQL text sent to the server.

/// Name of the server-side cursor used by peeks.
pub(crate) const PEEK_CURSOR: &str = "walindex_peek";

/// Looks up a slot in `pg_replication_slots`.
pub(crate) const DESCRIBE_SLOT: &str = "SELECT slot_name::text, coalesce(plugin::text, ''), slot_type::text \
     FROM pg_replication_slots WHERE slot_name = $1";

/// Consumes the slot up to an LSN and counts the removed records.
pub(crate) const CONSUME_UP_TO: &str =
    "SELECT count(*) FROM pg_logical_slot_get_changes($1, $2::text::pg_lsn, NULL)";

/// Quotes a string as an SQL literal.
pub(crate) fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Opens a transaction and a forward-only cursor over the pending records.
pub(crate) fn open_peek_cursor(slot: &str) -> String {
    format!(
        "BEGIN; DECLARE {PEEK_CURSOR} NO SCROLL CURSOR FOR \
         SELECT lsn::text, xid::text, data FROM pg_logical_slot_peek_changes({}, NULL, NULL)",
        quote_literal(slot)
    )
}

/// Fetches the next batch of the peek cursor.
pub(crate) fn fetch_peek_cursor(fetch_size: u32) -> String {
    format!("FETCH FORWARD {fetch_size} FROM {PEEK_CURSOR}")
}

/// Closes the peek cursor and its transaction.
pub(crate) fn close_peek_cursor(commit: bool) -> String {
    if commit {
        format!("CLOSE {PEEK_CURSOR}; COMMIT")
    } else {
        "ROLLBACK".to_string()
    }
}

/// Wraps a reconstruction query so the row comes back as JSON text.
pub(crate) fn row_as_json(query: &str) -> String {
    format!("SELECT row_to_json(r)::text FROM ({query}) AS r")
}
