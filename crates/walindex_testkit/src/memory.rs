//! In-memory system-of-record.
//!
//! [`MemoryDatabase`] stores rows per table and writes one
//! `test_decoding`-formatted record per change into an in-memory WAL that
//! its replication slots read. It serves as both the slot and the source
//! database of an engine.

use crate::sql::evaluate_projection;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::{BTreeMap, VecDeque};
use tracing::trace;
use walindex_engine::{
    CdcError, CdcResult, RecordStream, ReplicationSlot, Row, SlotInfo, SourceDatabase,
};
use walindex_protocol::{Lsn, OperationKind, WalRecord, DECODING_PLUGIN};

const FIRST_LSN: u64 = 0x0100_0000;
const LSN_STEP: u64 = 0x28;
const FIRST_XID: u64 = 500;

/// A column of a table definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    /// Column name.
    pub name: String,
    /// PostgreSQL type name as printed by `test_decoding`.
    pub data_type: String,
}

/// Definition of a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDef {
    /// Schema name.
    pub schema: String,
    /// Table name.
    pub name: String,
    /// Columns in declaration order.
    pub columns: Vec<ColumnDef>,
    /// Primary-key columns.
    pub id_columns: Vec<String>,
}

impl TableDef {
    /// Starts a table in the `public` schema.
    pub fn new(name: &str) -> Self {
        Self {
            schema: "public".to_string(),
            name: name.to_string(),
            columns: Vec::new(),
            id_columns: Vec::new(),
        }
    }

    /// Adds a primary-key column.
    pub fn id(mut self, name: &str, data_type: &str) -> Self {
        self.id_columns.push(name.to_string());
        self.column(name, data_type)
    }

    /// Adds a column.
    pub fn column(mut self, name: &str, data_type: &str) -> Self {
        self.columns.push(ColumnDef {
            name: name.to_string(),
            data_type: data_type.to_string(),
        });
        self
    }

    /// Returns the columns that are not part of the key.
    pub fn non_id_columns(&self) -> Vec<&str> {
        self.columns
            .iter()
            .map(|c| c.name.as_str())
            .filter(|c| !self.id_columns.iter().any(|id| id == c))
            .collect()
    }

    fn key_of(&self, row: &Row) -> CdcResult<String> {
        let mut parts = Vec::with_capacity(self.id_columns.len());
        for id in &self.id_columns {
            match row.get(id) {
                None | Some(Value::Null) => {
                    return Err(CdcError::database_fatal(format!(
                        "null value in column \"{id}\" of relation \"{}\"",
                        self.name
                    )))
                }
                Some(value) => parts.push(text_of(value)),
            }
        }
        Ok(parts.join("/"))
    }

    fn line(&self, kind: OperationKind, row: &Row) -> String {
        let mut line = format!("table {}.{}: {}:", self.schema, self.name, kind);
        for column in &self.columns {
            if kind == OperationKind::Delete && !self.id_columns.contains(&column.name) {
                continue;
            }
            let value = row.get(&column.name).unwrap_or(&Value::Null);
            line.push(' ');
            line.push_str(&format!(
                "{}[{}]:{}",
                column.name,
                column.data_type,
                literal_of(value)
            ));
        }
        line
    }
}

/// Text form of a value, as the decoder reports it.
fn text_of(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// `test_decoding` form of a value.
fn literal_of(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => format!("'{}'", s.replace('\'', "''")),
        other => format!("'{}'", other.to_string().replace('\'', "''")),
    }
}

#[derive(Debug, Clone)]
struct Table {
    def: TableDef,
    rows: BTreeMap<String, Row>,
    next_id: i64,
}

#[derive(Debug)]
struct State {
    tables: BTreeMap<String, Table>,
    wal: VecDeque<WalRecord>,
    next_lsn: u64,
    next_xid: u64,
}

impl State {
    fn append(&mut self, xid: &str, data: String) {
        let lsn = Lsn::from_position(self.next_lsn);
        self.next_lsn += LSN_STEP;
        trace!(lsn = %lsn, xid, data = %data, "wal record");
        self.wal.push_back(WalRecord::new(lsn, xid, data));
    }
}

/// An in-memory database with a `test_decoding` WAL.
#[derive(Debug)]
pub struct MemoryDatabase {
    state: Mutex<State>,
    slots: RwLock<Vec<SlotInfo>>,
    unavailable: Mutex<u32>,
    duplicate_on_peek: Mutex<Option<usize>>,
}

impl MemoryDatabase {
    /// Creates an empty database without slots.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                tables: BTreeMap::new(),
                wal: VecDeque::new(),
                next_lsn: FIRST_LSN,
                next_xid: FIRST_XID,
            }),
            slots: RwLock::new(Vec::new()),
            unavailable: Mutex::new(0),
            duplicate_on_peek: Mutex::new(None),
        }
    }

    /// Creates a logical `test_decoding` slot.
    pub fn create_slot(&self, name: &str) {
        self.create_slot_with(SlotInfo::logical(name, DECODING_PLUGIN));
    }

    /// Creates a slot with arbitrary catalog data.
    pub fn create_slot_with(&self, info: SlotInfo) {
        let mut slots = self.slots.write();
        slots.retain(|s| s.slot_name != info.slot_name);
        slots.push(info);
    }

    /// Creates a table.
    pub fn create_table(&self, def: TableDef) {
        self.state.lock().tables.insert(
            def.name.clone(),
            Table {
                def,
                rows: BTreeMap::new(),
                next_id: 1,
            },
        );
    }

    /// Runs `f` in a transaction.
    ///
    /// On success the changes become visible and their records are appended
    /// to the WAL between BEGIN and COMMIT. On failure nothing changes. A
    /// transaction without changes writes no record. `f` must not call back
    /// into the database.
    pub fn transaction<T>(
        &self,
        f: impl FnOnce(&mut MemoryTransaction) -> CdcResult<T>,
    ) -> CdcResult<T> {
        let mut state = self.state.lock();
        let mut tx = MemoryTransaction {
            tables: state.tables.clone(),
            lines: Vec::new(),
        };
        let value = f(&mut tx)?;

        let MemoryTransaction { tables, lines } = tx;
        state.tables = tables;
        if !lines.is_empty() {
            let xid = state.next_xid.to_string();
            state.next_xid += 1;
            state.append(&xid, format!("BEGIN {xid}"));
            for line in lines {
                state.append(&xid, line);
            }
            state.append(&xid, format!("COMMIT {xid}"));
        }
        Ok(value)
    }

    /// Appends a raw record to the WAL, for format-drift tests.
    pub fn append_raw(&self, xid: &str, data: &str) {
        self.state.lock().append(xid, data.to_string());
    }

    /// Returns a row by its key values.
    pub fn get(&self, table: &str, key: &[Value]) -> Option<Row> {
        let key: Vec<String> = key.iter().map(text_of).collect();
        self.state
            .lock()
            .tables
            .get(table)
            .and_then(|t| t.rows.get(&key.join("/")).cloned())
    }

    /// Returns all rows of a table, ordered by key text.
    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.state
            .lock()
            .tables
            .get(table)
            .map(|t| t.rows.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns the number of records not yet consumed.
    pub fn pending(&self) -> usize {
        self.state.lock().wal.len()
    }

    /// Returns the records not yet consumed.
    pub fn wal(&self) -> Vec<WalRecord> {
        self.state.lock().wal.iter().cloned().collect()
    }

    /// Makes the next `count` slot reads fail with a retryable error.
    pub fn set_unavailable(&self, count: u32) {
        *self.unavailable.lock() = count;
    }

    /// Makes every following peek yield the record at `index` twice, as a
    /// faulty reader would. `None` restores normal peeks.
    pub fn duplicate_on_peek(&self, index: Option<usize>) {
        *self.duplicate_on_peek.lock() = index;
    }

    fn check_slot(&self, slot: &str) -> CdcResult<()> {
        {
            let mut unavailable = self.unavailable.lock();
            if *unavailable > 0 {
                *unavailable -= 1;
                return Err(CdcError::slot_retryable("connection refused"));
            }
        }
        if self.slots.read().iter().any(|s| s.slot_name == slot) {
            Ok(())
        } else {
            Err(CdcError::slot_fatal(format!(
                "replication slot \"{slot}\" does not exist"
            )))
        }
    }
}

impl Default for MemoryDatabase {
    fn default() -> Self {
        Self::new()
    }
}

impl ReplicationSlot for MemoryDatabase {
    fn describe(&self, slot: &str) -> CdcResult<Option<SlotInfo>> {
        Ok(self
            .slots
            .read()
            .iter()
            .find(|s| s.slot_name == slot)
            .cloned())
    }

    fn peek<'a>(&'a self, slot: &str, _fetch_size: u32) -> CdcResult<RecordStream<'a>> {
        self.check_slot(slot)?;
        let mut records = self.wal();
        if let Some(index) = *self.duplicate_on_peek.lock() {
            if let Some(record) = records.get(index).cloned() {
                records.insert(index, record);
            }
        }
        Ok(Box::new(records.into_iter().map(Ok)))
    }

    fn consume_up_to(&self, slot: &str, upto: &Lsn) -> CdcResult<u64> {
        self.check_slot(slot)?;
        let upto = upto.position().ok_or_else(|| {
            CdcError::slot_fatal(format!("invalid input syntax for type pg_lsn: \"{upto}\""))
        })?;

        let mut state = self.state.lock();
        let mut removed = 0;
        while state
            .wal
            .front()
            .and_then(|r| r.lsn.position())
            .is_some_and(|position| position <= upto)
        {
            state.wal.pop_front();
            removed += 1;
        }
        Ok(removed)
    }
}

impl SourceDatabase for MemoryDatabase {
    fn reconstruct(&self, query: &str) -> CdcResult<Row> {
        evaluate_projection(query)
    }
}

/// Changes staged by [`MemoryDatabase::transaction`].
pub struct MemoryTransaction {
    tables: BTreeMap<String, Table>,
    lines: Vec<String>,
}

impl MemoryTransaction {
    /// Inserts a row and returns it as stored.
    ///
    /// A missing or null single integer key is taken from the table's
    /// sequence. Columns the row does not name are stored as null.
    pub fn insert(&mut self, table: &str, mut row: Row) -> CdcResult<Row> {
        let t = self.table_mut(table)?;
        check_columns(&t.def, &row)?;

        if let [id] = t.def.id_columns.as_slice() {
            if matches!(row.get(id), None | Some(Value::Null)) {
                row.insert(id.clone(), Value::from(t.next_id));
            }
            if let Some(n) = row.get(id).and_then(Value::as_i64) {
                t.next_id = t.next_id.max(n + 1);
            }
        }
        for column in &t.def.columns {
            row.entry(column.name.clone()).or_insert(Value::Null);
        }

        let key = t.def.key_of(&row)?;
        if t.rows.contains_key(&key) {
            return Err(CdcError::database_fatal(format!(
                "duplicate key value violates unique constraint \"{}_pkey\"",
                t.def.name
            )));
        }
        let line = t.def.line(OperationKind::Insert, &row);
        t.rows.insert(key, row.clone());
        self.lines.push(line);
        Ok(row)
    }

    /// Overwrites the named columns of an existing row and returns the new row.
    ///
    /// Returns `None` if no row has the key.
    pub fn update(&mut self, table: &str, changes: Row) -> CdcResult<Option<Row>> {
        let t = self.table_mut(table)?;
        check_columns(&t.def, &changes)?;
        let key = t.def.key_of(&changes)?;

        let Some(row) = t.rows.get_mut(&key) else {
            return Ok(None);
        };
        for (column, value) in changes {
            row.insert(column, value);
        }
        let row = row.clone();
        let line = t.def.line(OperationKind::Update, &row);
        self.lines.push(line);
        Ok(Some(row))
    }

    /// Deletes a row by its key values, returning whether it existed.
    pub fn delete(&mut self, table: &str, key: &[Value]) -> CdcResult<bool> {
        let t = self.table_mut(table)?;
        let key: Vec<String> = key.iter().map(text_of).collect();

        let Some(row) = t.rows.remove(&key.join("/")) else {
            return Ok(false);
        };
        let line = t.def.line(OperationKind::Delete, &row);
        self.lines.push(line);
        Ok(true)
    }

    fn table_mut(&mut self, table: &str) -> CdcResult<&mut Table> {
        self.tables.get_mut(table).ok_or_else(|| {
            CdcError::database_fatal(format!("relation \"{table}\" does not exist"))
        })
    }
}

fn check_columns(def: &TableDef, row: &Row) -> CdcResult<()> {
    match row
        .keys()
        .find(|name| !def.columns.iter().any(|c| &c.name == *name))
    {
        Some(name) => Err(CdcError::database_fatal(format!(
            "column \"{name}\" of relation \"{}\" does not exist",
            def.name
        ))),
        None => Ok(()),
    }
}
