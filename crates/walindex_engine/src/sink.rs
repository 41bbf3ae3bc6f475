//! Downstream sinks that receive reconstructed entities.

use crate::error::{CdcError, CdcResult};
use crate::slot::Row;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// An entity reconstructed from one operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Entity {
    /// Entity type the table maps to.
    pub entity_type: String,
    /// Table the operation touched.
    pub table: String,
    /// Textual id column values, in key order.
    pub key: Vec<String>,
    /// Column values of the reconstructed row.
    pub fields: Row,
}

impl Entity {
    /// Returns the key as one string, components joined with `/`.
    pub fn key_string(&self) -> String {
        self.key.join("/")
    }

    /// Returns a field of the reconstructed row.
    pub fn field(&self, column: &str) -> Option<&Value> {
        self.fields.get(column)
    }
}

/// Applies changes of one entity type to the search index.
///
/// A cycle that fails before acknowledging is scanned again by the next
/// cycle, so the same entity may be delivered more than once. Implementations
/// must be idempotent: `create` and `update` upsert by key and `delete` of a
/// missing key succeeds. Last write by key wins.
pub trait SinkAdapter: Send + Sync {
    /// Returns the entity type this sink serves.
    fn entity_type(&self) -> &str;

    /// Indexes a newly inserted entity.
    fn create(&self, entity: &Entity) -> CdcResult<()>;

    /// Re-indexes an updated entity.
    fn update(&self, entity: &Entity) -> CdcResult<()>;

    /// Removes an entity from the index.
    fn delete(&self, entity: &Entity) -> CdcResult<()>;
}

/// Kind of call received by a [`MemorySink`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkCall {
    /// `create` was called.
    Create,
    /// `update` was called.
    Update,
    /// `delete` was called.
    Delete,
}

/// An in-memory index for one entity type.
///
/// Documents are keyed by [`Entity::key_string`]. Every call is recorded so
/// tests can check dispatch order.
pub struct MemorySink {
    entity_type: String,
    documents: RwLock<BTreeMap<String, Entity>>,
    calls: RwLock<Vec<(SinkCall, String)>>,
    failure: RwLock<Option<String>>,
}

impl MemorySink {
    /// Creates an empty sink for `entity_type`.
    pub fn new(entity_type: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            documents: RwLock::new(BTreeMap::new()),
            calls: RwLock::new(Vec::new()),
            failure: RwLock::new(None),
        }
    }

    /// Returns the document stored under `key`.
    pub fn document(&self, key: &str) -> Option<Entity> {
        self.documents.read().get(key).cloned()
    }

    /// Returns all documents ordered by key.
    pub fn documents(&self) -> Vec<Entity> {
        self.documents.read().values().cloned().collect()
    }

    /// Returns the number of documents.
    pub fn len(&self) -> usize {
        self.documents.read().len()
    }

    /// Returns true if the sink holds no document.
    pub fn is_empty(&self) -> bool {
        self.documents.read().is_empty()
    }

    /// Returns the calls received so far.
    pub fn calls(&self) -> Vec<(SinkCall, String)> {
        self.calls.read().clone()
    }

    /// Makes every following call fail with `message`, or succeed again with `None`.
    pub fn set_failure(&self, message: Option<&str>) {
        *self.failure.write() = message.map(str::to_string);
    }

    fn record(&self, call: SinkCall, entity: &Entity) -> CdcResult<()> {
        if let Some(message) = self.failure.read().as_ref() {
            return Err(CdcError::Sink {
                entity_type: self.entity_type.clone(),
                message: message.clone(),
            });
        }
        self.calls.write().push((call, entity.key_string()));
        Ok(())
    }
}

impl SinkAdapter for MemorySink {
    fn entity_type(&self) -> &str {
        &self.entity_type
    }

    fn create(&self, entity: &Entity) -> CdcResult<()> {
        self.record(SinkCall::Create, entity)?;
        self.documents
            .write()
            .insert(entity.key_string(), entity.clone());
        Ok(())
    }

    fn update(&self, entity: &Entity) -> CdcResult<()> {
        self.record(SinkCall::Update, entity)?;
        self.documents
            .write()
            .insert(entity.key_string(), entity.clone());
        Ok(())
    }

    fn delete(&self, entity: &Entity) -> CdcResult<()> {
        self.record(SinkCall::Delete, entity)?;
        self.documents.write().remove(&entity.key_string());
        Ok(())
    }
}
