//! A CDC-backed write path for products.
//!
//! Every write commits to the system-of-record, then blocks on one cycle so
//! the index has caught up before the call returns. A failed or timed-out
//! cycle fails the call; the committed write stays.

use crate::fixtures::CdcHarness;
use crate::memory::MemoryDatabase;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;
use walindex_engine::{CdcError, CdcResult, CycleScheduler, MemorySink, Row};

const TABLE: &str = "product";

/// A product row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Product {
    /// Primary key, assigned on create.
    pub id: Option<i64>,
    /// Product name.
    pub name: Option<String>,
    /// Free-text description.
    pub description: Option<String>,
    /// Brand name.
    pub brand: Option<String>,
    /// Category reference.
    pub category_id: Option<i64>,
    /// Owner reference.
    pub owner_id: Option<i64>,
    /// Price.
    pub price: Option<f64>,
    /// Last update timestamp.
    pub updated: Option<String>,
}

impl Product {
    /// Creates a product with a name, a category and a price.
    pub fn new(name: &str, category_id: i64, price: f64) -> Self {
        Self {
            name: Some(name.to_string()),
            category_id: Some(category_id),
            price: Some(price),
            ..Self::default()
        }
    }

    fn to_row(&self) -> CdcResult<Row> {
        match serde_json::to_value(self) {
            Ok(Value::Object(row)) => Ok(row),
            Ok(other) => Err(CdcError::database_fatal(format!(
                "product serialized to {other}"
            ))),
            Err(e) => Err(CdcError::database_fatal(e.to_string())),
        }
    }

    fn from_row(row: Row) -> CdcResult<Self> {
        serde_json::from_value(Value::Object(row)).map_err(|e| CdcError::Sink {
            entity_type: "Product".to_string(),
            message: e.to_string(),
        })
    }
}

/// Product service that keeps the index in step on every write.
pub struct ProductService {
    database: Arc<MemoryDatabase>,
    index: Arc<MemorySink>,
    scheduler: Arc<CycleScheduler>,
}

impl ProductService {
    /// Creates a service.
    pub fn new(
        database: Arc<MemoryDatabase>,
        index: Arc<MemorySink>,
        scheduler: Arc<CycleScheduler>,
    ) -> Self {
        Self {
            database,
            index,
            scheduler,
        }
    }

    /// Creates a service over a harness.
    pub fn from_harness(harness: &CdcHarness) -> Self {
        Self::new(
            harness.database.clone(),
            harness.index.clone(),
            harness.scheduler.clone(),
        )
    }

    /// Inserts a product and returns it as indexed.
    ///
    /// Any id on `product` is ignored.
    pub fn create(&self, product: &Product) -> CdcResult<Option<Product>> {
        let mut row = product.to_row()?;
        row.remove("id");
        let stored = self
            .database
            .transaction(|tx| tx.insert(TABLE, row))?;
        let id = stored
            .get("id")
            .and_then(Value::as_i64)
            .ok_or_else(|| CdcError::database_fatal("insert returned no id"))?;

        self.process_next_chunk()?;
        self.find(id)
    }

    /// Overwrites a product and returns it as indexed.
    pub fn update(&self, product: &Product) -> CdcResult<Option<Product>> {
        let id = product
            .id
            .ok_or_else(|| CdcError::database_fatal("update of a product without id"))?;
        let row = product.to_row()?;
        self.database.transaction(|tx| tx.update(TABLE, row))?;

        self.process_next_chunk()?;
        self.find(id)
    }

    /// Deletes a product.
    pub fn delete(&self, id: i64) -> CdcResult<()> {
        self.database
            .transaction(|tx| tx.delete(TABLE, &[Value::from(id)]))?;
        self.process_next_chunk()?;
        Ok(())
    }

    /// Reads a product from the index.
    pub fn find(&self, id: i64) -> CdcResult<Option<Product>> {
        self.index
            .document(&id.to_string())
            .map(|entity| Product::from_row(entity.fields))
            .transpose()
    }

    /// Runs one cycle with the configured wait and returns the number of
    /// transactions it processed.
    pub fn process_next_chunk(&self) -> CdcResult<u64> {
        let report = self.scheduler.run_cycle(self.scheduler.cycle_timeout())?;
        debug!(transactions = report.transactions, "cycle processed");
        Ok(report.transactions)
    }
}
