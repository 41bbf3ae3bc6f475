//! Test fixtures and harness helpers.
//!
//! Provides the product schema used throughout the tests and a harness that
//! wires an in-memory database, a memory sink and a running scheduler.

use crate::memory::{MemoryDatabase, TableDef};
use std::io::Write;
use std::sync::Arc;
use tempfile::NamedTempFile;
use walindex_engine::{
    CdcEngine, CycleScheduler, EngineConfig, EntityRegistry, MemorySink, SchemaCatalog,
    SinkAdapter,
};

/// Name of the slot the fixtures create.
pub const SLOT_NAME: &str = "elk_slot";

/// Non-id columns of the product table, in declaration order.
pub const PRODUCT_COLUMNS: [&str; 7] = [
    "name",
    "description",
    "brand",
    "category_id",
    "owner_id",
    "price",
    "updated",
];

/// Definition of the product table.
pub fn product_table() -> TableDef {
    TableDef::new("product")
        .id("id", "bigint")
        .column("name", "character varying")
        .column("description", "character varying")
        .column("brand", "character varying")
        .column("category_id", "bigint")
        .column("owner_id", "bigint")
        .column("price", "numeric")
        .column("updated", "timestamp without time zone")
}

/// Catalog mapping `Product` onto the product table.
pub fn product_catalog() -> SchemaCatalog {
    SchemaCatalog::builder()
        .single_table("Product", "product", &["id"], &PRODUCT_COLUMNS)
        .build()
        .expect("product catalog is valid")
}

/// An in-memory database with the product table and the slot.
pub fn product_database() -> Arc<MemoryDatabase> {
    let db = Arc::new(MemoryDatabase::new());
    db.create_slot(SLOT_NAME);
    db.create_table(product_table());
    db
}

/// Writes a catalog to a temporary JSON file.
pub fn catalog_file(catalog: &SchemaCatalog) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("Failed to create temp file");
    let json = serde_json::to_string_pretty(catalog).expect("catalog serializes");
    file.write_all(json.as_bytes())
        .expect("Failed to write catalog");
    file
}

/// Builds an engine over an in-memory database.
pub fn memory_engine(
    database: Arc<MemoryDatabase>,
    catalog: &SchemaCatalog,
    sinks: Vec<Arc<dyn SinkAdapter>>,
    config: EngineConfig,
) -> CdcEngine<MemoryDatabase, MemoryDatabase> {
    let registry = EntityRegistry::build(catalog, sinks);
    CdcEngine::new(config, database.clone(), database, Arc::new(registry))
        .expect("Failed to create engine")
}

/// A product database, its index and a running scheduler.
pub struct CdcHarness {
    /// The system-of-record.
    pub database: Arc<MemoryDatabase>,
    /// The product index.
    pub index: Arc<MemorySink>,
    /// The scheduler running the engine.
    pub scheduler: Arc<CycleScheduler>,
}

impl CdcHarness {
    /// Creates the product harness with the default configuration.
    pub fn products() -> Self {
        Self::products_with(EngineConfig::new(SLOT_NAME))
    }

    /// Creates the product harness with a custom configuration.
    pub fn products_with(config: EngineConfig) -> Self {
        let database = product_database();
        let index = Arc::new(MemorySink::new("Product"));
        let engine = memory_engine(
            database.clone(),
            &product_catalog(),
            vec![index.clone() as Arc<dyn SinkAdapter>],
            config,
        );
        let scheduler = CycleScheduler::start(engine).expect("Failed to start scheduler");
        Self {
            database,
            index,
            scheduler: Arc::new(scheduler),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn product_fixtures_agree() {
        let table = product_table();
        assert_eq!(table.non_id_columns(), PRODUCT_COLUMNS.to_vec());

        let catalog = product_catalog();
        let file = catalog_file(&catalog);
        assert_eq!(SchemaCatalog::from_json_file(file.path()).unwrap(), catalog);
    }

    #[test]
    fn harness_starts_idle() {
        let harness = CdcHarness::products();
        let report = harness
            .scheduler
            .run_cycle(harness.scheduler.cycle_timeout())
            .unwrap();
        assert_eq!(report.transactions, 0);
        assert!(harness.index.is_empty());
    }
}
