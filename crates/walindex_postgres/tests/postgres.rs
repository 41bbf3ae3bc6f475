//! Runs the engine against a live PostgreSQL server.
//!
//! The server needs `wal_level = logical`. Run with
//! `WALINDEX_TEST_DATABASE_URL=postgres://... cargo test -- --ignored`.

use serde_json::json;
use std::sync::Arc;
use tokio::runtime::Runtime;
use tokio_postgres::{Client, NoTls};
use walindex_engine::{
    CdcEngine, CdcError, EngineConfig, EntityRegistry, MemorySink, ReplicationSlot,
    SchemaCatalog, SinkAdapter,
};
use walindex_postgres::PgSource;

const SLOT: &str = "walindex_test_slot";
const TABLE: &str = "walindex_product";

struct Admin {
    runtime: Runtime,
    client: Client,
}

impl Admin {
    fn connect(url: &str) -> Self {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let (client, connection) = runtime.block_on(tokio_postgres::connect(url, NoTls)).unwrap();
        runtime.spawn(connection);
        Self { runtime, client }
    }

    fn execute(&self, sql: &str) {
        self.runtime.block_on(self.client.batch_execute(sql)).unwrap();
    }

    fn reset(&self) {
        self.execute(&format!(
            "SELECT pg_drop_replication_slot(slot_name) FROM pg_replication_slots \
             WHERE slot_name = '{SLOT}'; DROP TABLE IF EXISTS {TABLE}"
        ));
    }
}

fn database_url() -> Option<String> {
    std::env::var("WALINDEX_TEST_DATABASE_URL").ok()
}

fn catalog() -> SchemaCatalog {
    SchemaCatalog::builder()
        .single_table("Product", TABLE, &["id"], &["name", "price"])
        .build()
        .unwrap()
}

#[test]
#[ignore = "requires WALINDEX_TEST_DATABASE_URL"]
fn cycle_against_postgres() {
    let Some(url) = database_url() else {
        return;
    };
    let admin = Admin::connect(&url);
    admin.reset();
    admin.execute(&format!(
        "CREATE TABLE {TABLE} (id bigserial PRIMARY KEY, name varchar(255), price numeric)"
    ));
    admin.execute(&format!(
        "SELECT pg_create_logical_replication_slot('{SLOT}', 'test_decoding')"
    ));

    let source = Arc::new(PgSource::connect(&url).unwrap());
    let index = Arc::new(MemorySink::new("Product"));
    let registry = EntityRegistry::build(&catalog(), vec![index.clone() as Arc<dyn SinkAdapter>]);
    let engine = CdcEngine::new(
        EngineConfig::new(SLOT).with_fetch_size(2),
        source.clone(),
        source.clone(),
        Arc::new(registry),
    )
    .unwrap();

    admin.execute(&format!(
        "INSERT INTO {TABLE} (name, price) VALUES ('prod1', 100), ('O''Hara', NULL)"
    ));
    let report = engine.run_cycle().unwrap();
    assert_eq!(report.transactions, 1);
    assert_eq!(report.dispatched, 2);
    assert_eq!(report.scanned, report.acknowledged);
    assert_eq!(index.len(), 2);
    assert_eq!(index.document("2").unwrap().field("name"), Some(&json!("O'Hara")));

    admin.execute(&format!("UPDATE {TABLE} SET name = 'prod2' WHERE id = 1"));
    admin.execute(&format!("DELETE FROM {TABLE} WHERE id = 2"));
    let report = engine.run_cycle().unwrap();
    assert_eq!(report.transactions, 2);
    assert_eq!(index.document("1").unwrap().field("name"), Some(&json!("prod2")));
    assert!(index.document("2").is_none());
    assert_eq!(engine.pending_records().unwrap(), 0);

    let report = engine.run_cycle().unwrap();
    assert_eq!(report.scanned, 0);
    assert_eq!(report.acknowledged, 0);

    drop(engine);
    drop(source);
    admin.reset();
}

#[test]
#[ignore = "requires WALINDEX_TEST_DATABASE_URL"]
fn missing_slot_is_reported() {
    let Some(url) = database_url() else {
        return;
    };
    let source = Arc::new(PgSource::connect(&url).unwrap());
    assert!(source.describe("walindex_no_such_slot").unwrap().is_none());

    let registry = EntityRegistry::build(&catalog(), Vec::new());
    let result = CdcEngine::new(
        EngineConfig::new("walindex_no_such_slot"),
        source.clone(),
        source,
        Arc::new(registry),
    );
    assert!(matches!(result, Err(CdcError::SlotNotFound { .. })));
}
