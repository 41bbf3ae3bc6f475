//! Declarative schema description of the system-of-record.
//!
//! The catalog lists every mapped entity type, its optional parent type and
//! how it maps onto physical tables. It is written by hand (or generated from
//! the migration source) and loaded once at startup; nothing is discovered at
//! runtime.
//!
//! ```json
//! {
//!   "entities": [
//!     {
//!       "entity_type": "Product",
//!       "mapping": {
//!         "strategy": "single_table",
//!         "table": "product",
//!         "id_columns": ["id"],
//!         "non_id_columns": ["name", "price"]
//!       }
//!     }
//!   ]
//! }
//! ```

use crate::error::{CdcError, CdcResult};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use walindex_protocol::ColumnCatalog;

/// How an entity type is stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum TableMapping {
    /// The entity lives in exactly one table.
    SingleTable {
        /// Physical table name, without schema.
        table: String,
        /// Primary-key columns, in key order.
        id_columns: Vec<String>,
        /// Remaining columns, in declaration order.
        non_id_columns: Vec<String>,
    },
    /// The entity is spread over a parent table and joined child tables.
    Joined {
        /// Tables involved.
        tables: Vec<String>,
    },
    /// Each concrete type has its own table holding inherited columns.
    TablePerClass {
        /// Tables involved.
        tables: Vec<String>,
    },
}

impl TableMapping {
    /// Returns a short name of the strategy.
    pub fn strategy(&self) -> &'static str {
        match self {
            TableMapping::SingleTable { .. } => "single_table",
            TableMapping::Joined { .. } => "joined",
            TableMapping::TablePerClass { .. } => "table_per_class",
        }
    }
}

/// One mapped entity type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityMapping {
    /// Name of the entity type.
    pub entity_type: String,
    /// Name of the direct supertype, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    /// Storage of the entity.
    pub mapping: TableMapping,
}

/// The full schema description.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaCatalog {
    /// Mapped entity types, in declaration order.
    pub entities: Vec<EntityMapping>,
}

impl SchemaCatalog {
    /// Starts building a catalog in code.
    pub fn builder() -> CatalogBuilder {
        CatalogBuilder::default()
    }

    /// Parses and validates a JSON catalog.
    pub fn from_json_str(json: &str) -> CdcResult<Self> {
        let catalog: SchemaCatalog =
            serde_json::from_str(json).map_err(|e| CdcError::Catalog(e.to_string()))?;
        catalog.validate()?;
        Ok(catalog)
    }

    /// Reads, parses and validates a JSON catalog file.
    pub fn from_json_file(path: impl AsRef<Path>) -> CdcResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| CdcError::Catalog(format!("{}: {e}", path.display())))?;
        Self::from_json_str(&json)
    }

    /// Returns the mapping of an entity type.
    pub fn entity(&self, entity_type: &str) -> Option<&EntityMapping> {
        self.entities.iter().find(|e| e.entity_type == entity_type)
    }

    /// Returns true if `ancestor` is a (transitive) supertype of `entity_type`.
    ///
    /// A type is not its own supertype.
    pub fn is_subtype_of(&self, entity_type: &str, ancestor: &str) -> bool {
        let mut current = self.entity(entity_type).and_then(|e| e.parent.as_deref());
        let mut hops = 0;
        while let Some(parent) = current {
            if parent == ancestor {
                return true;
            }
            hops += 1;
            if hops > self.entities.len() {
                return false;
            }
            current = self.entity(parent).and_then(|e| e.parent.as_deref());
        }
        false
    }

    /// Checks the catalog invariants.
    ///
    /// Entity types are unique, parents exist and form no cycle, and a
    /// single-table mapping names its table, has at least one id column and
    /// never lists a column both as id and non-id.
    pub fn validate(&self) -> CdcResult<()> {
        let mut seen = HashSet::new();
        for entity in &self.entities {
            if entity.entity_type.is_empty() {
                return Err(CdcError::Catalog("entity type name is empty".into()));
            }
            if !seen.insert(entity.entity_type.as_str()) {
                return Err(CdcError::Catalog(format!(
                    "entity type {} is declared twice",
                    entity.entity_type
                )));
            }
        }

        for entity in &self.entities {
            if let Some(parent) = &entity.parent {
                if !seen.contains(parent.as_str()) {
                    return Err(CdcError::Catalog(format!(
                        "entity type {} extends unknown type {parent}",
                        entity.entity_type
                    )));
                }
            }
            self.check_acyclic(&entity.entity_type)?;

            if let TableMapping::SingleTable {
                table,
                id_columns,
                non_id_columns,
            } = &entity.mapping
            {
                check_single_table(&entity.entity_type, table, id_columns, non_id_columns)?;
            }
        }
        Ok(())
    }

    fn check_acyclic(&self, entity_type: &str) -> CdcResult<()> {
        let mut visited = HashSet::from([entity_type]);
        let mut current = self.entity(entity_type).and_then(|e| e.parent.as_deref());
        while let Some(parent) = current {
            if !visited.insert(parent) {
                return Err(CdcError::Catalog(format!(
                    "entity type {entity_type} has a cyclic parent chain"
                )));
            }
            current = self.entity(parent).and_then(|e| e.parent.as_deref());
        }
        Ok(())
    }
}

/// Column lookup over every single-table mapping, sinks or not.
///
/// The first mapping of a table wins, as in the registry.
impl ColumnCatalog for SchemaCatalog {
    fn non_id_columns(&self, table: &str) -> &[String] {
        self.entities
            .iter()
            .find_map(|e| match &e.mapping {
                TableMapping::SingleTable {
                    table: t,
                    non_id_columns,
                    ..
                } if t == table => Some(non_id_columns.as_slice()),
                _ => None,
            })
            .unwrap_or_default()
    }
}

fn check_single_table(
    entity_type: &str,
    table: &str,
    id_columns: &[String],
    non_id_columns: &[String],
) -> CdcResult<()> {
    if table.is_empty() {
        return Err(CdcError::Catalog(format!(
            "entity type {entity_type} maps to an empty table name"
        )));
    }
    if id_columns.is_empty() {
        return Err(CdcError::Catalog(format!(
            "table {table} declares no id column"
        )));
    }

    let mut columns = HashSet::new();
    for column in id_columns.iter().chain(non_id_columns) {
        if !columns.insert(column.as_str()) {
            return Err(CdcError::Catalog(format!(
                "column {column} of table {table} is declared twice"
            )));
        }
    }
    Ok(())
}

/// Builder for catalogs declared in code.
#[derive(Debug, Default)]
pub struct CatalogBuilder {
    entities: Vec<EntityMapping>,
}

impl CatalogBuilder {
    /// Adds a root entity type stored in one table.
    pub fn single_table(
        self,
        entity_type: &str,
        table: &str,
        id_columns: &[&str],
        non_id_columns: &[&str],
    ) -> Self {
        self.entity(entity_type, None, single(table, id_columns, non_id_columns))
    }

    /// Adds a subtype stored in one table.
    pub fn single_table_subtype(
        self,
        entity_type: &str,
        parent: &str,
        table: &str,
        id_columns: &[&str],
        non_id_columns: &[&str],
    ) -> Self {
        self.entity(
            entity_type,
            Some(parent),
            single(table, id_columns, non_id_columns),
        )
    }

    /// Adds an entity type with an arbitrary mapping.
    pub fn entity(mut self, entity_type: &str, parent: Option<&str>, mapping: TableMapping) -> Self {
        self.entities.push(EntityMapping {
            entity_type: entity_type.to_string(),
            parent: parent.map(str::to_string),
            mapping,
        });
        self
    }

    /// Validates and returns the catalog.
    pub fn build(self) -> CdcResult<SchemaCatalog> {
        let catalog = SchemaCatalog {
            entities: self.entities,
        };
        catalog.validate()?;
        Ok(catalog)
    }
}

fn single(table: &str, id_columns: &[&str], non_id_columns: &[&str]) -> TableMapping {
    TableMapping::SingleTable {
        table: table.to_string(),
        id_columns: id_columns.iter().map(|c| c.to_string()).collect(),
        non_id_columns: non_id_columns.iter().map(|c| c.to_string()).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const PRODUCT_JSON: &str = r#"{
        "entities": [
            {
                "entity_type": "Product",
                "mapping": {
                    "strategy": "single_table",
                    "table": "product",
                    "id_columns": ["id"],
                    "non_id_columns": ["name", "price"]
                }
            },
            {
                "entity_type": "Rental",
                "parent": "Product",
                "mapping": { "strategy": "joined", "tables": ["product", "rental"] }
            }
        ]
    }"#;

    #[test]
    fn parse_json_catalog() {
        let catalog = SchemaCatalog::from_json_str(PRODUCT_JSON).unwrap();
        assert_eq!(catalog.entities.len(), 2);

        let product = catalog.entity("Product").unwrap();
        assert_eq!(product.mapping.strategy(), "single_table");
        assert_eq!(
            catalog.entity("Rental").unwrap().mapping,
            TableMapping::Joined {
                tables: vec!["product".into(), "rental".into()]
            }
        );
        assert!(catalog.is_subtype_of("Rental", "Product"));
        assert!(!catalog.is_subtype_of("Product", "Rental"));
        assert!(!catalog.is_subtype_of("Product", "Product"));
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(PRODUCT_JSON.as_bytes()).unwrap();

        let catalog = SchemaCatalog::from_json_file(file.path()).unwrap();
        assert!(catalog.entity("Product").is_some());

        let missing = SchemaCatalog::from_json_file("/nonexistent/catalog.json");
        assert!(matches!(missing, Err(CdcError::Catalog(_))));
    }

    #[test]
    fn overlapping_columns_rejected() {
        let result = SchemaCatalog::builder()
            .single_table("Product", "product", &["id"], &["id", "name"])
            .build();
        assert!(matches!(result, Err(CdcError::Catalog(_))));
    }

    #[test]
    fn missing_id_rejected() {
        let result = SchemaCatalog::builder()
            .single_table("Product", "product", &[], &["name"])
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn duplicate_type_rejected() {
        let result = SchemaCatalog::builder()
            .single_table("Product", "product", &["id"], &[])
            .single_table("Product", "product2", &["id"], &[])
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn unknown_parent_rejected() {
        let result = SchemaCatalog::builder()
            .single_table_subtype("Rental", "Thing", "rental", &["id"], &[])
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn parent_cycle_rejected() {
        let result = SchemaCatalog::builder()
            .single_table_subtype("A", "B", "a", &["id"], &[])
            .single_table_subtype("B", "A", "b", &["id"], &[])
            .build();
        assert!(matches!(result, Err(CdcError::Catalog(ref m)) if m.contains("cyclic")));
    }

    #[test]
    fn column_lookup_by_table() {
        let catalog = SchemaCatalog::from_json_str(PRODUCT_JSON).unwrap();
        assert_eq!(
            ColumnCatalog::non_id_columns(&catalog, "product"),
            ["name".to_string(), "price".to_string()]
        );
        assert!(ColumnCatalog::non_id_columns(&catalog, "rental").is_empty());
    }

    #[test]
    fn transitive_supertype() {
        let catalog = SchemaCatalog::builder()
            .single_table("Item", "item", &["id"], &[])
            .single_table_subtype("Product", "Item", "product", &["id"], &[])
            .single_table_subtype("Gadget", "Product", "gadget", &["id"], &[])
            .build()
            .unwrap();
        assert!(catalog.is_subtype_of("Gadget", "Product"));
        assert!(catalog.is_subtype_of("Gadget", "Item"));
        assert!(!catalog.is_subtype_of("Item", "Gadget"));
        assert!(!catalog.is_subtype_of("Unknown", "Item"));
    }
}
