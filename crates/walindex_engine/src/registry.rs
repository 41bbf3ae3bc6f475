//! Entity metadata registry.
//!
//! Built once from the [`SchemaCatalog`] and the registered sinks, then
//! shared read-only with the worker. It answers three questions: which entity
//! a table holds, which non-id columns a table declares, and which sink
//! serves an entity type.

use crate::catalog::{SchemaCatalog, TableMapping};
use crate::sink::SinkAdapter;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};
use walindex_protocol::ColumnCatalog;

/// A mapped table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryEntry {
    /// Physical table name.
    pub table: String,
    /// Entity type stored in the table.
    pub entity_type: String,
    /// Primary-key columns, in key order.
    pub id_columns: Vec<String>,
    /// Remaining columns, in declaration order.
    pub non_id_columns: Vec<String>,
}

/// Something left out of the registry while building it.
///
/// None of these stop the engine: CDC works on the subset of the schema
/// that has sinks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryWarning {
    /// No sink serves the entity type or one of its supertypes.
    NoSinkRegistered {
        /// Entity type.
        entity_type: String,
        /// Table of the entity.
        table: String,
    },
    /// The entity is not stored in exactly one table.
    UnsupportedSchemaShape {
        /// Entity type.
        entity_type: String,
        /// Mapping strategy of the entity.
        strategy: &'static str,
    },
    /// A second entity maps to an already registered table.
    DuplicateTable {
        /// Table name.
        table: String,
        /// Entity type that was left out.
        entity_type: String,
        /// Entity type that keeps the table.
        registered: String,
    },
    /// A sink serves a type the catalog does not declare.
    UnknownSinkType {
        /// Entity type of the sink.
        entity_type: String,
    },
    /// Two sinks serve the same type; the first one is kept.
    DuplicateSink {
        /// Entity type of the sinks.
        entity_type: String,
    },
}

impl fmt::Display for RegistryWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryWarning::NoSinkRegistered { entity_type, table } => {
                write!(f, "no sink registered for {entity_type} (table {table})")
            }
            RegistryWarning::UnsupportedSchemaShape {
                entity_type,
                strategy,
            } => write!(
                f,
                "{entity_type} uses the {strategy} mapping, only single_table is supported"
            ),
            RegistryWarning::DuplicateTable {
                table,
                entity_type,
                registered,
            } => write!(
                f,
                "table {table} of {entity_type} is already registered for {registered}"
            ),
            RegistryWarning::UnknownSinkType { entity_type } => {
                write!(f, "sink serves {entity_type}, which the catalog does not declare")
            }
            RegistryWarning::DuplicateSink { entity_type } => {
                write!(f, "more than one sink serves {entity_type}")
            }
        }
    }
}

/// Table and sink lookup used by the parser and the dispatcher.
pub struct EntityRegistry {
    catalog: SchemaCatalog,
    tables: HashMap<String, RegistryEntry>,
    sinks: Vec<Arc<dyn SinkAdapter>>,
    warnings: Vec<RegistryWarning>,
}

impl EntityRegistry {
    /// Builds the registry.
    ///
    /// Sinks are kept in the given order, which decides ties in the
    /// supertype fallback of [`sink_for`](Self::sink_for). Left-out tables
    /// and sinks are logged and available from [`warnings`](Self::warnings).
    pub fn build(catalog: &SchemaCatalog, sinks: Vec<Arc<dyn SinkAdapter>>) -> Self {
        let mut registry = Self {
            catalog: catalog.clone(),
            tables: HashMap::new(),
            sinks: Vec::with_capacity(sinks.len()),
            warnings: Vec::new(),
        };

        for sink in sinks {
            let entity_type = sink.entity_type().to_string();
            if registry.catalog.entity(&entity_type).is_none() {
                registry.warn(RegistryWarning::UnknownSinkType { entity_type });
            } else if registry
                .sinks
                .iter()
                .any(|s| s.entity_type() == entity_type)
            {
                registry.warn(RegistryWarning::DuplicateSink { entity_type });
            } else {
                registry.sinks.push(sink);
            }
        }

        for entity in &catalog.entities {
            let TableMapping::SingleTable {
                table,
                id_columns,
                non_id_columns,
            } = &entity.mapping
            else {
                registry.warn(RegistryWarning::UnsupportedSchemaShape {
                    entity_type: entity.entity_type.clone(),
                    strategy: entity.mapping.strategy(),
                });
                continue;
            };

            if registry.sink_for(&entity.entity_type).is_none() {
                registry.warn(RegistryWarning::NoSinkRegistered {
                    entity_type: entity.entity_type.clone(),
                    table: table.clone(),
                });
                continue;
            }

            if let Some(existing) = registry.tables.get(table) {
                let warning = RegistryWarning::DuplicateTable {
                    table: table.clone(),
                    entity_type: entity.entity_type.clone(),
                    registered: existing.entity_type.clone(),
                };
                registry.warn(warning);
                continue;
            }

            debug!(table = %table, entity_type = %entity.entity_type, "registered table");
            registry.tables.insert(
                table.clone(),
                RegistryEntry {
                    table: table.clone(),
                    entity_type: entity.entity_type.clone(),
                    id_columns: id_columns.clone(),
                    non_id_columns: non_id_columns.clone(),
                },
            );
        }

        registry
    }

    /// Returns the entry of a table.
    pub fn resolve_by_table(&self, table: &str) -> Option<&RegistryEntry> {
        self.tables.get(table)
    }

    /// Returns the ordered non-id columns of a table, or an empty slice if
    /// the table is not registered.
    pub fn non_id_columns(&self, table: &str) -> &[String] {
        self.tables
            .get(table)
            .map(|entry| entry.non_id_columns.as_slice())
            .unwrap_or_default()
    }

    /// Returns the sink for an entity type.
    ///
    /// An exact match wins. Otherwise the first registered sink whose type
    /// is a supertype of `entity_type` is returned.
    pub fn sink_for(&self, entity_type: &str) -> Option<&Arc<dyn SinkAdapter>> {
        self.sinks
            .iter()
            .find(|s| s.entity_type() == entity_type)
            .or_else(|| {
                self.sinks
                    .iter()
                    .find(|s| self.catalog.is_subtype_of(entity_type, s.entity_type()))
            })
    }

    /// Returns the registered tables, sorted by name.
    pub fn entries(&self) -> Vec<&RegistryEntry> {
        let mut entries: Vec<&RegistryEntry> = self.tables.values().collect();
        entries.sort_by(|a, b| a.table.cmp(&b.table));
        entries
    }

    /// Returns the number of registered tables.
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    /// Returns true if no table is registered.
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Returns what was left out while building.
    pub fn warnings(&self) -> &[RegistryWarning] {
        &self.warnings
    }

    fn warn(&mut self, warning: RegistryWarning) {
        warn!(%warning, "entity left out of CDC");
        self.warnings.push(warning);
    }
}

impl ColumnCatalog for EntityRegistry {
    fn non_id_columns(&self, table: &str) -> &[String] {
        EntityRegistry::non_id_columns(self, table)
    }
}

impl fmt::Debug for EntityRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sinks: Vec<&str> = self.sinks.iter().map(|s| s.entity_type()).collect();
        f.debug_struct("EntityRegistry")
            .field("tables", &self.tables)
            .field("sinks", &sinks)
            .field("warnings", &self.warnings)
            .finish()
    }
}
