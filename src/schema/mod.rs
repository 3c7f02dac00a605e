//! Schema introspection, storage and join-path analysis.
//!
//! Canonical entities and hashing live in [`model`]; [`store`] holds the
//! concurrency-safe per-database cache that the rest of the crate reads
//! from; [`inspector`] talks to PostgreSQL's catalog to refresh it;
//! [`graph`] derives a directed join graph from the stored relationships.

/// Canonical schema entities: databases, tables, columns, relationships,
/// and the stable hashing used to detect when a schema has changed.
pub mod model;

/// Concurrency-safe, per-database cache of the entities in [`model`].
pub mod store;

/// Reads `information_schema`/`pg_catalog` to populate [`store`].
pub mod inspector;

/// Directed join graph built from a schema snapshot: shortest join paths,
/// hub/isolated table detection, centrality, join-order suggestions.
pub mod graph;

pub use graph::{GraphMetrics, JoinComplexity, JoinComplexityReport, JoinGraph, JoinStep};
pub use inspector::SchemaInspector;
pub use model::{
    canonical_schema_json, schema_hash, Column, ColumnType, ConnectionTarget, Database,
    DatabaseStatus, Index, Relationship, RelationshipKind, SchemaDiff, SchemaSnapshot, SslMode,
    Table,
};
pub use store::SchemaStore;

use std::sync::Arc;

use dashmap::DashMap;

/// Holds the current [`JoinGraph`] per database, rebuilt wholesale by schema
/// refresh and read by the query builder when it needs join paths. A swap,
/// not a merge, mirroring how [`store::SchemaStore`] replaces table sets.
#[derive(Default)]
pub struct GraphRegistry {
    graphs: DashMap<String, Arc<JoinGraph>>,
}

impl GraphRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, database: &str, graph: JoinGraph) {
        self.graphs.insert(database.to_string(), Arc::new(graph));
    }

    pub fn get(&self, database: &str) -> Option<Arc<JoinGraph>> {
        self.graphs.get(database).map(|g| g.clone())
    }
}
