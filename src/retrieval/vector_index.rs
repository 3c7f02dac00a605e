//! Schema-context retrieval index (C5).
//!
//! The reference service behind this module embedded documents into a
//! vector database. No crate in this workspace's dependency stack provides
//! an embedding model, so similarity here is computed lexically (token
//! Jaccard distance, see [`crate::text`]) over the same document shapes the
//! reference service indexed — table/column/relationship summaries and
//! accepted `(query, sql)` pairs. The `search` contract (`distance`,
//! lower is closer) is preserved so callers don't need to know which
//! scoring function backs it.

use std::collections::HashMap;

use lru::LruCache;
use parking_lot::Mutex;

use crate::schema::{Column, Relationship, Table};
use crate::text::{text_similarity, tokenize_text};

/// Kind of entity backing a retrieval hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HitKind {
    Table,
    Column,
    Relationship,
    SuccessfulQuery,
}

#[derive(Debug, Clone)]
pub struct Hit {
    pub kind: HitKind,
    /// Stable identity: `schema.table`, `schema.table.column`, or a query id.
    pub identity: String,
    pub metadata: HashMap<String, String>,
    pub distance: f32,
}

#[derive(Debug, Clone)]
struct IndexedItem {
    kind: HitKind,
    identity: String,
    document: String,
    metadata: HashMap<String, String>,
}

struct DatabaseIndex {
    items: Vec<IndexedItem>,
}

/// Embedding-backed (here: lexical) retrieval index, one shard per database.
pub struct VectorContextIndex {
    shards: Mutex<HashMap<String, DatabaseIndex>>,
    query_cache: Mutex<LruCache<String, Vec<Hit>>>,
}

impl VectorContextIndex {
    pub fn new(query_cache_capacity: usize) -> Self {
        let capacity = std::num::NonZeroUsize::new(query_cache_capacity.max(1)).unwrap();
        Self {
            shards: Mutex::new(HashMap::new()),
            query_cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Replaces the table/column/relationship documents for `database`.
    /// Previously recorded successful queries are preserved.
    pub fn upsert_schema(&self, database: &str, tables: &[Table], relationships: &[Relationship]) {
        let mut shards = self.shards.lock();
        let index = shards
            .entry(database.to_string())
            .or_insert_with(|| DatabaseIndex { items: Vec::new() });

        index.items.retain(|i| i.kind == HitKind::SuccessfulQuery);

        for table in tables {
            index.items.push(table_item(table));
            for column in &table.columns {
                index.items.push(column_item(table, column));
            }
        }
        for rel in relationships {
            index.items.push(relationship_item(rel));
        }

        self.query_cache.lock().clear();
    }

    /// Records a successful `(query, sql)` pair so future similar queries
    /// retrieve it as context.
    pub fn upsert_success(&self, database: &str, query: &str, sql: &str, tables: &[String]) {
        let mut shards = self.shards.lock();
        let index = shards
            .entry(database.to_string())
            .or_insert_with(|| DatabaseIndex { items: Vec::new() });

        let mut metadata = HashMap::new();
        metadata.insert("sql".to_string(), sql.to_string());
        metadata.insert("tables".to_string(), tables.join(","));

        index.items.push(IndexedItem {
            kind: HitKind::SuccessfulQuery,
            identity: format!("query:{}", index.items.len()),
            document: query.to_string(),
            metadata,
        });

        self.query_cache.lock().clear();
    }

    /// Searches `database`'s index for the `k` closest documents to `text`,
    /// sorted by ascending distance.
    pub fn search(&self, database: &str, text: &str, k: usize) -> Vec<Hit> {
        let cache_key = format!("{database}\u{0}{text}\u{0}{k}");
        if let Some(cached) = self.query_cache.lock().get(&cache_key) {
            return cached.clone();
        }

        let shards = self.shards.lock();
        let hits = match shards.get(database) {
            Some(index) => {
                let mut scored: Vec<Hit> = index
                    .items
                    .iter()
                    .map(|item| Hit {
                        kind: item.kind,
                        identity: item.identity.clone(),
                        metadata: item.metadata.clone(),
                        distance: 1.0 - text_similarity(text, &item.document),
                    })
                    .collect();
                scored.sort_by(|a, b| a.distance.partial_cmp(&b.distance).unwrap());
                scored.truncate(k);
                scored
            }
            None => Vec::new(),
        };

        self.query_cache.lock().put(cache_key, hits.clone());
        hits
    }

    pub fn index_size(&self, database: &str) -> usize {
        self.shards.lock().get(database).map(|i| i.items.len()).unwrap_or(0)
    }
}

fn table_item(table: &Table) -> IndexedItem {
    let columns_str = table
        .columns
        .iter()
        .map(|c| format!("{} {}", c.name, c.data_type.0))
        .collect::<Vec<_>>()
        .join(", ");

    let document = format!(
        "table {}.{} columns {} row_count {}",
        table.schema, table.name, columns_str, table.row_estimate
    );

    let mut metadata = HashMap::new();
    metadata.insert("schema".to_string(), table.schema.clone());
    metadata.insert("table".to_string(), table.name.clone());
    metadata.insert("row_estimate".to_string(), table.row_estimate.to_string());
    metadata.insert("has_primary_key".to_string(), table.has_primary_key.to_string());

    IndexedItem {
        kind: HitKind::Table,
        identity: table.qualified_name(),
        document,
        metadata,
    }
}

fn column_item(table: &Table, column: &Column) -> IndexedItem {
    let mut constraints = Vec::new();
    if column.is_primary_key {
        constraints.push("primary key");
    }
    if column.is_foreign_key {
        constraints.push("foreign key");
    }
    if !column.nullable {
        constraints.push("not null");
    }

    let document = format!(
        "column {} in table {}.{} type {} {}",
        column.name,
        table.schema,
        table.name,
        column.data_type.0,
        constraints.join(" ")
    );

    let mut metadata = HashMap::new();
    metadata.insert("schema".to_string(), table.schema.clone());
    metadata.insert("table".to_string(), table.name.clone());
    metadata.insert("column".to_string(), column.name.clone());
    metadata.insert("data_type".to_string(), column.data_type.0.clone());

    IndexedItem {
        kind: HitKind::Column,
        identity: format!("{}.{}.{}", table.schema, table.name, column.name),
        document,
        metadata,
    }
}

fn relationship_item(rel: &Relationship) -> IndexedItem {
    let document = format!(
        "relationship {}.{} references {}.{} foreign key",
        rel.from_qualified(),
        rel.from_column,
        rel.to_qualified(),
        rel.to_column
    );

    let mut metadata = HashMap::new();
    metadata.insert("from_table".to_string(), rel.from_qualified());
    metadata.insert("to_table".to_string(), rel.to_qualified());

    IndexedItem {
        kind: HitKind::Relationship,
        identity: format!(
            "{}.{}->{}.{}",
            rel.from_qualified(),
            rel.from_column,
            rel.to_qualified(),
            rel.to_column
        ),
        document,
        metadata,
    }
}

/// Whether `text` shares any token with `document`; used to cheaply decide
/// whether a hit is worth scoring at all before the full Jaccard pass.
#[allow(dead_code)]
fn shares_any_token(text: &str, document: &str) -> bool {
    !tokenize_text(text).is_disjoint(&tokenize_text(document))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ColumnType;

    fn sample_table() -> Table {
        Table {
            schema: "public".to_string(),
            name: "customers".to_string(),
            row_estimate: 500,
            byte_size: 0,
            has_primary_key: true,
            importance_score: 0.0,
            columns: vec![Column {
                name: "email".to_string(),
                data_type: ColumnType("text".to_string()),
                nullable: false,
                default: None,
                is_primary_key: false,
                is_foreign_key: false,
                is_unique: true,
                ordinal_position: 2,
            }],
            indexes: vec![],
        }
    }

    #[test]
    fn search_returns_schema_hits_after_upsert() {
        let index = VectorContextIndex::new(64);
        index.upsert_schema("db1", &[sample_table()], &[]);
        let hits = index.search("db1", "customers email", 5);
        assert!(!hits.is_empty());
        assert!(hits.iter().any(|h| h.kind == HitKind::Table));
    }

    #[test]
    fn unknown_database_returns_no_hits() {
        let index = VectorContextIndex::new(64);
        assert!(index.search("missing", "anything", 5).is_empty());
    }

    #[test]
    fn reindexing_preserves_successful_queries() {
        let index = VectorContextIndex::new(64);
        index.upsert_schema("db1", &[sample_table()], &[]);
        index.upsert_success("db1", "list customers", "SELECT * FROM customers", &["public.customers".to_string()]);
        index.upsert_schema("db1", &[sample_table()], &[]);
        assert!(index
            .search("db1", "list customers", 5)
            .iter()
            .any(|h| h.kind == HitKind::SuccessfulQuery));
    }
}
