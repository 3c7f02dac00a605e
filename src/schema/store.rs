//! Persistent, keyed store for schema entities (C2).
//!
//! Replacement of a database's table set is atomic: readers never observe a
//! partially-replaced schema because each database's schema state lives
//! behind a single `ArcSwap`-like pointer guarded by a per-database write
//! lock (here: a `parking_lot::RwLock` over the whole shard, which is cheap
//! enough at this scale and keeps the invariant trivially obvious).

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;

use super::model::{
    schema_hash, Column, Database, DatabaseStatus, Relationship, SchemaDiff, SchemaSnapshot, Table,
};

#[derive(Debug, Default)]
struct DatabaseShard {
    tables: Vec<Table>,
    relationships: Vec<Relationship>,
    snapshots: Vec<SchemaSnapshot>,
}

/// Process-wide, concurrency-safe store for every registered database's
/// schema state. Shards are keyed by database id; each shard is guarded by
/// its own lock so that a refresh of one database never blocks readers of
/// another.
#[derive(Debug, Default)]
pub struct SchemaStore {
    databases: DashMap<String, Database>,
    shards: DashMap<String, Arc<RwLock<DatabaseShard>>>,
}

impl SchemaStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn shard(&self, database: &str) -> Arc<RwLock<DatabaseShard>> {
        self.shards
            .entry(database.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(DatabaseShard::default())))
            .clone()
    }

    pub fn put_database(&self, db: Database) {
        self.databases.insert(db.id.clone(), db);
    }

    pub fn get_database(&self, id: &str) -> Option<Database> {
        self.databases.get(id).map(|r| r.clone())
    }

    pub fn mark_status(&self, id: &str, status: DatabaseStatus) {
        if let Some(mut db) = self.databases.get_mut(id) {
            db.status = status;
        }
    }

    /// Replaces the full table set for `database`. This is a swap, not a
    /// merge: the prior set is discarded atomically under the shard's write
    /// lock.
    pub fn put_tables(&self, database: &str, tables: Vec<Table>) {
        let shard = self.shard(database);
        let mut guard = shard.write();
        guard.tables = tables;
    }

    pub fn put_relationships(&self, database: &str, relationships: Vec<Relationship>) {
        let shard = self.shard(database);
        let mut guard = shard.write();
        guard.relationships = relationships;
    }

    pub fn get_tables(&self, database: &str) -> Vec<Table> {
        self.shard(database).read().tables.clone()
    }

    pub fn get_columns(&self, database: &str, schema: &str, table: &str) -> Vec<Column> {
        self.shard(database)
            .read()
            .tables
            .iter()
            .find(|t| t.schema == schema && t.name == table)
            .map(|t| t.columns.clone())
            .unwrap_or_default()
    }

    pub fn get_relationships(&self, database: &str) -> Vec<Relationship> {
        self.shard(database).read().relationships.clone()
    }

    pub fn has_schema(&self, database: &str) -> bool {
        !self.shard(database).read().tables.is_empty()
    }

    /// Computes the canonical hash of the current schema and appends a new
    /// snapshot only if the hash differs from the most recent one —
    /// `snapshot` is idempotent under an unchanged schema.
    pub fn snapshot(&self, database: &str) -> String {
        let shard = self.shard(database);
        let mut guard = shard.write();
        let hash = schema_hash(&guard.tables, &guard.relationships);

        let unchanged = guard
            .snapshots
            .last()
            .map(|s| s.hash == hash)
            .unwrap_or(false);

        if !unchanged {
            guard.snapshots.push(SchemaSnapshot {
                database: database.to_string(),
                hash: hash.clone(),
                created_at: chrono::Utc::now(),
            });
        }

        hash
    }

    pub fn latest_snapshot(&self, database: &str) -> Option<SchemaSnapshot> {
        self.shard(database).read().snapshots.last().cloned()
    }

    /// Diffs the current schema against the immediately prior snapshot's
    /// table set is not retained verbatim (only the hash is), so this diffs
    /// the two most recently *observed* table sets passed in by the caller
    /// (typically: the set before and after a refresh).
    pub fn diff_tables(before: &[Table], after: &[Table]) -> SchemaDiff {
        let before_by_name: HashMap<String, &Table> = before
            .iter()
            .map(|t| (t.qualified_name(), t))
            .collect();
        let after_by_name: HashMap<String, &Table> = after
            .iter()
            .map(|t| (t.qualified_name(), t))
            .collect();

        let mut diff = SchemaDiff::default();

        for (name, t) in &after_by_name {
            match before_by_name.get(name.as_str()) {
                None => diff.tables_added.push(name.clone()),
                Some(prev) => {
                    let prev_cols: HashMap<&str, &Column> =
                        prev.columns.iter().map(|c| (c.name.as_str(), c)).collect();
                    let cur_cols: HashMap<&str, &Column> =
                        t.columns.iter().map(|c| (c.name.as_str(), c)).collect();

                    for cname in cur_cols.keys() {
                        if !prev_cols.contains_key(cname) {
                            diff.columns_added += 1;
                        }
                    }
                    for cname in prev_cols.keys() {
                        if !cur_cols.contains_key(cname) {
                            diff.columns_removed += 1;
                        }
                    }
                    let mut table_modified = false;
                    for (cname, cur) in &cur_cols {
                        if let Some(prev) = prev_cols.get(cname) {
                            if prev.data_type != cur.data_type || prev.nullable != cur.nullable {
                                diff.columns_modified += 1;
                                table_modified = true;
                            }
                        }
                    }
                    if table_modified {
                        diff.tables_modified.push(name.clone());
                    }
                }
            }
        }
        for name in before_by_name.keys() {
            if !after_by_name.contains_key(name.as_str()) {
                diff.tables_removed.push(name.clone());
            }
        }

        diff
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::model::{ColumnType, SslMode};

    fn sample_table(name: &str) -> Table {
        Table {
            schema: "public".to_string(),
            name: name.to_string(),
            row_estimate: 10,
            byte_size: 100,
            has_primary_key: true,
            importance_score: 0.5,
            columns: vec![Column {
                name: "id".to_string(),
                data_type: ColumnType("integer".to_string()),
                nullable: false,
                default: None,
                is_primary_key: true,
                is_foreign_key: false,
                is_unique: true,
                ordinal_position: 1,
            }],
            indexes: vec![],
        }
    }

    #[test]
    fn replace_is_atomic_per_database() {
        let store = SchemaStore::new();
        store.put_tables("db1", vec![sample_table("users")]);
        store.put_tables("db1", vec![sample_table("orders")]);
        let tables = store.get_tables("db1");
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].name, "orders");
    }

    #[test]
    fn snapshot_is_idempotent_on_unchanged_schema() {
        let store = SchemaStore::new();
        store.put_tables("db1", vec![sample_table("users")]);
        let h1 = store.snapshot("db1");
        let h2 = store.snapshot("db1");
        assert_eq!(h1, h2);
        assert_eq!(store.shard("db1").read().snapshots.len(), 1);
    }

    #[test]
    fn snapshot_appends_on_change() {
        let store = SchemaStore::new();
        store.put_tables("db1", vec![sample_table("users")]);
        store.snapshot("db1");
        store.put_tables("db1", vec![sample_table("users"), sample_table("orders")]);
        store.snapshot("db1");
        assert_eq!(store.shard("db1").read().snapshots.len(), 2);
    }

    #[test]
    fn separate_databases_are_independent() {
        let _ = SslMode::Disable; // keep import used across cfg(test) builds
        let store = SchemaStore::new();
        store.put_tables("db1", vec![sample_table("users")]);
        store.put_tables("db2", vec![sample_table("orders")]);
        assert_eq!(store.get_tables("db1")[0].name, "users");
        assert_eq!(store.get_tables("db2")[0].name, "orders");
    }
}
