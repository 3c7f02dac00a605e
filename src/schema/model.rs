//! Canonical schema entities shared by the store, inspector and graph.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Connectivity status of a registered database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DatabaseStatus {
    Configured,
    Connected,
    Disconnected,
}

/// Connection target for a registered database. Passwords are consumed as
/// provided by the caller and never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionTarget {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub ssl_mode: SslMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SslMode {
    Disable,
    Prefer,
    Require,
}

impl ConnectionTarget {
    /// Renders a `postgres://` URI suitable for [`sqlx::postgres::PgConnectOptions`].
    /// The password is embedded only for the lifetime of this string; it is
    /// never logged or stored by the core.
    pub fn to_uri(&self) -> String {
        let sslmode = match self.ssl_mode {
            SslMode::Disable => "disable",
            SslMode::Prefer => "prefer",
            SslMode::Require => "require",
        };
        format!(
            "postgres://{}:{}@{}:{}/{}?sslmode={}",
            urlencode(&self.username),
            urlencode(&self.password),
            self.host,
            self.port,
            self.database,
            sslmode
        )
    }
}

fn urlencode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

/// A registered database: identity, target and freshness of its last
/// schema analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Database {
    pub id: String,
    pub target: ConnectionTarget,
    pub status: DatabaseStatus,
    pub last_analyzed_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// A PostgreSQL data type as reported by the catalog, kept as the literal
/// type name rather than re-parsed into a closed enum: the safety and
/// retrieval layers only ever need to classify it as numeric/textual/temporal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnType(pub String);

impl ColumnType {
    pub fn is_numeric(&self) -> bool {
        let t = self.0.to_lowercase();
        ["int", "serial", "numeric", "decimal", "real", "double", "float", "money"]
            .iter()
            .any(|frag| t.contains(frag))
    }

    pub fn is_temporal(&self) -> bool {
        let t = self.0.to_lowercase();
        ["date", "time", "timestamp"].iter().any(|frag| t.contains(frag))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub data_type: ColumnType,
    pub nullable: bool,
    pub default: Option<String>,
    pub is_primary_key: bool,
    pub is_foreign_key: bool,
    pub is_unique: bool,
    pub ordinal_position: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Index {
    pub name: String,
    pub columns: Vec<String>,
    pub is_unique: bool,
}

/// `(schema, name)` uniquely identifies a table within a database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Table {
    pub schema: String,
    pub name: String,
    pub row_estimate: i64,
    pub byte_size: i64,
    pub has_primary_key: bool,
    pub importance_score: f64,
    pub columns: Vec<Column>,
    pub indexes: Vec<Index>,
}

impl Table {
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelationshipKind {
    ForeignKey,
    Inferred,
}

/// A directed edge between two columns, carrying the on-delete/on-update
/// rule when known. `kind = Inferred` edges are always weighted heavier
/// than explicit foreign keys — see [`RelationshipKind::weight`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
    pub from_schema: String,
    pub from_table: String,
    pub from_column: String,
    pub to_schema: String,
    pub to_table: String,
    pub to_column: String,
    pub kind: RelationshipKind,
    pub on_delete: Option<String>,
    pub on_update: Option<String>,
}

impl RelationshipKind {
    pub fn weight(self) -> f64 {
        match self {
            RelationshipKind::ForeignKey => 1.0,
            RelationshipKind::Inferred => 2.0,
        }
    }
}

impl Relationship {
    pub fn from_qualified(&self) -> String {
        format!("{}.{}", self.from_schema, self.from_table)
    }
    pub fn to_qualified(&self) -> String {
        format!("{}.{}", self.to_schema, self.to_table)
    }
}

/// Immutable record of a database schema at a point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaSnapshot {
    pub database: String,
    pub hash: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Canonical, order-independent serialization of a schema used to compute
/// a stable [`SchemaSnapshot::hash`]. Schemas/tables/columns are sorted by
/// name so that reordering the source catalog never changes the digest.
pub fn canonical_schema_json(tables: &[Table], relationships: &[Relationship]) -> serde_json::Value {
    let mut by_schema: BTreeMap<&str, Vec<&Table>> = BTreeMap::new();
    for t in tables {
        by_schema.entry(&t.schema).or_default().push(t);
    }
    for tables in by_schema.values_mut() {
        tables.sort_by(|a, b| a.name.cmp(&b.name));
    }

    let schemas: serde_json::Map<String, serde_json::Value> = by_schema
        .into_iter()
        .map(|(schema, mut tables)| {
            tables.sort_by(|a, b| a.name.cmp(&b.name));
            let tables_json: Vec<_> = tables
                .into_iter()
                .map(|t| {
                    let mut cols = t.columns.clone();
                    cols.sort_by(|a, b| a.name.cmp(&b.name));
                    serde_json::json!({
                        "name": t.name,
                        "has_primary_key": t.has_primary_key,
                        "columns": cols.iter().map(|c| serde_json::json!({
                            "name": c.name,
                            "data_type": c.data_type.0,
                            "nullable": c.nullable,
                            "is_primary_key": c.is_primary_key,
                            "is_foreign_key": c.is_foreign_key,
                            "is_unique": c.is_unique,
                        })).collect::<Vec<_>>(),
                    })
                })
                .collect();
            (schema.to_string(), serde_json::Value::Array(tables_json))
        })
        .collect();

    let mut rels = relationships.to_vec();
    rels.sort_by(|a, b| {
        (a.from_qualified(), &a.from_column, a.to_qualified(), &a.to_column).cmp(&(
            b.from_qualified(),
            &b.from_column,
            b.to_qualified(),
            &b.to_column,
        ))
    });
    let rels_json: Vec<_> = rels
        .iter()
        .map(|r| {
            serde_json::json!({
                "from": format!("{}.{}.{}", r.from_schema, r.from_table, r.from_column),
                "to": format!("{}.{}.{}", r.to_schema, r.to_table, r.to_column),
                "kind": matches!(r.kind, RelationshipKind::ForeignKey),
            })
        })
        .collect();

    serde_json::json!({ "schemas": schemas, "relationships": rels_json })
}

/// Computes the stable digest of a canonical schema serialization.
pub fn schema_hash(tables: &[Table], relationships: &[Relationship]) -> String {
    use sha2::{Digest, Sha256};
    let canonical = canonical_schema_json(tables, relationships);
    let bytes = serde_json::to_vec(&canonical).expect("canonical schema always serializes");
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    format!("{:x}", hasher.finalize())
}

/// Per-kind, per-category diff between two schema snapshots.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaDiff {
    pub tables_added: Vec<String>,
    pub tables_removed: Vec<String>,
    pub tables_modified: Vec<String>,
    pub columns_added: usize,
    pub columns_removed: usize,
    pub columns_modified: usize,
    pub relationships_added: usize,
    pub relationships_removed: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn col(name: &str) -> Column {
        Column {
            name: name.to_string(),
            data_type: ColumnType("integer".to_string()),
            nullable: false,
            default: None,
            is_primary_key: false,
            is_foreign_key: false,
            is_unique: false,
            ordinal_position: 0,
        }
    }

    fn table(schema: &str, name: &str, cols: Vec<Column>) -> Table {
        Table {
            schema: schema.to_string(),
            name: name.to_string(),
            row_estimate: 0,
            byte_size: 0,
            has_primary_key: true,
            importance_score: 0.5,
            columns: cols,
            indexes: vec![],
        }
    }

    #[test]
    fn hash_is_stable_under_reordering() {
        let a = vec![
            table("public", "users", vec![col("id"), col("email")]),
            table("public", "orders", vec![col("id")]),
        ];
        let b = vec![
            table("public", "orders", vec![col("id")]),
            table("public", "users", vec![col("email"), col("id")]),
        ];
        assert_eq!(schema_hash(&a, &[]), schema_hash(&b, &[]));
    }

    #[test]
    fn hash_changes_when_a_column_is_added() {
        let a = vec![table("public", "users", vec![col("id")])];
        let b = vec![table("public", "users", vec![col("id"), col("email")])];
        assert_ne!(schema_hash(&a, &[]), schema_hash(&b, &[]));
    }
}
