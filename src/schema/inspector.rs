//! PostgreSQL schema introspection against `information_schema`/`pg_catalog`.
//!
//! Every read here is issued against a single `PgPool` and assembled into
//! one logical snapshot before being handed to the store: callers never see
//! tables from one point in time mixed with relationships from another.

use sqlx::postgres::PgPool;
use sqlx::Row;

use crate::error::Result;
use crate::schema::model::{Column, ColumnType, Index, Relationship, RelationshipKind, Table};

/// Reads catalog metadata for one database connection.
pub struct SchemaInspector<'a> {
    pool: &'a PgPool,
}

impl<'a> SchemaInspector<'a> {
    pub fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Lists every non-system schema present in the database.
    pub async fn list_schemas(&self) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT schema_name FROM information_schema.schemata \
             WHERE schema_name NOT IN ('pg_catalog', 'information_schema', 'pg_toast') \
             ORDER BY schema_name",
        )
        .fetch_all(self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.get::<String, _>("schema_name")).collect())
    }

    /// Reads all base tables and views in `schema`, with row/byte estimates
    /// from `pg_class` rather than an exact `COUNT(*)` (too costly to run
    /// per table during a refresh).
    pub async fn list_tables(&self, schema: &str) -> Result<Vec<Table>> {
        let rows = sqlx::query(
            "SELECT
                t.table_name,
                pg_relation_size(pgc.oid) AS size_bytes,
                pgc.reltuples::bigint AS row_estimate,
                EXISTS (
                    SELECT 1 FROM information_schema.table_constraints tc
                    WHERE tc.table_schema = t.table_schema
                    AND tc.table_name = t.table_name
                    AND tc.constraint_type = 'PRIMARY KEY'
                ) AS has_primary_key
             FROM information_schema.tables t
             JOIN pg_class pgc ON pgc.relname = t.table_name
             JOIN pg_namespace pgn ON pgn.oid = pgc.relnamespace AND pgn.nspname = t.table_schema
             WHERE t.table_schema = $1
             AND t.table_type IN ('BASE TABLE', 'VIEW')
             ORDER BY t.table_name",
        )
        .bind(schema)
        .fetch_all(self.pool)
        .await?;

        let mut tables = Vec::with_capacity(rows.len());
        for row in rows {
            let name: String = row.get("table_name");
            let columns = self.list_columns(schema, &name).await?;
            let indexes = self.list_indexes(schema, &name).await?;
            tables.push(Table {
                schema: schema.to_string(),
                name,
                row_estimate: row.get::<i64, _>("row_estimate"),
                byte_size: row.get::<i64, _>("size_bytes"),
                has_primary_key: row.get("has_primary_key"),
                importance_score: 0.0,
                columns,
                indexes,
            });
        }
        Ok(tables)
    }

    pub async fn list_columns(&self, schema: &str, table: &str) -> Result<Vec<Column>> {
        let rows = sqlx::query(
            "SELECT
                c.column_name,
                c.data_type,
                c.is_nullable,
                c.column_default,
                c.ordinal_position,
                EXISTS (
                    SELECT 1 FROM information_schema.key_column_usage kcu
                    JOIN information_schema.table_constraints tc
                        ON tc.constraint_name = kcu.constraint_name
                        AND tc.table_schema = kcu.table_schema
                    WHERE kcu.table_schema = c.table_schema
                    AND kcu.table_name = c.table_name
                    AND kcu.column_name = c.column_name
                    AND tc.constraint_type = 'PRIMARY KEY'
                ) AS is_primary_key,
                EXISTS (
                    SELECT 1 FROM information_schema.key_column_usage kcu
                    JOIN information_schema.table_constraints tc
                        ON tc.constraint_name = kcu.constraint_name
                        AND tc.table_schema = kcu.table_schema
                    WHERE kcu.table_schema = c.table_schema
                    AND kcu.table_name = c.table_name
                    AND kcu.column_name = c.column_name
                    AND tc.constraint_type = 'FOREIGN KEY'
                ) AS is_foreign_key,
                EXISTS (
                    SELECT 1 FROM information_schema.table_constraints tc
                    JOIN information_schema.constraint_column_usage ccu
                        ON tc.constraint_name = ccu.constraint_name
                        AND tc.table_schema = ccu.table_schema
                    WHERE ccu.table_schema = c.table_schema
                    AND ccu.table_name = c.table_name
                    AND ccu.column_name = c.column_name
                    AND tc.constraint_type = 'UNIQUE'
                ) AS is_unique
             FROM information_schema.columns c
             WHERE c.table_schema = $1 AND c.table_name = $2
             ORDER BY c.ordinal_position",
        )
        .bind(schema)
        .bind(table)
        .fetch_all(self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| Column {
                name: row.get("column_name"),
                data_type: ColumnType(row.get("data_type")),
                nullable: row.get::<String, _>("is_nullable") == "YES",
                default: row.get("column_default"),
                is_primary_key: row.get("is_primary_key"),
                is_foreign_key: row.get("is_foreign_key"),
                is_unique: row.get("is_unique"),
                ordinal_position: row.get("ordinal_position"),
            })
            .collect())
    }

    pub async fn list_indexes(&self, schema: &str, table: &str) -> Result<Vec<Index>> {
        let rows = sqlx::query(
            "SELECT i.indexname, i.indexdef, idx.indisunique AS is_unique
             FROM pg_indexes i
             JOIN pg_class c ON c.relname = i.tablename
             JOIN pg_namespace n ON n.oid = c.relnamespace AND n.nspname = i.schemaname
             JOIN pg_index idx ON idx.indrelid = c.oid
             JOIN pg_class ic ON ic.oid = idx.indexrelid AND ic.relname = i.indexname
             WHERE i.schemaname = $1 AND i.tablename = $2
             ORDER BY i.indexname",
        )
        .bind(schema)
        .bind(table)
        .fetch_all(self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let indexdef: String = row.get("indexdef");
                Index {
                    name: row.get("indexname"),
                    columns: columns_from_indexdef(&indexdef),
                    is_unique: row.get("is_unique"),
                }
            })
            .collect())
    }

    /// Reads every explicit foreign key relationship declared in `schema`.
    pub async fn list_foreign_keys(&self, schema: &str) -> Result<Vec<Relationship>> {
        let rows = sqlx::query(
            "SELECT
                tc.table_schema AS from_schema,
                tc.table_name AS from_table,
                kcu.column_name AS from_column,
                ccu.table_schema AS to_schema,
                ccu.table_name AS to_table,
                ccu.column_name AS to_column,
                rc.update_rule AS on_update,
                rc.delete_rule AS on_delete
             FROM information_schema.table_constraints tc
             JOIN information_schema.key_column_usage kcu
                 ON tc.constraint_name = kcu.constraint_name
                 AND tc.table_schema = kcu.table_schema
             JOIN information_schema.constraint_column_usage ccu
                 ON ccu.constraint_name = tc.constraint_name
                 AND ccu.table_schema = tc.table_schema
             JOIN information_schema.referential_constraints rc
                 ON rc.constraint_name = tc.constraint_name
                 AND rc.constraint_schema = tc.table_schema
             WHERE tc.constraint_type = 'FOREIGN KEY'
             AND tc.table_schema = $1
             ORDER BY tc.table_name, kcu.ordinal_position",
        )
        .bind(schema)
        .fetch_all(self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| Relationship {
                from_schema: row.get("from_schema"),
                from_table: row.get("from_table"),
                from_column: row.get("from_column"),
                to_schema: row.get("to_schema"),
                to_table: row.get("to_table"),
                to_column: row.get("to_column"),
                kind: RelationshipKind::ForeignKey,
                on_delete: row.get("on_delete"),
                on_update: row.get("on_update"),
            })
            .collect())
    }

    /// Performs a full refresh for `schema`: tables (with columns and
    /// indexes) and relationships, as one logical unit.
    pub async fn refresh_schema(&self, schema: &str) -> Result<(Vec<Table>, Vec<Relationship>)> {
        let tables = self.list_tables(schema).await?;
        let relationships = self.list_foreign_keys(schema).await?;
        Ok((tables, relationships))
    }
}

/// Extracts the column list from a `CREATE INDEX ... (col1, col2)` definition.
fn columns_from_indexdef(def: &str) -> Vec<String> {
    let open = match def.find('(') {
        Some(i) => i,
        None => return Vec::new(),
    };
    let close = match def.rfind(')') {
        Some(i) => i,
        None => return Vec::new(),
    };
    if close <= open {
        return Vec::new();
    }
    def[open + 1..close]
        .split(',')
        .map(|s| s.trim().trim_matches('"').to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_index_columns_from_definition() {
        let def = "CREATE UNIQUE INDEX users_email_idx ON public.users USING btree (email, \"tenant_id\")";
        assert_eq!(columns_from_indexdef(def), vec!["email", "tenant_id"]);
    }

    #[test]
    fn empty_parens_yield_empty_columns() {
        assert!(columns_from_indexdef("CREATE INDEX foo ON bar").is_empty());
    }
}
