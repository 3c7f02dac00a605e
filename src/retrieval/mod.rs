//! Schema-context retrieval: the lexical index plus the policy that turns
//! raw hits into a compact prompt-ready context block.

/// The retrieval index itself: per-database document store and search.
pub mod vector_index;

pub use vector_index::{Hit, HitKind, VectorContextIndex};

use crate::config::RetrievalConfig;
use crate::schema::JoinGraph;

/// Runs the retrieval policy described for a user query: search, filter by
/// distance, expand table hits with immediate graph neighbours, and render
/// a compact context block. Falls back to a flat list of the given common
/// tables if nothing passes the distance threshold.
pub fn build_context(
    index: &VectorContextIndex,
    graph: Option<&JoinGraph>,
    database: &str,
    query_text: &str,
    config: &RetrievalConfig,
    fallback_tables: &[String],
) -> String {
    let k = config.context_k;
    let hits = index.search(database, query_text, k);

    let passing: Vec<&Hit> = hits
        .iter()
        .filter(|h| h.distance < config.similarity_threshold)
        .collect();

    if passing.is_empty() {
        return render_fallback(fallback_tables);
    }

    let mut table_names: Vec<String> = passing
        .iter()
        .filter(|h| h.kind == HitKind::Table)
        .map(|h| h.identity.clone())
        .collect();

    if let Some(graph) = graph {
        let mut expanded = table_names.clone();
        for table in &table_names {
            if let Some((direct, _)) = graph.related_tables(table, 1) {
                expanded.extend(direct);
            }
        }
        expanded.sort();
        expanded.dedup();
        table_names = expanded;
    }

    let relationships: Vec<&Hit> = passing
        .iter()
        .filter(|h| h.kind == HitKind::Relationship)
        .copied()
        .collect();

    render_context_block(&table_names, &passing, &relationships)
}

fn render_context_block(tables: &[String], hits: &[&Hit], relationships: &[&Hit]) -> String {
    let mut out = String::new();

    for table in tables {
        out.push_str(&format!("Table: {table}\n"));
        let columns: Vec<&Hit> = hits
            .iter()
            .filter(|h| h.kind == HitKind::Column && h.metadata.get("table").map(|t| table.ends_with(t.as_str())).unwrap_or(false))
            .copied()
            .take(15)
            .collect();
        for col in columns {
            if let Some(col_name) = col.metadata.get("column") {
                out.push_str(&format!("  - {col_name}\n"));
            }
        }
    }

    if !relationships.is_empty() {
        out.push_str("Relationships:\n");
        for rel in relationships {
            if let (Some(from), Some(to)) = (rel.metadata.get("from_table"), rel.metadata.get("to_table")) {
                out.push_str(&format!("  - {from} -> {to}\n"));
            }
        }
    }

    out
}

fn render_fallback(tables: &[String]) -> String {
    if tables.is_empty() {
        return "No schema context is available for this database.".to_string();
    }
    let mut out = String::from("Common tables:\n");
    for t in tables {
        out.push_str(&format!("  - {t}\n"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Column, ColumnType, Table};

    fn sample_table() -> Table {
        Table {
            schema: "public".to_string(),
            name: "orders".to_string(),
            row_estimate: 100,
            byte_size: 0,
            has_primary_key: true,
            importance_score: 0.0,
            columns: vec![Column {
                name: "total".to_string(),
                data_type: ColumnType("numeric".to_string()),
                nullable: false,
                default: None,
                is_primary_key: false,
                is_foreign_key: false,
                is_unique: false,
                ordinal_position: 2,
            }],
            indexes: vec![],
        }
    }

    #[test]
    fn falls_back_when_nothing_passes_threshold() {
        let index = VectorContextIndex::new(16);
        let config = RetrievalConfig::default();
        let block = build_context(&index, None, "db1", "xyzzy plugh", &config, &["public.orders".to_string()]);
        assert!(block.contains("Common tables"));
    }

    #[test]
    fn renders_matching_tables() {
        let index = VectorContextIndex::new(16);
        index.upsert_schema("db1", &[sample_table()], &[]);
        let config = RetrievalConfig::default();
        let block = build_context(&index, None, "db1", "orders total", &config, &[]);
        assert!(block.contains("Table: public.orders"));
    }
}
