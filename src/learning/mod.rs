//! Adaptive learning store (C6): per-database vocabulary, bilingual
//! mappings, and query patterns captured from successful executions.
//!
//! Additive-only: nothing here is ever deleted by normal operation, only
//! appended to and read from. Growth is bounded by how many distinct
//! queries actually succeed, not by an explicit cap — the reference service
//! made the same tradeoff and in practice the vocabulary and pattern sets
//! plateau quickly once a schema's naming conventions are covered.

use std::collections::{HashMap, HashSet};

use dashmap::DashMap;
use parking_lot::RwLock;

use crate::schema::Table;
use crate::text::{jaccard_similarity, split_identifier_words, tokenize_text};

/// Shape of a query that produced working SQL, kept for pattern matching
/// against future input.
#[derive(Debug, Clone, PartialEq, Eq, Copy)]
pub enum PatternKind {
    Count,
    SelectAll,
    Aggregation,
    Learned,
}

#[derive(Debug, Clone)]
pub struct LearnedPattern {
    pub original_text: String,
    pub sql: String,
    pub kind: PatternKind,
    pub turkish_keywords: Vec<String>,
    pub confidence: f32,
}

#[derive(Debug, Clone, Default)]
pub struct LearningMetrics {
    pub total_queries: u64,
    pub successful_queries: u64,
    pub learned_patterns: usize,
    pub vocabulary_size: usize,
}

#[derive(Debug, Default)]
struct DatabaseLearning {
    vocabulary: HashSet<String>,
    bilingual_mappings: HashMap<String, String>,
    patterns: Vec<LearnedPattern>,
    total_queries: u64,
    successful_queries: u64,
}

/// Domain terms seeded before any LM-proposed extension. Kept small and
/// e-commerce-flavoured to match the schemas this pipeline is most
/// commonly pointed at; `bilingual_mappings` grows from here.
fn seed_bilingual_mappings() -> HashMap<String, String> {
    [
        ("user", "kullanici"),
        ("users", "kullanicilar"),
        ("customer", "musteri"),
        ("customers", "musteriler"),
        ("order", "siparis"),
        ("orders", "siparisler"),
        ("product", "urun"),
        ("products", "urunler"),
        ("sale", "satis"),
        ("sales", "satislar"),
        ("category", "kategori"),
        ("categories", "kategoriler"),
        ("employee", "calisan"),
        ("employees", "calisanlar"),
        ("invoice", "fatura"),
        ("payment", "odeme"),
        ("count", "sayi"),
        ("total", "toplam"),
        ("amount", "miktar"),
        ("price", "fiyat"),
        ("date", "tarih"),
    ]
    .into_iter()
    .map(|(en, tr)| (en.to_string(), tr.to_string()))
    .collect()
}

/// Per-database, additive-only memory used to enrich retrieval and query
/// interpretation with observed vocabulary and prior successes.
pub struct LearningStore {
    databases: DashMap<String, RwLock<DatabaseLearning>>,
}

impl LearningStore {
    pub fn new() -> Self {
        Self { databases: DashMap::new() }
    }

    fn entry(&self, database: &str) -> dashmap::mapref::one::Ref<'_, String, RwLock<DatabaseLearning>> {
        self.databases
            .entry(database.to_string())
            .or_insert_with(|| {
                RwLock::new(DatabaseLearning {
                    bilingual_mappings: seed_bilingual_mappings(),
                    ..Default::default()
                })
            })
            .downgrade()
    }

    /// Extracts vocabulary from table/column names and seeds the bilingual
    /// dictionary if this is the database's first initialization.
    pub fn initialize(&self, database: &str, tables: &[Table]) {
        let shard = self.entry(database);
        let mut guard = shard.write();

        for table in tables {
            guard.vocabulary.insert(table.name.to_lowercase());
            for word in split_identifier_words(&table.name) {
                guard.vocabulary.insert(word);
            }
            for column in &table.columns {
                guard.vocabulary.insert(column.name.to_lowercase());
                for word in split_identifier_words(&column.name) {
                    guard.vocabulary.insert(word);
                }
            }
        }
    }

    /// Extends the bilingual dictionary with LM-proposed pairs. Pairs with
    /// an empty key or value are dropped; everything else is merged,
    /// letting later calls override earlier guesses for the same term.
    pub fn extend_bilingual_mappings(&self, database: &str, pairs: HashMap<String, String>) {
        let shard = self.entry(database);
        let mut guard = shard.write();
        for (en, tr) in pairs {
            if !en.trim().is_empty() && !tr.trim().is_empty() {
                guard.bilingual_mappings.insert(en.to_lowercase(), tr.to_lowercase());
            }
        }
    }

    /// Records a query execution. A pattern is captured only when
    /// `confidence >= 0.7`.
    pub fn record_success(&self, database: &str, query: &str, sql: &str, confidence: f32) {
        let shard = self.entry(database);
        let mut guard = shard.write();

        guard.total_queries += 1;
        guard.successful_queries += 1;

        if confidence >= 0.7 {
            let kind = classify_pattern(sql);
            let turkish_keywords = turkish_keywords_for(kind, query);
            guard.patterns.push(LearnedPattern {
                original_text: query.to_string(),
                sql: sql.to_string(),
                kind,
                turkish_keywords,
                confidence,
            });
        }
    }

    /// Free-text context block: a sample of vocabulary, bilingual mappings
    /// relevant to `query`'s tokens, and the most similar learned patterns.
    pub fn context_for(&self, database: &str, query: &str) -> String {
        let shard = self.entry(database);
        let guard = shard.read();

        let mut parts = Vec::new();

        if !guard.vocabulary.is_empty() {
            let mut sample: Vec<&String> = guard.vocabulary.iter().take(20).collect();
            sample.sort();
            parts.push(format!("Database terms: {}", sample.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(", ")));
        }

        let query_lower = query.to_lowercase();
        let relevant: Vec<String> = guard
            .bilingual_mappings
            .iter()
            .filter(|(en, tr)| query_lower.contains(en.as_str()) || query_lower.contains(tr.as_str()))
            .map(|(en, tr)| format!("{tr}={en}"))
            .collect();
        if !relevant.is_empty() {
            parts.push(format!("Turkish mappings: {}", relevant.join(", ")));
        }

        let similar = similar_patterns_in(&guard.patterns, query, 3);
        if !similar.is_empty() {
            let rendered: Vec<String> = similar
                .iter()
                .map(|p| format!("{} -> {}", p.original_text, p.sql))
                .collect();
            parts.push(format!("Similar patterns: {}", rendered.join("; ")));
        }

        parts.join("\n")
    }

    /// Top-k (k = 5) previously learned patterns whose token Jaccard
    /// similarity to `query` is at least 0.30.
    pub fn similar_patterns(&self, database: &str, query: &str) -> Vec<LearnedPattern> {
        let shard = self.entry(database);
        let guard = shard.read();
        similar_patterns_in(&guard.patterns, query, 5)
    }

    pub fn metrics(&self, database: &str) -> LearningMetrics {
        let shard = self.entry(database);
        let guard = shard.read();
        LearningMetrics {
            total_queries: guard.total_queries,
            successful_queries: guard.successful_queries,
            learned_patterns: guard.patterns.len(),
            vocabulary_size: guard.vocabulary.len(),
        }
    }
}

impl Default for LearningStore {
    fn default() -> Self {
        Self::new()
    }
}

const SIMILARITY_THRESHOLD: f32 = 0.30;

fn similar_patterns_in(patterns: &[LearnedPattern], query: &str, top_k: usize) -> Vec<LearnedPattern> {
    let query_tokens = tokenize_text(query);
    let mut scored: Vec<(f32, &LearnedPattern)> = patterns
        .iter()
        .map(|p| (jaccard_similarity(&query_tokens, &tokenize_text(&p.original_text)), p))
        .filter(|(score, _)| *score >= SIMILARITY_THRESHOLD)
        .collect();
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap());
    scored.into_iter().take(top_k).map(|(_, p)| p.clone()).collect()
}

fn classify_pattern(sql: &str) -> PatternKind {
    let upper = sql.to_uppercase();
    if upper.contains("COUNT(") {
        PatternKind::Count
    } else if upper.contains("GROUP BY") {
        PatternKind::Aggregation
    } else if upper.trim_start().starts_with("SELECT *") {
        PatternKind::SelectAll
    } else {
        PatternKind::Learned
    }
}

fn turkish_keywords_for(kind: PatternKind, query: &str) -> Vec<String> {
    let lower = query.to_lowercase();
    let candidates: &[&str] = match kind {
        PatternKind::Count => &["kac", "sayi", "adet", "tane"],
        PatternKind::SelectAll => &["listele", "goster", "tum"],
        PatternKind::Aggregation => &["en fazla", "en cok", "toplam"],
        PatternKind::Learned => &[],
    };
    candidates
        .iter()
        .filter(|kw| lower.contains(*kw))
        .map(|kw| kw.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Column, ColumnType};

    fn table() -> Table {
        Table {
            schema: "public".to_string(),
            name: "customer_orders".to_string(),
            row_estimate: 10,
            byte_size: 0,
            has_primary_key: true,
            importance_score: 0.0,
            columns: vec![Column {
                name: "order_date".to_string(),
                data_type: ColumnType("date".to_string()),
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
    fn initialize_extracts_vocabulary_from_identifiers() {
        let store = LearningStore::new();
        store.initialize("db1", &[table()]);
        let metrics = store.metrics("db1");
        assert!(metrics.vocabulary_size > 0);
    }

    #[test]
    fn low_confidence_success_is_not_captured_as_pattern() {
        let store = LearningStore::new();
        store.record_success("db1", "kac musteri var", "SELECT COUNT(*) FROM customers", 0.5);
        assert_eq!(store.metrics("db1").learned_patterns, 0);
        assert_eq!(store.metrics("db1").total_queries, 1);
    }

    #[test]
    fn high_confidence_success_is_captured_and_matchable() {
        let store = LearningStore::new();
        store.record_success("db1", "kac musteri var", "SELECT COUNT(*) FROM customers", 0.9);
        assert_eq!(store.metrics("db1").learned_patterns, 1);

        let similar = store.similar_patterns("db1", "kac musteri var acaba");
        assert_eq!(similar.len(), 1);
        assert_eq!(similar[0].kind, PatternKind::Count);
    }

    #[test]
    fn dissimilar_query_does_not_match_pattern() {
        let store = LearningStore::new();
        store.record_success("db1", "kac musteri var", "SELECT COUNT(*) FROM customers", 0.9);
        assert!(store.similar_patterns("db1", "urunleri listele").is_empty());
    }

    #[test]
    fn bilingual_extension_merges_without_dropping_seed() {
        let store = LearningStore::new();
        let mut extra = HashMap::new();
        extra.insert("warehouse".to_string(), "depo".to_string());
        store.extend_bilingual_mappings("db1", extra);

        let shard = store.entry("db1");
        let guard = shard.read();
        assert_eq!(guard.bilingual_mappings.get("warehouse").map(String::as_str), Some("depo"));
        assert_eq!(guard.bilingual_mappings.get("customer").map(String::as_str), Some("musteri"));
    }
}
