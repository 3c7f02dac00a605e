//! Language model adapter (C8): the seam between free-text understanding /
//! SQL synthesis and whichever model backs them.
//!
//! `LanguageModel` is intentionally thin — two calls, both returning plain
//! strings/structured JSON — so a deterministic fallback can stand in for
//! either call without callers needing to know the difference. The
//! fallback is not an error path: it runs whenever the model times out,
//! errors, or returns something that fails to parse.

pub mod provider;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::LmConfig;
use crate::nlp;

pub use provider::DeterministicLanguageModel;
#[cfg(feature = "http-llm")]
pub use provider::HttpLanguageModel;

/// Structured understanding of a natural-language query, either parsed
/// from a model response or produced by the deterministic fallback.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Intent {
    pub intent: String,
    #[serde(default)]
    pub entities: Vec<String>,
    #[serde(default)]
    pub filters: Vec<String>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    #[serde(default)]
    pub expanded_query: Option<String>,
    #[serde(default)]
    pub query_complexity: Option<String>,
}

/// Errors from a model call. Every variant is recoverable by falling back
/// to [`DeterministicLanguageModel`]; callers are not expected to surface
/// these to the user.
#[derive(Debug, thiserror::Error)]
pub enum LmError {
    #[error("language model call timed out after {0:?}")]
    Timeout(Duration),
    #[error("language model call failed: {0}")]
    CallFailed(String),
    #[error("language model response could not be parsed")]
    Unparseable,
}

pub type LmResult<T> = Result<T, LmError>;

/// Abstraction over whatever backs `understand`/`generate_sql`. A real
/// implementation lives behind the `http-llm` feature; tests and
/// schema-only deployments can run entirely on
/// [`DeterministicLanguageModel`].
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn understand(&self, text: &str, adaptive_context: &str) -> LmResult<Intent>;

    async fn generate_sql(&self, intent: &Intent, schema_context: &str, adaptive_context: &str) -> LmResult<String>;
}

/// Runs `model.understand`, applying the C7 pattern-detector enrichments
/// regardless of whether the call succeeded, timed out, or fell through
/// to a parse failure. `text` is the original (non-normalized) query so
/// name filters keep their display casing.
pub async fn understand_with_fallback(
    model: &dyn LanguageModel,
    config: &LmConfig,
    text: &str,
    adaptive_context: &str,
) -> Intent {
    let call = tokio::time::timeout(config.timeout, model.understand(text, adaptive_context));

    let mut intent = match call.await {
        Ok(Ok(intent)) => intent,
        Ok(Err(_)) | Err(_) => parse_intent_fallback(text),
    };

    apply_enrichments(&mut intent, text);
    intent
}

/// Runs `model.generate_sql`, falling back to the deterministic template
/// generator on timeout, error, or an empty response.
pub async fn generate_sql_with_fallback(
    model: &dyn LanguageModel,
    config: &LmConfig,
    intent: &Intent,
    schema_context: &str,
    adaptive_context: &str,
) -> String {
    let call = tokio::time::timeout(config.timeout, model.generate_sql(intent, schema_context, adaptive_context));

    match call.await {
        Ok(Ok(sql)) if !sql.trim().is_empty() => clean_sql(&sql),
        _ => provider::generate_sql_fallback(intent),
    }
}

fn apply_enrichments(intent: &mut Intent, original_text: &str) {
    let enrichments = nlp::detect(original_text);

    for name_filter in &enrichments.name_filters {
        intent.filters.push(format!("name={}", name_filter.value));
    }
    for date_filter in &enrichments.date_filters {
        intent.filters.push(format!("date:{}", date_filter.predicate));
    }
    if !enrichments.join_patterns.is_empty() {
        let tags: Vec<Value> = enrichments
            .join_patterns
            .iter()
            .map(|p| Value::String(format!("{}:{}", p.tag, p.description)))
            .collect();
        intent.metadata.insert("join_patterns".to_string(), Value::Array(tags));
    }
    if enrichments.conversational.context_dependent || enrichments.conversational.follow_up_type.is_some() {
        intent.metadata.insert(
            "conversational".to_string(),
            serde_json::to_value(&ConversationalMetadata::from(&enrichments.conversational)).unwrap_or(Value::Null),
        );
        if let Some(expanded) = &enrichments.conversational.expanded_query {
            intent.expanded_query = Some(expanded.clone());
        }
    }
    if !enrichments.bi_patterns.is_empty() {
        let tags: Vec<Value> = enrichments.bi_patterns.iter().map(|p| Value::String(p.tag.to_string())).collect();
        intent.metadata.insert("bi_patterns".to_string(), Value::Array(tags));
        intent.query_complexity = Some("advanced_analytics".to_string());
    }
}

#[derive(Serialize)]
struct ConversationalMetadata {
    implicit_references: Vec<&'static str>,
    follow_up_type: Option<&'static str>,
    context_dependent: bool,
}

impl From<&nlp::ConversationalPattern> for ConversationalMetadata {
    fn from(c: &nlp::ConversationalPattern) -> Self {
        Self {
            implicit_references: c.implicit_references.clone(),
            follow_up_type: c.follow_up_type,
            context_dependent: c.context_dependent,
        }
    }
}

static JSON_EXTRACTION_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r#"\{[^{}]*"intent"[^{}]*\}"#).unwrap(),
        Regex::new(r"\{[^{}]+\}").unwrap(),
        Regex::new(r"(?s)\{.*?\}\s*$").unwrap(),
    ]
});

/// Tries a sequence of JSON-extraction patterns against a raw model
/// response, accepting the first candidate that parses and contains an
/// `intent` field.
pub fn parse_understanding_response(raw: &str) -> Option<Intent> {
    for pattern in JSON_EXTRACTION_PATTERNS.iter() {
        if let Some(m) = pattern.find(raw) {
            if let Ok(value) = serde_json::from_str::<Value>(m.as_str()) {
                if value.get("intent").is_some() {
                    if let Ok(intent) = serde_json::from_value::<Intent>(value) {
                        return Some(intent);
                    }
                }
            }
        }
    }
    None
}

const ENTITY_KEYWORDS: &[(&str, &[&str])] = &[
    ("kullanici", &["kullanici", "kullanıcı", "user", "users"]),
    ("musteri", &["musteri", "müşteri", "customer", "customers", "client"]),
    ("siparis", &["siparis", "sipariş", "order", "orders"]),
    ("urun", &["urun", "ürün", "product", "products"]),
    ("satis", &["satis", "satış", "sale", "sales"]),
];

/// Deterministic rule-based understanding used whenever the model call
/// fails or its response doesn't parse: a keyword-to-intent map plus a
/// curated entity keyword table.
pub fn parse_intent_fallback(text: &str) -> Intent {
    let lower = text.to_lowercase();

    let intent = if ["kac", "kaç", "sayı", "sayi", "count", "adet", "tane"].iter().any(|k| lower.contains(k)) {
        "count"
    } else if ["toplam", "sum"].iter().any(|k| lower.contains(k)) {
        "sum"
    } else if ["ortalama", "avg", "average"].iter().any(|k| lower.contains(k)) {
        "avg"
    } else if ["en fazla", "en çok", "en cok", "max", "maksimum"].iter().any(|k| lower.contains(k)) {
        "max"
    } else if ["en az", "min", "minimum"].iter().any(|k| lower.contains(k)) {
        "min"
    } else {
        "select"
    };

    let mut entities = Vec::new();
    for (entity, keywords) in ENTITY_KEYWORDS {
        if keywords.iter().any(|kw| lower.contains(kw)) {
            entities.push(entity.to_string());
        }
    }

    Intent { intent: intent.to_string(), entities, filters: Vec::new(), ..Default::default() }
}

static CODE_FENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)```sql?\s*|```\s*$").unwrap());
static XML_TAGS: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").unwrap());
static SQL_PREFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^(sql query:\s*|query:\s*|answer:\s*|sql:\s*)").unwrap());
static LEADING_JUNK: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[^A-Za-z]*").unwrap());
static SELECT_STATEMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)(SELECT\s+.*?)(?:;|$)").unwrap());

/// Strips markdown fences, XML-like tags, common prefixes and leading
/// junk, then keeps the first complete statement up to a terminating
/// semicolon.
pub fn clean_sql(raw: &str) -> String {
    let mut sql = raw.trim().to_string();
    if sql.is_empty() {
        return sql;
    }

    sql = XML_TAGS.replace_all(&sql, "").to_string();
    sql = CODE_FENCE.replace_all(&sql, "").to_string();
    sql = SQL_PREFIX.replace(&sql, "").to_string();
    sql = LEADING_JUNK.replace(&sql, "").to_string();

    let mut parts = Vec::new();
    let mut found_sql = false;
    let mut terminated = false;
    for line in sql.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with("--") {
            continue;
        }
        let upper = line.to_uppercase();
        if upper.starts_with("SELECT") || upper.starts_with("INSERT") || upper.starts_with("UPDATE")
            || upper.starts_with("DELETE") || upper.starts_with("WITH") || found_sql
        {
            found_sql = true;
            parts.push(line.to_string());
            if line.contains(';') {
                terminated = true;
                break;
            }
        }
    }

    let mut cleaned = if !parts.is_empty() {
        parts.join(" ")
    } else if let Some(m) = SELECT_STATEMENT.captures(&sql) {
        m[1].to_string()
    } else {
        sql.trim().to_string()
    };
    let _ = terminated;

    cleaned = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    if !cleaned.is_empty() && !cleaned.ends_with(';') {
        cleaned.push(';');
    }
    cleaned
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_understanding_extracts_intent_field_json() {
        let raw = "some preamble {\"intent\":\"count\",\"entities\":[\"kullanici\"],\"filters\":[]} trailing";
        let intent = parse_understanding_response(raw).expect("should parse");
        assert_eq!(intent.intent, "count");
    }

    #[test]
    fn parse_understanding_returns_none_without_intent_field() {
        assert!(parse_understanding_response("{\"foo\": 1}").is_none());
    }

    #[test]
    fn fallback_detects_count_intent() {
        let intent = parse_intent_fallback("kaç kullanıcı var");
        assert_eq!(intent.intent, "count");
        assert!(intent.entities.contains(&"kullanici".to_string()));
    }

    #[test]
    fn clean_sql_strips_markdown_fence_and_terminates_at_semicolon() {
        let raw = "```sql\nSELECT * FROM users;\nextra junk\n```";
        assert_eq!(clean_sql(raw), "SELECT * FROM users;");
    }

    #[test]
    fn clean_sql_strips_common_prefix() {
        assert_eq!(clean_sql("SQL: SELECT 1"), "SELECT 1;");
    }

    #[test]
    fn clean_sql_of_empty_string_is_empty() {
        assert_eq!(clean_sql("   "), "");
    }
}
