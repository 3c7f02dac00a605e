//! Concrete [`LanguageModel`] implementations: a deterministic
//! template-only model with no external dependency, and (behind
//! `http-llm`) a generic HTTP-backed model for a self-hosted inference
//! server.

use async_trait::async_trait;

use super::{parse_intent_fallback, understand_with_fallback, Intent, LanguageModel, LmError, LmResult};

pub(crate) const ENTITY_TABLE_MAP: &[(&str, &str)] = &[
    ("kullanici", "users"),
    ("musteri", "customer_segments"),
    ("siparis", "orders"),
    ("urun", "products"),
    ("satis", "sales_targets"),
];

fn table_for_entities(entities: &[String]) -> &'static str {
    for entity in entities {
        if let Some((_, table)) = ENTITY_TABLE_MAP.iter().find(|(e, _)| *e == entity) {
            return table;
        }
    }
    "users"
}

/// Per-intent SQL over the best-matching table, with a `JOIN ... GROUP
/// BY ...` skeleton when a complex-join pattern was flagged. This is the
/// last resort when no model is configured, or when one is but every call
/// failed — a first-class branch, not an error path.
pub fn generate_sql_fallback(intent: &Intent) -> String {
    let table = table_for_entities(&intent.entities);

    if let Some(serde_json::Value::Array(patterns)) = intent.metadata.get("join_patterns") {
        if let Some(serde_json::Value::String(first)) = patterns.first() {
            if first.starts_with("max_aggregation") {
                return format!(
                    "SELECT {table}.id, COUNT(*) AS total FROM {table} GROUP BY {table}.id ORDER BY total DESC LIMIT 1;"
                );
            }
            if first.starts_with("per_group_aggregation") {
                return format!("SELECT {table}.id, SUM(amount) AS total FROM {table} GROUP BY {table}.id;");
            }
            if first.starts_with("segment_revenue") {
                return "SELECT cs.segment_type, SUM(o.amount) AS total_revenue \
                         FROM customer_segments cs \
                         JOIN orders o ON o.customer_id = cs.customer_id \
                         GROUP BY cs.segment_type \
                         ORDER BY total_revenue DESC LIMIT 1;"
                    .to_string();
            }
            return format!("SELECT * FROM {table};");
        }
    }

    let mut conditions = Vec::new();
    for filter in &intent.filters {
        if let Some((field, value)) = filter.split_once('=') {
            if matches!(field, "name" | "isim" | "ad") {
                conditions.push(format!("username LIKE '%{value}%'"));
            }
        } else if let Some(predicate) = filter.strip_prefix("date:") {
            conditions.push(predicate.to_string());
        }
    }
    let where_clause = if conditions.is_empty() { String::new() } else { format!(" WHERE {}", conditions.join(" AND ")) };

    match intent.intent.as_str() {
        "count" => format!("SELECT COUNT(*) FROM {table}{where_clause};"),
        "sum" => format!("SELECT SUM(amount) FROM {table}{where_clause};"),
        "avg" => format!("SELECT AVG(amount) FROM {table}{where_clause};"),
        "max" => format!("SELECT * FROM {table}{where_clause} ORDER BY amount DESC LIMIT 1;"),
        "min" => format!("SELECT * FROM {table}{where_clause} ORDER BY amount ASC LIMIT 1;"),
        _ => format!("SELECT * FROM {table}{where_clause};"),
    }
}

/// A model-free [`LanguageModel`]: `understand` always takes the
/// deterministic keyword-map branch, `generate_sql` always takes the
/// template branch. Useful for tests and for deployments that only want
/// the rule-based pipeline.
pub struct DeterministicLanguageModel;

#[async_trait]
impl LanguageModel for DeterministicLanguageModel {
    async fn understand(&self, text: &str, _adaptive_context: &str) -> LmResult<Intent> {
        Ok(parse_intent_fallback(text))
    }

    async fn generate_sql(&self, intent: &Intent, _schema_context: &str, _adaptive_context: &str) -> LmResult<String> {
        Ok(generate_sql_fallback(intent))
    }
}

#[cfg(feature = "http-llm")]
mod http {
    use std::time::Duration;

    use serde::Serialize;

    use super::*;
    use crate::config::LmConfig;

    /// Generic HTTP-backed language model: posts a prompt to a
    /// self-hosted inference server and expects `{"response": "..."}`
    /// back. No vendor-specific client; any server speaking this shape
    /// (a local inference gateway, a thin proxy in front of a hosted
    /// model) works.
    pub struct HttpLanguageModel {
        client: reqwest::Client,
        base_url: String,
        config: LmConfig,
    }

    #[derive(Serialize)]
    struct GenerateRequest<'a> {
        model: &'a str,
        prompt: String,
        temperature: f32,
        top_p: f32,
        max_tokens: u32,
        #[serde(skip_serializing_if = "Option::is_none")]
        stop: Option<&'a [&'a str]>,
    }

    #[derive(serde::Deserialize)]
    struct GenerateResponse {
        response: String,
    }

    impl HttpLanguageModel {
        pub fn new(base_url: impl Into<String>, config: LmConfig) -> Self {
            Self {
                client: reqwest::Client::builder()
                    .timeout(config.timeout + Duration::from_secs(1))
                    .build()
                    .expect("http client configuration is valid"),
                base_url: base_url.into(),
                config,
            }
        }

        async fn generate(&self, model: &str, prompt: String, temperature: f32, max_tokens: u32, stop: Option<&[&str]>) -> LmResult<String> {
            let body = GenerateRequest { model, prompt, temperature, top_p: self.config.top_p, max_tokens, stop };

            let response = self
                .client
                .post(format!("{}/generate", self.base_url.trim_end_matches('/')))
                .json(&body)
                .send()
                .await
                .map_err(|e| LmError::CallFailed(e.to_string()))?;

            let parsed: GenerateResponse = response.json().await.map_err(|e| LmError::CallFailed(e.to_string()))?;
            Ok(parsed.response)
        }
    }

    #[async_trait]
    impl LanguageModel for HttpLanguageModel {
        async fn understand(&self, text: &str, adaptive_context: &str) -> LmResult<Intent> {
            let context_section = if adaptive_context.is_empty() { String::new() } else { format!("\n{adaptive_context}\n") };
            let prompt = format!(
                "Sorgu: \"{text}\"\n{context_section}\nAnaliz:\n\"kullanıcı sayısı\" -> {{\"intent\":\"count\",\"entities\":[\"kullanici\"],\"filters\":[]}}\n\nYanıt (sadece JSON):"
            );

            let raw = self.generate(&self.config.model_understand, prompt, self.config.temperature_understand, self.config.max_tokens_understand, None).await?;
            super::super::parse_understanding_response(&raw).ok_or(LmError::Unparseable)
        }

        async fn generate_sql(&self, intent: &Intent, schema_context: &str, adaptive_context: &str) -> LmResult<String> {
            let context_section = if adaptive_context.is_empty() { String::new() } else { format!("\nContext: {adaptive_context}\n") };
            let filter_info = if intent.filters.is_empty() { String::new() } else { format!("\nFilters to apply: {}", intent.filters.join(", ")) };

            let prompt = format!(
                "Write a SQL query for intent: {}.\n\nSchema:\n{schema_context}{filter_info}{context_section}\nSQL:",
                intent.intent
            );

            let stop = [";", "\n\n", "Schema:", "Task:", "Write"];
            let raw = self
                .generate(&self.config.model_sql, prompt, self.config.temperature_sql, self.config.max_tokens_sql, Some(&stop))
                .await?;
            Ok(super::super::clean_sql(&raw))
        }
    }
}

#[cfg(feature = "http-llm")]
pub use http::HttpLanguageModel;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn deterministic_model_round_trips_count_intent() {
        let model = DeterministicLanguageModel;
        let intent = model.understand("kaç kullanıcı var", "").await.unwrap();
        assert_eq!(intent.intent, "count");
        let sql = model.generate_sql(&intent, "", "").await.unwrap();
        assert!(sql.starts_with("SELECT COUNT(*)"));
    }

    #[test]
    fn fallback_sql_uses_join_skeleton_for_per_group_pattern() {
        let mut intent = Intent { intent: "select".to_string(), ..Default::default() };
        intent.metadata.insert(
            "join_patterns".to_string(),
            serde_json::json!(["per_group_aggregation:orders grouped by customer"]),
        );
        let sql = generate_sql_fallback(&intent);
        assert!(sql.contains("GROUP BY"));
    }

    #[tokio::test]
    async fn understand_with_fallback_applies_enrichments_on_call_error() {
        struct Always;
        #[async_trait]
        impl LanguageModel for Always {
            async fn understand(&self, _t: &str, _c: &str) -> LmResult<Intent> {
                Err(LmError::CallFailed("boom".to_string()))
            }
            async fn generate_sql(&self, _i: &Intent, _s: &str, _c: &str) -> LmResult<String> {
                Err(LmError::CallFailed("boom".to_string()))
            }
        }

        let config = crate::config::LmConfig::default();
        let intent = understand_with_fallback(&Always, &config, "ismi ahmet olan müşteriler", "").await;
        assert!(intent.filters.iter().any(|f| f == "name=ahmet"));
    }
}
