//! Natural-language-to-SQL query intelligence pipeline for PostgreSQL.
//!
//! Each module below is one stage of the pipeline; [`Core`] wires them
//! together into the two external surfaces a host application talks to:
//! a request/response query port and a push-style progress port.
//!
//! ```text
//! natural language text
//!         |
//!    SafetyValidator (prompt scan)         [safety]
//!         |
//!    LanguageModel::understand             [llm]
//!         |
//!    pattern-detector enrichment           [nlp]
//!         |
//!    candidate tables (C5 + C6)            [retrieval, learning]
//!         |
//!    join paths                            [schema::graph]
//!         |
//!    QueryBuilder::build -> Interpretation  [builder]
//!         |
//!    SafetyValidator (sql scan)            [safety]
//!         |
//!    AsyncExecutor::submit -> query_id      [executor]
//!         |
//!    ConnectionPool / ResultStore           [pool, result_store]
//! ```

pub mod builder;
pub mod config;
pub mod error;
pub mod executor;
pub mod learning;
pub mod llm;
pub mod nlp;
pub mod pool;
pub mod result_store;
pub mod retrieval;
pub mod safety;
pub mod schema;
pub mod text;

pub use builder::{BuildOutcome, Interpretation, QueryBuilder};
pub use config::CoreConfig;
pub use error::{CoreError, Result};
pub use executor::{AsyncExecutor, ProgressEvent, QueryState, QueryStatus};
pub use learning::LearningStore;
pub use llm::{DeterministicLanguageModel, LanguageModel};
pub use pool::ConnectionPool;
pub use result_store::{ResultPage, ResultStore};
pub use retrieval::VectorContextIndex;
pub use safety::SafetyValidator;
pub use schema::{ConnectionTarget, Database, DatabaseStatus, GraphRegistry, JoinGraph, SchemaInspector, SchemaStore};

use std::sync::Arc;

use tokio::sync::watch;
use uuid::Uuid;

/// Outcome of [`Core::submit_natural`].
#[derive(Debug, Clone)]
pub enum SubmitOutcome {
    Ok {
        query_id: Uuid,
        sql: String,
        confidence: f64,
        interpretation: Interpretation,
        alternatives: Vec<Interpretation>,
    },
    Ambiguous {
        interpretations: Vec<Interpretation>,
        suggestions: Vec<String>,
    },
}

/// Export format named in the query port contract. Rendering is
/// intentionally plain: a compact, correct representation of whatever
/// [`ResultStore`] is holding, not a feature-complete spreadsheet writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Json,
    Sql,
}

/// One embedded instance of the pipeline: every registered database shares
/// the same schema store, retrieval index, learning store, connection
/// pool and executor, partitioned internally by database id.
pub struct Core {
    pub schema_store: Arc<SchemaStore>,
    pub graphs: Arc<GraphRegistry>,
    pub vector_index: Arc<VectorContextIndex>,
    pub learning_store: Arc<LearningStore>,
    pub pool: Arc<ConnectionPool>,
    pub executor: Arc<AsyncExecutor>,
    pub result_store: Arc<ResultStore>,
    builder: QueryBuilder,
    sql_gate: SafetyValidator,
}

impl Core {
    /// Assembles every subsystem from one [`CoreConfig`], backed by
    /// `language_model` for the understand/generate-sql calls.
    pub fn new(config: CoreConfig, language_model: Arc<dyn LanguageModel>) -> Self {
        let schema_store = Arc::new(SchemaStore::new());
        let graphs = Arc::new(GraphRegistry::new());
        let vector_index = Arc::new(VectorContextIndex::new(512));
        let learning_store = Arc::new(LearningStore::new());
        let pool = Arc::new(ConnectionPool::new(config.pool.clone()));
        let result_store = Arc::new(ResultStore::new());
        let executor = Arc::new(AsyncExecutor::new(pool.clone(), result_store.clone(), config.executor.clone()));

        let builder = QueryBuilder::new(
            schema_store.clone(),
            graphs.clone(),
            vector_index.clone(),
            learning_store.clone(),
            config.safety.clone(),
            config.retrieval.clone(),
            language_model,
            config.lm.clone(),
        );

        Self {
            schema_store,
            graphs,
            vector_index,
            learning_store,
            pool,
            executor,
            result_store,
            builder,
            sql_gate: SafetyValidator::new(config.safety),
        }
    }

    /// Convenience constructor for deployments with no configured model:
    /// every `understand`/`generate_sql` call runs the deterministic
    /// fallback directly.
    pub fn with_deterministic_model(config: CoreConfig) -> Self {
        Self::new(config, Arc::new(DeterministicLanguageModel))
    }

    /// Registers `database` for connections and bookkeeping. Does not
    /// read its schema — call [`Self::refresh_schema`] next.
    pub async fn register_database(&self, id: &str, target: ConnectionTarget) -> Result<()> {
        self.pool.register(id, &target).await?;
        self.schema_store.put_database(Database {
            id: id.to_string(),
            target,
            status: DatabaseStatus::Configured,
            last_analyzed_at: None,
        });
        Ok(())
    }

    /// Re-reads `database`'s catalog and propagates the result through
    /// every downstream consumer: schema store, join graph, retrieval
    /// index and learning store vocabulary, in that order.
    pub async fn refresh_schema(&self, database: &str) -> Result<String> {
        let managed = self
            .pool
            .get(database)
            .ok_or_else(|| CoreError::ConnectionFailed(format!("{database} is not registered")))?;

        let inspector = SchemaInspector::new(managed.pool());
        let schemas = inspector.list_schemas().await?;

        let mut tables = Vec::new();
        let mut relationships = Vec::new();
        for schema in &schemas {
            let (schema_tables, schema_relationships) = inspector.refresh_schema(schema).await?;
            tables.extend(schema_tables);
            relationships.extend(schema_relationships);
        }

        self.schema_store.put_tables(database, tables.clone());
        self.schema_store.put_relationships(database, relationships.clone());
        let hash = self.schema_store.snapshot(database);
        self.schema_store.mark_status(database, DatabaseStatus::Connected);

        self.graphs.put(database, JoinGraph::build(&tables, &relationships));
        self.vector_index.upsert_schema(database, &tables, &relationships);
        self.learning_store.initialize(database, &tables);

        Ok(hash)
    }

    /// Builds interpretations for `text` and, on a confident reading,
    /// submits it for execution. A background task records the result as
    /// a learning success once the query actually completes — recording
    /// at submission time would credit SQL that never ran.
    pub async fn submit_natural(&self, database: &str, text: &str) -> Result<SubmitOutcome> {
        match self.builder.build(database, text).await? {
            BuildOutcome::Ok { interpretation, alternatives } => {
                let query_id = self.executor.submit(database, &interpretation.sql);
                self.spawn_success_recorder(database, text, &interpretation, query_id);
                Ok(SubmitOutcome::Ok {
                    query_id,
                    sql: interpretation.sql.clone(),
                    confidence: interpretation.confidence,
                    interpretation,
                    alternatives,
                })
            }
            BuildOutcome::Ambiguous { interpretations, suggestions } => {
                Ok(SubmitOutcome::Ambiguous { interpretations, suggestions })
            }
        }
    }

    /// Submits a verbatim SQL statement, validated against the select-only
    /// safety gate. `limit`, if given, is appended only when the statement
    /// doesn't already carry one.
    pub fn submit_sql(&self, database: &str, sql: &str, limit: Option<i64>) -> Result<Uuid> {
        self.sql_gate.validate(sql).map_err(CoreError::UnsafeSql)?;
        let sql = apply_limit(sql, limit);
        Ok(self.executor.submit(database, &sql))
    }

    pub fn status(&self, query_id: Uuid) -> Result<QueryStatus> {
        self.executor.status(query_id)
    }

    pub fn results(&self, query_id: Uuid, offset: usize, limit: usize) -> Result<ResultPage> {
        self.executor.results(query_id, offset, limit)
    }

    pub fn cancel(&self, query_id: Uuid) -> bool {
        self.executor.cancel(query_id)
    }

    pub fn subscribe_progress(&self, query_id: Uuid) -> Option<watch::Receiver<ProgressEvent>> {
        self.executor.subscribe_progress(query_id)
    }

    pub fn export(&self, query_id: Uuid, format: ExportFormat) -> Result<String> {
        match format {
            ExportFormat::Sql => Ok(self.executor.status(query_id)?.sql),
            ExportFormat::Json => {
                let page = self.executor.results(query_id, 0, usize::MAX)?;
                serde_json::to_string(&page.rows).map_err(CoreError::from)
            }
            ExportFormat::Csv => {
                let page = self.executor.results(query_id, 0, usize::MAX)?;
                Ok(render_csv(&page.rows))
            }
        }
    }

    fn spawn_success_recorder(&self, database: &str, text: &str, interpretation: &Interpretation, query_id: Uuid) {
        let Some(mut progress) = self.executor.subscribe_progress(query_id) else {
            return;
        };
        let vector_index = self.vector_index.clone();
        let learning_store = self.learning_store.clone();
        let database = database.to_string();
        let text = text.to_string();
        let sql = interpretation.sql.clone();
        let tables = interpretation.tables.clone();
        let confidence = interpretation.confidence as f32;

        tokio::spawn(async move {
            while progress.changed().await.is_ok() {
                let state = progress.borrow().state;
                match state {
                    QueryState::Completed => {
                        vector_index.upsert_success(&database, &text, &sql, &tables);
                        learning_store.record_success(&database, &text, &sql, confidence);
                        break;
                    }
                    QueryState::Failed | QueryState::Cancelled => break,
                    QueryState::Running => continue,
                }
            }
        });
    }
}

fn apply_limit(sql: &str, limit: Option<i64>) -> String {
    let Some(n) = limit else {
        return sql.to_string();
    };
    if sql.to_uppercase().contains("LIMIT") {
        return sql.to_string();
    }
    let trimmed = sql.trim_end().trim_end_matches(';');
    format!("{trimmed} LIMIT {n};")
}

fn render_csv(rows: &[std::collections::HashMap<String, serde_json::Value>]) -> String {
    let Some(first) = rows.first() else {
        return String::new();
    };
    let mut headers: Vec<&String> = first.keys().collect();
    headers.sort();

    let mut out = String::new();
    out.push_str(&headers.iter().map(|h| csv_escape(h)).collect::<Vec<_>>().join(","));
    out.push('\n');
    for row in rows {
        let line: Vec<String> = headers
            .iter()
            .map(|h| {
                row.get(h.as_str())
                    .map(|v| csv_escape(&value_to_csv_cell(v)))
                    .unwrap_or_default()
            })
            .collect();
        out.push_str(&line.join(","));
        out.push('\n');
    }
    out
}

fn value_to_csv_cell(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn csv_escape(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_limit_skips_statements_that_already_have_one() {
        assert_eq!(apply_limit("SELECT 1 LIMIT 5;", Some(10)), "SELECT 1 LIMIT 5;");
    }

    #[test]
    fn apply_limit_appends_when_absent() {
        assert_eq!(apply_limit("SELECT 1", Some(10)), "SELECT 1 LIMIT 10;");
    }

    #[test]
    fn apply_limit_is_noop_without_a_limit() {
        assert_eq!(apply_limit("SELECT 1;", None), "SELECT 1;");
    }

    #[test]
    fn csv_render_escapes_commas_and_quotes() {
        let mut row = std::collections::HashMap::new();
        row.insert("name".to_string(), serde_json::Value::String("a, \"b\"".to_string()));
        let csv = render_csv(&[row]);
        assert!(csv.contains("\"a, \"\"b\"\"\""));
    }

    #[tokio::test]
    async fn new_core_has_no_registered_database() {
        let core = Core::with_deterministic_model(CoreConfig::default());
        assert!(!core.schema_store.has_schema("db1"));
        assert!(core.status(Uuid::new_v4()).is_err());
    }
}
