//! Typed configuration records for every tunable recognised by the core.
//!
//! The original service carried configuration as loosely-typed dictionaries
//! threaded through constructors. Per the redesign flags, every option named
//! in the external interface is an explicit field here with the documented
//! default, grouped by the subsystem that consumes it.

use std::time::Duration;

/// Connection pool tuning (consumed by [`crate::pool::ConnectionPool`]).
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub pool_size: u32,
    pub max_overflow: u32,
    pub pool_timeout: Duration,
    pub statement_timeout: Duration,
    pub idle_timeout: Duration,
    pub tcp_connect_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            pool_size: 10,
            max_overflow: 5,
            pool_timeout: Duration::from_secs(10),
            statement_timeout: Duration::from_millis(30_000),
            idle_timeout: Duration::from_secs(30 * 60),
            tcp_connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Async executor tuning (consumed by [`crate::executor::AsyncExecutor`]).
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub fetch_size: i64,
    pub max_rows_per_query: usize,
    pub result_retention: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            fetch_size: 10_000,
            max_rows_per_query: 100_000,
            result_retention: Duration::from_secs(24 * 3600),
        }
    }
}

/// Language-model call tuning (consumed by [`crate::llm::LmAdapter`]).
#[derive(Debug, Clone)]
pub struct LmConfig {
    pub model_understand: String,
    pub model_sql: String,
    pub temperature_understand: f32,
    pub temperature_sql: f32,
    pub top_p: f32,
    pub timeout: Duration,
    pub max_tokens_understand: u32,
    pub max_tokens_sql: u32,
}

impl Default for LmConfig {
    fn default() -> Self {
        Self {
            model_understand: "understand-default".to_string(),
            model_sql: "sql-default".to_string(),
            temperature_understand: 0.1,
            temperature_sql: 0.0,
            top_p: 0.95,
            timeout: Duration::from_secs(30),
            max_tokens_understand: 300,
            max_tokens_sql: 100,
        }
    }
}

/// Schema retrieval tuning (consumed by [`crate::retrieval::VectorContextIndex`]).
#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    pub context_k: usize,
    pub similarity_threshold: f32,
    pub column_match_threshold: f32,
    pub table_match_threshold: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            context_k: 20,
            similarity_threshold: 1.0,
            column_match_threshold: 0.4,
            table_match_threshold: 0.3,
        }
    }
}

/// Allowed SQL operation, used by the safety validator's whitelist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlOperation {
    Select,
    Insert,
    Update,
    Delete,
    Other,
}

/// Safety-layer tuning (consumed by [`crate::safety::SafetyValidator`]).
#[derive(Debug, Clone)]
pub struct SafetyConfig {
    pub allowed_operations: Vec<SqlOperation>,
    pub max_sql_length: usize,
    pub max_prompt_length: usize,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            allowed_operations: vec![SqlOperation::Select],
            max_sql_length: 100_000,
            max_prompt_length: 1_000,
        }
    }
}

/// Aggregate configuration for one embedded instance of the core.
#[derive(Debug, Clone, Default)]
pub struct CoreConfig {
    pub pool: PoolConfig,
    pub executor: ExecutorConfig,
    pub lm: LmConfig,
    pub retrieval: RetrievalConfig,
    pub safety: SafetyConfig,
}
