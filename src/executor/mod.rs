//! Async, cursor-based query executor (C10).
//!
//! Each submitted query runs as its own `tokio::spawn`ed task, cooperating
//! with the rest of the process at two points: the `FETCH FORWARD` await
//! itself, and an explicit `yield_now` after every chunk is appended, so a
//! long-running query never starves cancellation or progress reads.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde_json::Value;
use sqlx::{Column as _, Row as _};
use tokio::sync::watch;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::config::ExecutorConfig;
use crate::error::{CoreError, Result};
use crate::pool::ConnectionPool;
use crate::result_store::ResultStore;

/// Terminal and in-flight states of a submitted query. Once a query leaves
/// `Running` it never re-enters it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryState {
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// Snapshot returned by [`AsyncExecutor::status`]; a fresh copy each call,
/// never a live handle into the running task.
#[derive(Debug, Clone)]
pub struct QueryStatus {
    pub id: Uuid,
    pub database: String,
    pub sql: String,
    pub submitted_at: DateTime<Utc>,
    pub state: QueryState,
    pub progress: f64,
    pub rows_processed: usize,
    pub truncated: bool,
    pub error: Option<String>,
}

/// One `{query_id, status, progress, rows_processed, timestamp}` event, as
/// named by the progress port.
#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub query_id: Uuid,
    pub state: QueryState,
    pub progress: f64,
    pub rows_processed: usize,
    pub timestamp: DateTime<Utc>,
}

struct QueryHandle {
    status: RwLock<QueryStatus>,
    cancel_flag: Arc<AtomicBool>,
    progress_tx: watch::Sender<ProgressEvent>,
}

/// Runs submitted SQL against pooled connections and streams results into
/// the [`ResultStore`]. Parallel across distinct `query_id`s; exactly one
/// producer task per `query_id`.
pub struct AsyncExecutor {
    pool: Arc<ConnectionPool>,
    result_store: Arc<ResultStore>,
    config: ExecutorConfig,
    queries: DashMap<Uuid, Arc<QueryHandle>>,
}

impl AsyncExecutor {
    pub fn new(pool: Arc<ConnectionPool>, result_store: Arc<ResultStore>, config: ExecutorConfig) -> Self {
        Self { pool, result_store, config, queries: DashMap::new() }
    }

    /// Spawns the query task and returns its id immediately; the task runs
    /// independently of the caller's continuation.
    #[instrument(skip(self, sql), fields(database = %database))]
    pub fn submit(&self, database: &str, sql: &str) -> Uuid {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let status = QueryStatus {
            id,
            database: database.to_string(),
            sql: sql.to_string(),
            submitted_at: now,
            state: QueryState::Running,
            progress: 0.0,
            rows_processed: 0,
            truncated: false,
            error: None,
        };
        let cancel_flag = Arc::new(AtomicBool::new(false));
        let (progress_tx, _rx) = watch::channel(ProgressEvent {
            query_id: id,
            state: QueryState::Running,
            progress: 0.0,
            rows_processed: 0,
            timestamp: now,
        });
        let handle = Arc::new(QueryHandle { status: RwLock::new(status), cancel_flag: cancel_flag.clone(), progress_tx });
        self.queries.insert(id, handle.clone());

        let pool = self.pool.clone();
        let result_store = self.result_store.clone();
        let config = self.config.clone();
        let database = database.to_string();
        let sql = sql.to_string();

        tokio::spawn(async move {
            run_query(id, &database, &sql, pool, result_store, config, handle, cancel_flag).await;
        });

        id
    }

    pub fn status(&self, query_id: Uuid) -> Result<QueryStatus> {
        self.queries
            .get(&query_id)
            .map(|h| h.status.read().clone())
            .ok_or_else(|| CoreError::NotFound(query_id.to_string()))
    }

    /// Requests cancellation. Returns `true` only if the query was
    /// `Running` at the time of the call; idempotent otherwise.
    pub fn cancel(&self, query_id: Uuid) -> bool {
        let Some(handle) = self.queries.get(&query_id) else {
            return false;
        };
        let is_running = handle.status.read().state == QueryState::Running;
        if is_running {
            handle.cancel_flag.store(true, Ordering::SeqCst);
        }
        is_running
    }

    pub fn results(&self, query_id: Uuid, offset: usize, limit: usize) -> Result<crate::result_store::ResultPage> {
        self.result_store
            .get(query_id, offset, limit)
            .ok_or_else(|| CoreError::NotFound(query_id.to_string()))
    }

    /// Subscribes to push-style progress events for one query, ordered by
    /// event time. Returns `None` for an unknown `query_id`.
    pub fn subscribe_progress(&self, query_id: Uuid) -> Option<watch::Receiver<ProgressEvent>> {
        self.queries.get(&query_id).map(|h| h.progress_tx.subscribe())
    }
}

async fn run_query(
    id: Uuid,
    database: &str,
    sql: &str,
    pool: Arc<ConnectionPool>,
    result_store: Arc<ResultStore>,
    config: ExecutorConfig,
    handle: Arc<QueryHandle>,
    cancel_flag: Arc<AtomicBool>,
) {
    let outcome = execute_streaming(database, sql, &pool, &config, &handle, &cancel_flag).await;

    let mut status = handle.status.write();
    match outcome {
        Ok(StreamOutcome::Cancelled) => {
            status.state = QueryState::Cancelled;
        }
        Ok(StreamOutcome::Done { rows, truncated }) => {
            let rows_processed = rows.len();
            result_store.put(id, rows, truncated, config.result_retention);
            status.state = QueryState::Completed;
            status.progress = 1.0;
            status.truncated = truncated;
            status.rows_processed = rows_processed;
        }
        Err(e) => {
            warn!(query_id = %id, error = %e, "query execution failed");
            status.state = QueryState::Failed;
            status.error = Some(e.to_string());
        }
    }
    let _ = handle.progress_tx.send(ProgressEvent {
        query_id: id,
        state: status.state,
        progress: status.progress,
        rows_processed: status.rows_processed,
        timestamp: Utc::now(),
    });
}

enum StreamOutcome {
    Done { rows: Vec<HashMap<String, Value>>, truncated: bool },
    Cancelled,
}

async fn execute_streaming(
    database: &str,
    sql: &str,
    pool: &ConnectionPool,
    config: &ExecutorConfig,
    handle: &QueryHandle,
    cancel_flag: &AtomicBool,
) -> Result<StreamOutcome> {
    let managed = pool.get(database).ok_or_else(|| CoreError::ConnectionFailed(format!("no pool registered for {database}")))?;

    let mut tx = managed.pool().begin().await.map_err(CoreError::from)?;
    let cursor_name = format!("core_cursor_{}", sql_identifier_suffix());
    sqlx::query(&format!("DECLARE {cursor_name} CURSOR FOR {sql}")).execute(&mut *tx).await.map_err(CoreError::from)?;

    let mut rows_out = Vec::new();
    let mut truncated = false;

    loop {
        if cancel_flag.load(Ordering::SeqCst) {
            tx.rollback().await.ok();
            return Ok(StreamOutcome::Cancelled);
        }

        let fetch_sql = format!("FETCH FORWARD {} FROM {cursor_name}", config.fetch_size);
        let chunk = sqlx::query(&fetch_sql).fetch_all(&mut *tx).await.map_err(CoreError::from)?;
        if chunk.is_empty() {
            break;
        }

        for row in &chunk {
            rows_out.push(row_to_map(row));
        }

        {
            let mut status = handle.status.write();
            status.rows_processed = rows_out.len();
            status.progress = (rows_out.len() as f64 / 100_000.0).min(0.99);
        }
        let _ = handle.progress_tx.send(ProgressEvent {
            query_id: handle.status.read().id,
            state: QueryState::Running,
            progress: handle.status.read().progress,
            rows_processed: rows_out.len(),
            timestamp: Utc::now(),
        });

        if rows_out.len() >= config.max_rows_per_query {
            rows_out.truncate(config.max_rows_per_query);
            truncated = true;
            break;
        }

        tokio::task::yield_now().await;
    }

    tx.rollback().await.ok();
    debug!(rows = rows_out.len(), truncated, "query streaming finished");
    Ok(StreamOutcome::Done { rows: rows_out, truncated })
}

fn sql_identifier_suffix() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Decodes one row into a column-name-keyed map, trying progressively wider
/// Postgres types per column until one decodes without a type-mismatch
/// error. `NULL` and genuinely undecodable values both surface as `Null`
/// rather than failing the whole row.
fn row_to_map(row: &sqlx::postgres::PgRow) -> HashMap<String, Value> {
    let mut map = HashMap::with_capacity(row.columns().len());
    for (idx, column) in row.columns().iter().enumerate() {
        map.insert(column.name().to_string(), decode_column(row, idx));
    }
    map
}

fn decode_column(row: &sqlx::postgres::PgRow, idx: usize) -> Value {
    if let Ok(v) = row.try_get::<Option<bool>, _>(idx) {
        return v.map(Value::from).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<i32>, _>(idx) {
        return v.map(Value::from).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
        return v.map(Value::from).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<f64>, _>(idx) {
        return v.map(Value::from).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<Decimal>, _>(idx) {
        return v.map(|d| Value::String(d.to_string())).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<uuid::Uuid>, _>(idx) {
        return v.map(|u| Value::String(u.to_string())).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(idx) {
        return v.map(|d| Value::String(d.to_rfc3339())).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<chrono::NaiveDateTime>, _>(idx) {
        return v.map(|d| Value::String(d.to_string())).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<chrono::NaiveDate>, _>(idx) {
        return v.map(|d| Value::String(d.to_string())).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<Value>, _>(idx) {
        return v.unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<String>, _>(idx) {
        return v.map(Value::String).unwrap_or(Value::Null);
    }
    Value::Null
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_of_unknown_query_returns_false() {
        let pool = Arc::new(ConnectionPool::new(crate::config::PoolConfig::default()));
        let store = Arc::new(ResultStore::new());
        let executor = AsyncExecutor::new(pool, store, ExecutorConfig::default());
        assert!(!executor.cancel(Uuid::new_v4()));
    }

    #[test]
    fn status_of_unknown_query_is_not_found() {
        let pool = Arc::new(ConnectionPool::new(crate::config::PoolConfig::default()));
        let store = Arc::new(ResultStore::new());
        let executor = AsyncExecutor::new(pool, store, ExecutorConfig::default());
        let err = executor.status(Uuid::new_v4()).unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[test]
    fn subscribe_progress_of_unknown_query_is_none() {
        let pool = Arc::new(ConnectionPool::new(crate::config::PoolConfig::default()));
        let store = Arc::new(ResultStore::new());
        let executor = AsyncExecutor::new(pool, store, ExecutorConfig::default());
        assert!(executor.subscribe_progress(Uuid::new_v4()).is_none());
    }
}
