//! Run and table audit trail.
//!
//! The recorder hands out explicit state objects instead of keeping ambient
//! state: [`RunAudit`] for the run and [`TableAudit`] for each table. Closing
//! consumes the handle, so every record is closed exactly once. All writes to
//! the audit tables go through one lock per recorder, which keeps concurrent
//! source extraction single-writer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;

use graphloom_core::{RunStatus, TableStatus};

use crate::control::{control_err, PgControlStore};
use crate::error::{EtlError, Result};

/// Final values written to a table log when it closes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableClose {
    pub status: TableStatus,
    pub rows_processed: i64,
    pub error_message: Option<String>,
}

/// Persistence for `etl_run_logs` and `etl_table_logs`.
#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn insert_run(&self) -> Result<i64>;
    async fn finish_run(&self, run_id: i64, status: RunStatus) -> Result<()>;
    async fn insert_table_log(&self, run_id: i64, source_id: i64, table: &str) -> Result<i64>;
    async fn finish_table_log(&self, table_log_id: i64, close: &TableClose) -> Result<()>;
}

/// An open run. Closed by [`AuditRecorder::close_run`].
#[derive(Debug)]
pub struct RunAudit {
    run_id: i64,
    started_at: DateTime<Utc>,
    tables: Vec<TableRecord>,
}

impl RunAudit {
    pub fn run_id(&self) -> i64 {
        self.run_id
    }

    /// Fold closed table records into the run.
    pub fn record(&mut self, records: impl IntoIterator<Item = TableRecord>) {
        self.tables.extend(records);
    }
}

/// An open table log. Closed by [`AuditRecorder::close_table`].
#[derive(Debug)]
pub struct TableAudit {
    table_log_id: i64,
    source_id: i64,
    table: String,
    started_at: DateTime<Utc>,
}

/// A closed table log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableRecord {
    pub source_id: i64,
    pub table: String,
    pub status: TableStatus,
    pub rows_processed: i64,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// A closed run.
#[derive(Debug, Clone, Serialize)]
pub struct RunRecord {
    pub run_id: i64,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub tables: Vec<TableRecord>,
}

impl RunRecord {
    pub fn failed_tables(&self) -> impl Iterator<Item = &TableRecord> {
        self.tables.iter().filter(|t| t.status == TableStatus::Failed)
    }
}

pub struct AuditRecorder {
    store: Arc<dyn AuditStore>,
    writer: Mutex<()>,
    active: AtomicBool,
}

impl AuditRecorder {
    pub fn new(store: Arc<dyn AuditStore>) -> Self {
        Self {
            store,
            writer: Mutex::new(()),
            active: AtomicBool::new(false),
        }
    }

    /// Open the run record. Failure here is fatal: without a run record the
    /// run has no reporting channel.
    pub async fn open_run(&self) -> Result<RunAudit> {
        if self.active.swap(true, Ordering::SeqCst) {
            return Err(EtlError::Configuration(
                "a run is already active for this recorder".to_string(),
            ));
        }
        let _guard = self.writer.lock().await;
        let run_id = match self.store.insert_run().await {
            Ok(id) => id,
            Err(e) => {
                self.active.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };
        tracing::info!(run_id, "Started ETL run");
        Ok(RunAudit {
            run_id,
            started_at: Utc::now(),
            tables: Vec::new(),
        })
    }

    /// Close the run with its terminal status.
    ///
    /// A failed write is returned: the stored run would otherwise stay
    /// `running` while the caller reports success.
    pub async fn close_run(&self, run: RunAudit, status: RunStatus) -> Result<RunRecord> {
        debug_assert!(status.is_terminal());
        let written = {
            let _guard = self.writer.lock().await;
            self.store.finish_run(run.run_id, status).await
        };
        self.active.store(false, Ordering::SeqCst);
        if let Err(e) = written {
            tracing::error!(run_id = run.run_id, error = %e, "Failed to close run log");
            return Err(e);
        }
        tracing::info!(run_id = run.run_id, status = status.as_str(), "Completed ETL run");
        Ok(RunRecord {
            run_id: run.run_id,
            status,
            started_at: run.started_at,
            finished_at: Utc::now(),
            tables: run.tables,
        })
    }

    /// Open a table log immediately before extraction.
    pub async fn open_table(&self, run_id: i64, source_id: i64, table: &str) -> Result<TableAudit> {
        let inserted = {
            let _guard = self.writer.lock().await;
            self.store.insert_table_log(run_id, source_id, table).await
        };
        let table_log_id = inserted.map_err(|e| {
            tracing::error!(run_id, source_id, table, error = %e, "Failed to create table log");
            e
        })?;
        Ok(TableAudit {
            table_log_id,
            source_id,
            table: table.to_string(),
            started_at: Utc::now(),
        })
    }

    /// Close a table log once its statements are generated (or it failed).
    pub async fn close_table(&self, table: TableAudit, close: TableClose) -> Result<TableRecord> {
        let written = {
            let _guard = self.writer.lock().await;
            self.store.finish_table_log(table.table_log_id, &close).await
        };
        written.map_err(|e| {
            tracing::error!(table = %table.table, error = %e, "Failed to update table log");
            e
        })?;
        Ok(TableRecord {
            source_id: table.source_id,
            table: table.table,
            status: close.status,
            rows_processed: close.rows_processed,
            error_message: close.error_message,
            started_at: table.started_at,
            finished_at: Utc::now(),
        })
    }
}

// ── PostgreSQL ───────────────────────────────────────────────────

#[async_trait]
impl AuditStore for PgControlStore {
    async fn insert_run(&self) -> Result<i64> {
        sqlx::query_scalar(
            "INSERT INTO etl_run_logs (run_start_time, status)
             VALUES (NOW(), $1)
             RETURNING log_id::bigint",
        )
        .bind(RunStatus::Running.as_str())
        .fetch_one(self.pool())
        .await
        .map_err(control_err)
    }

    async fn finish_run(&self, run_id: i64, status: RunStatus) -> Result<()> {
        sqlx::query(
            "UPDATE etl_run_logs
             SET run_end_time = NOW(), status = $1
             WHERE log_id = $2",
        )
        .bind(status.as_str())
        .bind(run_id)
        .execute(self.pool())
        .await
        .map_err(control_err)?;
        Ok(())
    }

    async fn insert_table_log(&self, run_id: i64, source_id: i64, table: &str) -> Result<i64> {
        sqlx::query_scalar(
            "INSERT INTO etl_table_logs
                 (log_id, source_id, table_name, status, is_progressing, is_done, start_time)
             VALUES ($1, $2, $3, $4, true, false, NOW())
             RETURNING table_log_id::bigint",
        )
        .bind(run_id)
        .bind(source_id)
        .bind(table)
        .bind(TableStatus::Running.as_str())
        .fetch_one(self.pool())
        .await
        .map_err(control_err)
    }

    async fn finish_table_log(&self, table_log_id: i64, close: &TableClose) -> Result<()> {
        sqlx::query(
            "UPDATE etl_table_logs
             SET status = $1, is_progressing = false, is_done = true,
                 end_time = NOW(), rows_processed = $2, error_message = $3
             WHERE table_log_id = $4",
        )
        .bind(close.status.as_str())
        .bind(close.rows_processed)
        .bind(close.error_message.as_deref())
        .bind(table_log_id)
        .execute(self.pool())
        .await
        .map_err(control_err)?;
        Ok(())
    }
}
