//! Source database access: table discovery, column metadata and row reads.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::PgPool;

use graphloom_core::{Column, ColumnKind, SourceDatabase};

use crate::db::{create_source_pool, quote_pg_ident};
use crate::error::{EtlError, Result};

/// Declared shape of one source table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    /// All declared columns in ordinal order.
    pub columns: Vec<Column>,
    /// Primary-key columns in key order; empty if the table has none.
    pub primary_key: Vec<String>,
}

/// Opens connections to source databases.
#[async_trait]
pub trait SourceConnector: Send + Sync {
    async fn connect(&self, source: &SourceDatabase) -> Result<Box<dyn SourceReader>>;
}

/// Reads from one connected source database.
#[async_trait]
pub trait SourceReader: Send + Sync {
    /// User tables, in name order.
    async fn list_tables(&self) -> Result<Vec<String>>;

    /// Columns and primary key of a table. Fails if the table does not exist.
    async fn describe_table(&self, table: &str) -> Result<TableSchema>;

    /// Read every row of a table, restricted to `columns`.
    async fn fetch_rows(&self, table: &str, columns: &[String]) -> Result<Vec<Map<String, Value>>>;

    /// Release the connection.
    async fn close(&self) {}
}

// ── PostgreSQL ───────────────────────────────────────────────────

/// Connects to PostgreSQL sources with a bounded connect timeout.
pub struct PgSourceConnector {
    connect_timeout: Duration,
}

impl PgSourceConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

#[async_trait]
impl SourceConnector for PgSourceConnector {
    async fn connect(&self, source: &SourceDatabase) -> Result<Box<dyn SourceReader>> {
        let pool = create_source_pool(source, self.connect_timeout)
            .await
            .map_err(|e| EtlError::Connection {
                target: source.source_name.clone(),
                message: e.to_string(),
            })?;
        tracing::info!(source = %source.source_name, "Connected to source");
        Ok(Box::new(PgSourceReader { pool }))
    }
}

pub struct PgSourceReader {
    pool: PgPool,
}

#[async_trait]
impl SourceReader for PgSourceReader {
    async fn list_tables(&self) -> Result<Vec<String>> {
        sqlx::query_scalar(
            "SELECT table_name::text
             FROM information_schema.tables
             WHERE table_schema = 'public' AND table_type = 'BASE TABLE'
             ORDER BY table_name",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| EtlError::extraction("*", e))
    }

    async fn describe_table(&self, table: &str) -> Result<TableSchema> {
        let columns: Vec<(String, String)> = sqlx::query_as(
            "SELECT column_name::text, data_type::text
             FROM information_schema.columns
             WHERE table_schema = 'public' AND table_name = $1
             ORDER BY ordinal_position",
        )
        .bind(table)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| EtlError::extraction(table, e))?;

        if columns.is_empty() {
            return Err(EtlError::extraction(table, "table does not exist"));
        }

        let primary_key: Vec<String> = sqlx::query_scalar(
            "SELECT a.attname::text
             FROM pg_index i
             JOIN pg_attribute a ON a.attrelid = i.indrelid AND a.attnum = ANY(i.indkey)
             WHERE i.indrelid = (quote_ident('public') || '.' || quote_ident($1))::regclass
               AND i.indisprimary
             ORDER BY array_position(i.indkey::int2[], a.attnum)",
        )
        .bind(table)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| EtlError::extraction(table, e))?;

        Ok(TableSchema {
            columns: columns
                .into_iter()
                .map(|(name, data_type)| Column::new(name, ColumnKind::from_data_type(&data_type)))
                .collect(),
            primary_key,
        })
    }

    async fn fetch_rows(&self, table: &str, columns: &[String]) -> Result<Vec<Map<String, Value>>> {
        let sql = select_rows_sql(table, columns);
        let rows: Vec<Value> = sqlx::query_scalar(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| EtlError::extraction(table, e))?;

        rows.into_iter()
            .map(|row| match row {
                Value::Object(map) => Ok(map),
                other => Err(EtlError::extraction(
                    table,
                    format!("row_to_json returned {other}"),
                )),
            })
            .collect()
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

/// `row_to_json` keeps column values typed (numbers, booleans, nested JSON)
/// without a per-type decode path.
fn select_rows_sql(table: &str, columns: &[String]) -> String {
    let column_list = columns
        .iter()
        .map(|c| quote_pg_ident(c))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "SELECT row_to_json(t) FROM (SELECT {column_list} FROM public.{}) t",
        quote_pg_ident(table)
    )
}
