//! Control metadata store: the configuration rows that drive a run.
//!
//! All configuration is read once per run into an immutable
//! [`ConfigSnapshot`]. Operators may edit the control tables while a run is in
//! flight; the run keeps seeing the rule set it started with.

use std::collections::{BTreeSet, HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};

use graphloom_core::{
    FieldExclusionRule, NodeLabelMapping, RelationshipMapping, ScriptRecord, SourceDatabase,
};

use crate::error::{EtlError, Result};

static NO_EXCLUSIONS: BTreeSet<String> = BTreeSet::new();

/// Point-in-time view of the control tables, as typed lookup tables.
#[derive(Debug, Clone)]
pub struct ConfigSnapshot {
    sources: Vec<SourceDatabase>,
    exclusions: HashMap<(i64, String), BTreeSet<String>>,
    labels: HashMap<String, String>,
    relationships: Vec<RelationshipMapping>,
}

impl ConfigSnapshot {
    /// Build a snapshot from raw configuration rows.
    ///
    /// Inactive rows are dropped here so every lookup only ever sees active
    /// configuration. Duplicate source identifiers make the snapshot invalid.
    pub fn new(
        sources: Vec<SourceDatabase>,
        exclusion_rules: Vec<FieldExclusionRule>,
        label_mappings: Vec<NodeLabelMapping>,
        relationship_mappings: Vec<RelationshipMapping>,
    ) -> Result<Self> {
        let mut sources: Vec<SourceDatabase> =
            sources.into_iter().filter(|s| s.is_active).collect();
        sources.sort_by_key(|s| s.source_id);

        let mut seen = HashSet::new();
        for source in &sources {
            if !seen.insert(source.source_name.as_str()) {
                return Err(EtlError::Configuration(format!(
                    "duplicate source identifier {}",
                    source.source_name
                )));
            }
        }

        let mut exclusions: HashMap<(i64, String), BTreeSet<String>> = HashMap::new();
        for rule in exclusion_rules.into_iter().filter(|r| r.is_excluded) {
            exclusions
                .entry((rule.source_id, rule.table_name))
                .or_default()
                .insert(rule.column_name);
        }

        let mut labels = HashMap::new();
        for mapping in label_mappings.into_iter().filter(|m| m.is_active) {
            if let Some(previous) = labels.insert(mapping.table_name.clone(), mapping.node_label) {
                tracing::warn!(
                    table = %mapping.table_name,
                    replaced = %previous,
                    "Duplicate label mapping, last one wins"
                );
            }
        }

        let mut relationships: Vec<RelationshipMapping> = relationship_mappings
            .into_iter()
            .filter(|m| m.is_active)
            .collect();
        relationships.sort_by_key(|m| (m.execution_order, m.mapping_id));

        Ok(Self {
            sources,
            exclusions,
            labels,
            relationships,
        })
    }

    /// Active sources in `source_id` order.
    pub fn list_active_sources(&self) -> &[SourceDatabase] {
        &self.sources
    }

    /// Columns excluded for one (source, table).
    pub fn list_exclusion_rules(&self, source_id: i64, table: &str) -> &BTreeSet<String> {
        self.exclusions
            .get(&(source_id, table.to_string()))
            .unwrap_or(&NO_EXCLUSIONS)
    }

    /// Graph label for a table; `None` means the table produces no nodes.
    pub fn resolve_label(&self, table: &str) -> Option<&str> {
        self.labels.get(table).map(String::as_str)
    }

    /// Active relationship mappings in ascending execution order.
    pub fn list_active_relationship_mappings(&self) -> &[RelationshipMapping] {
        &self.relationships
    }

    /// Whether an active mapping names this table as its junction table.
    pub fn is_junction_table(&self, table: &str) -> bool {
        self.relationships
            .iter()
            .any(|m| m.junction_table() == Some(table))
    }

    /// Whether any relationship mapping reads from this table's rows, either
    /// through its label or as a junction table.
    pub fn is_needed_for_relationships(&self, table: &str) -> bool {
        let label = self.resolve_label(table);
        self.relationships.iter().any(|m| {
            m.junction_table() == Some(table)
                || label.is_some_and(|l| {
                    m.from_label == l || m.to_label == l || m.junction_label() == Some(l)
                })
        })
    }
}

/// Read access to the control tables plus the few writes the pipeline owns
/// (source access stamps and the script registry).
#[async_trait]
pub trait ControlStore: Send + Sync {
    /// Read all configuration tables into one consistent snapshot.
    async fn load_snapshot(&self) -> Result<ConfigSnapshot>;

    /// Record a successful connection to a source.
    async fn touch_source(&self, source_id: i64) -> Result<()>;

    /// Insert or update a generated script; returns its id.
    async fn register_script(&self, script: &ScriptRecord) -> Result<i64>;

    /// The most recently generated script, if any.
    async fn latest_script(&self) -> Result<Option<ScriptRecord>>;

    /// Stamp the script's last load time.
    async fn mark_script_run(&self, script_id: i64) -> Result<()>;
}

// ── PostgreSQL ───────────────────────────────────────────────────

/// Control store backed by the control PostgreSQL database.
#[derive(Clone)]
pub struct PgControlStore {
    pool: PgPool,
}

#[derive(Debug, FromRow)]
struct SourceRow {
    source_id: i64,
    source_name: String,
    db_host: String,
    db_port: i32,
    db_name: String,
    db_user: String,
    db_password: String,
    is_active: bool,
}

#[derive(Debug, FromRow)]
struct ExclusionRow {
    source_id: i64,
    table_name: String,
    column_name: String,
    is_excluded: bool,
}

#[derive(Debug, FromRow)]
struct LabelRow {
    table_name: String,
    node_label: String,
    is_active: bool,
}

#[derive(Debug, FromRow)]
struct RelationshipRow {
    mapping_id: i64,
    source_db: String,
    relationship_type: String,
    from_label: String,
    to_label: String,
    join_condition: String,
    junction_table: Option<String>,
    junction_label: Option<String>,
    description: Option<String>,
    edge_properties: Option<String>,
    is_active: bool,
    execution_order: i32,
}

#[derive(Debug, FromRow)]
struct ScriptRow {
    script_id: i64,
    script_name: String,
    file_path: String,
    file_size_kb: i64,
    last_updated_at: Option<DateTime<Utc>>,
    last_run_time: Option<DateTime<Utc>>,
}

impl PgControlStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Optional extension columns are read through `to_jsonb` so a control
/// schema without them still loads; a missing column reads as NULL.
const RELATIONSHIP_MAPPINGS_SQL: &str = "\
SELECT rm.mapping_id::bigint AS mapping_id, rm.source_db::text AS source_db,
       rm.relationship_type::text AS relationship_type,
       rm.from_label::text AS from_label, rm.to_label::text AS to_label,
       rm.join_condition::text AS join_condition,
       to_jsonb(rm) ->> 'junction_table' AS junction_table,
       to_jsonb(rm) ->> 'junction_label' AS junction_label,
       to_jsonb(rm) ->> 'description' AS description,
       to_jsonb(rm) ->> 'edge_properties' AS edge_properties,
       rm.is_active, rm.execution_order::int4 AS execution_order
FROM relationship_mappings rm
WHERE rm.is_active = true
ORDER BY rm.execution_order, rm.mapping_id";

pub(crate) fn control_err(err: sqlx::Error) -> EtlError {
    EtlError::ControlStore(err.to_string())
}

#[async_trait]
impl ControlStore for PgControlStore {
    async fn load_snapshot(&self) -> Result<ConfigSnapshot> {
        let mut tx = self.pool.begin().await.map_err(control_err)?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ READ ONLY")
            .execute(&mut *tx)
            .await
            .map_err(control_err)?;

        let sources: Vec<SourceRow> = sqlx::query_as(
            "SELECT source_id::bigint AS source_id, source_name::text AS source_name,
                    db_host::text AS db_host, db_port::int4 AS db_port,
                    db_name::text AS db_name, db_user::text AS db_user,
                    COALESCE(db_password, '')::text AS db_password, is_active
             FROM source_databases
             WHERE is_active = true
             ORDER BY source_id",
        )
        .fetch_all(&mut *tx)
        .await
        .map_err(control_err)?;

        let exclusions: Vec<ExclusionRow> = sqlx::query_as(
            "SELECT source_id::bigint AS source_id, table_name::text AS table_name,
                    column_name::text AS column_name, is_excluded
             FROM field_exclusion_rules
             WHERE is_excluded = true",
        )
        .fetch_all(&mut *tx)
        .await
        .map_err(control_err)?;

        let labels: Vec<LabelRow> = sqlx::query_as(
            "SELECT table_name::text AS table_name, node_label::text AS node_label, is_active
             FROM node_label_mappings
             WHERE is_active = true",
        )
        .fetch_all(&mut *tx)
        .await
        .map_err(control_err)?;

        let relationships: Vec<RelationshipRow> = sqlx::query_as(RELATIONSHIP_MAPPINGS_SQL)
            .fetch_all(&mut *tx)
            .await
            .map_err(control_err)?;

        tx.commit().await.map_err(control_err)?;

        let sources = sources
            .into_iter()
            .map(|row| {
                let port = u16::try_from(row.db_port).map_err(|_| {
                    EtlError::Configuration(format!(
                        "source {} has invalid port {}",
                        row.source_name, row.db_port
                    ))
                })?;
                Ok(SourceDatabase {
                    source_id: row.source_id,
                    source_name: row.source_name,
                    host: row.db_host,
                    port,
                    database: row.db_name,
                    user: row.db_user,
                    password: row.db_password,
                    is_active: row.is_active,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let exclusions = exclusions
            .into_iter()
            .map(|row| FieldExclusionRule {
                source_id: row.source_id,
                table_name: row.table_name,
                column_name: row.column_name,
                is_excluded: row.is_excluded,
            })
            .collect();

        let labels = labels
            .into_iter()
            .map(|row| NodeLabelMapping {
                table_name: row.table_name,
                node_label: row.node_label,
                is_active: row.is_active,
            })
            .collect();

        let relationships = relationships
            .into_iter()
            .map(|row| RelationshipMapping {
                mapping_id: row.mapping_id,
                source_db: row.source_db,
                relationship_type: row.relationship_type,
                from_label: row.from_label,
                to_label: row.to_label,
                join_condition: row.join_condition,
                junction_table: row.junction_table,
                junction_label: row.junction_label,
                description: row.description,
                edge_properties: row.edge_properties,
                is_active: row.is_active,
                execution_order: row.execution_order,
            })
            .collect();

        let snapshot = ConfigSnapshot::new(sources, exclusions, labels, relationships)?;
        tracing::info!(
            sources = snapshot.list_active_sources().len(),
            label_mappings = snapshot.labels.len(),
            relationship_mappings = snapshot.list_active_relationship_mappings().len(),
            "Loaded configuration snapshot"
        );
        Ok(snapshot)
    }

    async fn touch_source(&self, source_id: i64) -> Result<()> {
        sqlx::query("UPDATE source_databases SET last_accessed = NOW() WHERE source_id = $1")
            .bind(source_id)
            .execute(&self.pool)
            .await
            .map_err(control_err)?;
        Ok(())
    }

    async fn register_script(&self, script: &ScriptRecord) -> Result<i64> {
        let script_id: i64 = sqlx::query_scalar(
            "INSERT INTO cypher_scripts (script_name, file_path, file_size_kb, last_updated_at)
             VALUES ($1, $2, $3, NOW())
             ON CONFLICT (script_name)
             DO UPDATE SET
                 file_path = EXCLUDED.file_path,
                 file_size_kb = EXCLUDED.file_size_kb,
                 last_updated_at = NOW()
             RETURNING script_id::bigint",
        )
        .bind(&script.script_name)
        .bind(&script.file_path)
        .bind(script.file_size_kb)
        .fetch_one(&self.pool)
        .await
        .map_err(control_err)?;

        tracing::info!(script_id, script = %script.script_name, "Registered generated script");
        Ok(script_id)
    }

    async fn latest_script(&self) -> Result<Option<ScriptRecord>> {
        let row: Option<ScriptRow> = sqlx::query_as(
            "SELECT script_id::bigint AS script_id, script_name::text AS script_name,
                    file_path::text AS file_path, file_size_kb::bigint AS file_size_kb,
                    last_updated_at::timestamptz AS last_updated_at,
                    last_run_time::timestamptz AS last_run_time
             FROM cypher_scripts
             ORDER BY last_updated_at DESC NULLS LAST
             LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(control_err)?;

        Ok(row.map(|row| ScriptRecord {
            script_id: Some(row.script_id),
            script_name: row.script_name,
            file_path: row.file_path,
            file_size_kb: row.file_size_kb,
            last_updated_at: row.last_updated_at,
            last_run_time: row.last_run_time,
        }))
    }

    async fn mark_script_run(&self, script_id: i64) -> Result<()> {
        sqlx::query("UPDATE cypher_scripts SET last_run_time = NOW() WHERE script_id = $1")
            .bind(script_id)
            .execute(&self.pool)
            .await
            .map_err(control_err)?;
        Ok(())
    }
}
