//! In-memory stand-ins for the control database, source databases and
//! Neo4j, shared by the pipeline tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{Map, Value};

use graphloom_core::{
    Column, ColumnKind, FieldExclusionRule, NodeLabelMapping, RelationshipMapping, RunStatus,
    ScriptRecord, SourceDatabase,
};
use graphloom_etl::audit::{AuditStore, TableClose};
use graphloom_etl::control::{ConfigSnapshot, ControlStore};
use graphloom_etl::source::{SourceConnector, SourceReader, TableSchema};
use graphloom_etl::{EtlError, Result};
use graphloom_graph::{GraphCounts, GraphError, GraphStore};

// ── Control database ──────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryControl {
    pub sources: Vec<SourceDatabase>,
    pub exclusions: Vec<FieldExclusionRule>,
    pub labels: Vec<NodeLabelMapping>,
    pub relationships: Vec<RelationshipMapping>,
    pub touched: Mutex<Vec<i64>>,
    pub scripts: Mutex<Vec<ScriptRecord>>,
    pub script_runs: Mutex<Vec<i64>>,
}

#[async_trait]
impl ControlStore for MemoryControl {
    async fn load_snapshot(&self) -> Result<ConfigSnapshot> {
        ConfigSnapshot::new(
            self.sources.clone(),
            self.exclusions.clone(),
            self.labels.clone(),
            self.relationships.clone(),
        )
    }

    async fn touch_source(&self, source_id: i64) -> Result<()> {
        self.touched.lock().unwrap().push(source_id);
        Ok(())
    }

    async fn register_script(&self, script: &ScriptRecord) -> Result<i64> {
        let mut scripts = self.scripts.lock().unwrap();
        let mut record = script.clone();
        let id = match scripts.iter().position(|s| s.script_name == script.script_name) {
            Some(pos) => {
                let id = scripts[pos].script_id.unwrap_or_default();
                record.script_id = Some(id);
                scripts[pos] = record;
                id
            }
            None => {
                let id = scripts.len() as i64 + 1;
                record.script_id = Some(id);
                scripts.push(record);
                id
            }
        };
        Ok(id)
    }

    async fn latest_script(&self) -> Result<Option<ScriptRecord>> {
        Ok(self.scripts.lock().unwrap().last().cloned())
    }

    async fn mark_script_run(&self, script_id: i64) -> Result<()> {
        self.script_runs.lock().unwrap().push(script_id);
        Ok(())
    }
}

pub fn source(id: i64, name: &str) -> SourceDatabase {
    SourceDatabase {
        source_id: id,
        source_name: name.to_string(),
        host: "localhost".to_string(),
        port: 5432,
        database: name.to_string(),
        user: "etl".to_string(),
        password: "s3cret".to_string(),
        is_active: true,
    }
}

pub fn label(table: &str, label: &str) -> NodeLabelMapping {
    NodeLabelMapping {
        table_name: table.to_string(),
        node_label: label.to_string(),
        is_active: true,
    }
}

pub fn exclude(source_id: i64, table: &str, column: &str) -> FieldExclusionRule {
    FieldExclusionRule {
        source_id,
        table_name: table.to_string(),
        column_name: column.to_string(),
        is_excluded: true,
    }
}

pub fn mapping(id: i64, rel: &str, from: &str, to: &str, condition: &str) -> RelationshipMapping {
    RelationshipMapping {
        mapping_id: id,
        source_db: "billing".to_string(),
        relationship_type: rel.to_string(),
        from_label: from.to_string(),
        to_label: to.to_string(),
        join_condition: condition.to_string(),
        junction_table: None,
        junction_label: None,
        description: None,
        edge_properties: None,
        is_active: true,
        execution_order: id as i32,
    }
}

// ── Audit ─────────────────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryAudit {
    pub runs: Mutex<Vec<(i64, RunStatus)>>,
    pub tables: Mutex<HashMap<i64, (i64, String)>>,
    pub closed: Mutex<Vec<(i64, String, TableClose)>>,
    /// Reject table log inserts, as a control database that went away would.
    pub reject_table_logs: bool,
    /// Reject the final run update.
    pub reject_run_close: bool,
}

impl MemoryAudit {
    /// Closed table logs as (source_id, table, close).
    pub fn closed_tables(&self) -> Vec<(i64, String, TableClose)> {
        self.closed.lock().unwrap().clone()
    }

    pub fn last_run_status(&self) -> Option<RunStatus> {
        self.runs.lock().unwrap().last().map(|(_, s)| *s)
    }
}

#[async_trait]
impl AuditStore for MemoryAudit {
    async fn insert_run(&self) -> Result<i64> {
        let mut runs = self.runs.lock().unwrap();
        let id = runs.len() as i64 + 1;
        runs.push((id, RunStatus::Running));
        Ok(id)
    }

    async fn finish_run(&self, run_id: i64, status: RunStatus) -> Result<()> {
        if self.reject_run_close {
            return Err(EtlError::ControlStore("connection reset".to_string()));
        }
        let mut runs = self.runs.lock().unwrap();
        if let Some(run) = runs.iter_mut().find(|(id, _)| *id == run_id) {
            run.1 = status;
        }
        Ok(())
    }

    async fn insert_table_log(&self, _run_id: i64, source_id: i64, table: &str) -> Result<i64> {
        if self.reject_table_logs {
            return Err(EtlError::ControlStore("connection reset".to_string()));
        }
        let mut tables = self.tables.lock().unwrap();
        let id = tables.len() as i64 + 1;
        tables.insert(id, (source_id, table.to_string()));
        Ok(id)
    }

    async fn finish_table_log(&self, table_log_id: i64, close: &TableClose) -> Result<()> {
        let (source_id, table) = self
            .tables
            .lock()
            .unwrap()
            .get(&table_log_id)
            .cloned()
            .ok_or_else(|| EtlError::ControlStore(format!("no table log {table_log_id}")))?;
        self.closed
            .lock()
            .unwrap()
            .push((source_id, table, close.clone()));
        Ok(())
    }
}

// ── Sources ───────────────────────────────────────────────────────

#[derive(Clone, Default)]
pub struct MemoryTable {
    pub columns: Vec<Column>,
    pub primary_key: Vec<String>,
    pub rows: Vec<Value>,
}

impl MemoryTable {
    pub fn new(columns: &[&str], primary_key: &[&str], rows: Vec<Value>) -> Self {
        Self {
            columns: columns
                .iter()
                .map(|c| Column::new(*c, ColumnKind::Scalar))
                .collect(),
            primary_key: primary_key.iter().map(|c| c.to_string()).collect(),
            rows,
        }
    }
}

#[derive(Default)]
pub struct MemorySources {
    pub databases: HashMap<String, Arc<BTreeMap<String, MemoryTable>>>,
    pub unreachable: HashSet<String>,
    /// Databases that accept the connection but fail table discovery.
    pub failing_discovery: HashSet<String>,
    /// (database, table) pairs whose row reads fail.
    pub failing_reads: HashSet<(String, String)>,
}

impl MemorySources {
    pub fn with_database(mut self, name: &str, tables: Vec<(&str, MemoryTable)>) -> Self {
        let tables = tables
            .into_iter()
            .map(|(n, t)| (n.to_string(), t))
            .collect();
        self.databases.insert(name.to_string(), Arc::new(tables));
        self
    }

    pub fn with_unreachable(mut self, name: &str) -> Self {
        self.unreachable.insert(name.to_string());
        self
    }

    pub fn with_failing_discovery(mut self, name: &str) -> Self {
        self.failing_discovery.insert(name.to_string());
        self
    }

    pub fn with_failing_read(mut self, name: &str, table: &str) -> Self {
        self.failing_reads.insert((name.to_string(), table.to_string()));
        self
    }
}

#[async_trait]
impl SourceConnector for MemorySources {
    async fn connect(&self, source: &SourceDatabase) -> Result<Box<dyn SourceReader>> {
        if self.unreachable.contains(&source.source_name) {
            return Err(EtlError::Connection {
                target: source.source_name.clone(),
                message: "connection refused".to_string(),
            });
        }
        let tables = self
            .databases
            .get(&source.source_name)
            .cloned()
            .unwrap_or_default();
        let failing_reads = self
            .failing_reads
            .iter()
            .filter(|(db, _)| *db == source.source_name)
            .map(|(_, table)| table.clone())
            .collect();
        Ok(Box::new(MemoryReader {
            tables,
            failing_discovery: self.failing_discovery.contains(&source.source_name),
            failing_reads,
        }))
    }
}

struct MemoryReader {
    tables: Arc<BTreeMap<String, MemoryTable>>,
    failing_discovery: bool,
    failing_reads: HashSet<String>,
}

#[async_trait]
impl SourceReader for MemoryReader {
    async fn list_tables(&self) -> Result<Vec<String>> {
        if self.failing_discovery {
            return Err(EtlError::Connection {
                target: "information_schema".to_string(),
                message: "server closed the connection unexpectedly".to_string(),
            });
        }
        Ok(self.tables.keys().cloned().collect())
    }

    async fn describe_table(&self, table: &str) -> Result<TableSchema> {
        let t = self.tables.get(table).ok_or_else(|| EtlError::Extraction {
            table: table.to_string(),
            message: "table does not exist".to_string(),
        })?;
        Ok(TableSchema {
            columns: t.columns.clone(),
            primary_key: t.primary_key.clone(),
        })
    }

    async fn fetch_rows(&self, table: &str, columns: &[String]) -> Result<Vec<Map<String, Value>>> {
        if self.failing_reads.contains(table) {
            return Err(EtlError::Extraction {
                table: table.to_string(),
                message: "server closed the connection unexpectedly".to_string(),
            });
        }
        let t = self.tables.get(table).ok_or_else(|| EtlError::Extraction {
            table: table.to_string(),
            message: "table does not exist".to_string(),
        })?;
        Ok(t.rows
            .iter()
            .map(|row| {
                columns
                    .iter()
                    .map(|c| (c.clone(), row.get(c).cloned().unwrap_or(Value::Null)))
                    .collect()
            })
            .collect())
    }
}

// ── Graph ─────────────────────────────────────────────────────────

#[derive(Default)]
struct GraphState {
    nodes: BTreeMap<(String, String), String>,
    edges: BTreeSet<(String, String, String, String, String)>,
}


/// Understands exactly the statement shapes the pipeline renders.
#[derive(Default)]
pub struct MemoryGraph {
    state: Mutex<GraphState>,
    pub executed: Mutex<Vec<String>>,
    pub clears: Mutex<usize>,
}

impl MemoryGraph {
    pub fn node_statement(&self, label: &str, key: &str) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .nodes
            .get(&(label.to_string(), key.to_string()))
            .cloned()
    }
}

#[async_trait]
impl GraphStore for MemoryGraph {
    async fn clear(&self) -> std::result::Result<(), GraphError> {
        *self.state.lock().unwrap() = GraphState::default();
        *self.clears.lock().unwrap() += 1;
        Ok(())
    }

    async fn execute(&self, statement: &str) -> std::result::Result<(), GraphError> {
        self.executed.lock().unwrap().push(statement.to_string());
        let mut state = self.state.lock().unwrap();

        if statement.starts_with("CREATE CONSTRAINT") {
            return Ok(());
        }
        if let Some((label, key)) = parse_node(statement) {
            state.nodes.insert((label, key), statement.to_string());
            return Ok(());
        }
        if let Some((from_label, from_key, to_label, to_key, rel_type)) = parse_edge(statement) {
            let from = (from_label.clone(), from_key.clone());
            let to = (to_label.clone(), to_key.clone());
            if state.nodes.contains_key(&from) && state.nodes.contains_key(&to) {
                state
                    .edges
                    .insert((rel_type, from_label, from_key, to_label, to_key));
            }
            return Ok(());
        }
        Err(GraphError::Rejected(format!("unrecognised statement: {statement}")))
    }

    async fn counts(&self) -> std::result::Result<GraphCounts, GraphError> {
        let state = self.state.lock().unwrap();
        let mut counts = GraphCounts::default();
        for (label, _) in state.nodes.keys() {
            *counts.nodes.entry(label.clone()).or_default() += 1;
        }
        for (rel_type, ..) in &state.edges {
            *counts.relationships.entry(rel_type.clone()).or_default() += 1;
        }
        Ok(counts)
    }
}

fn parse_node(statement: &str) -> Option<(String, String)> {
    let rest = statement.strip_prefix("MERGE (n:")?;
    let (label, rest) = rest.split_once(" {etl_key: '")?;
    let (key, _) = rest.split_once("'}")?;
    Some((label.to_string(), key.to_string()))
}

fn parse_edge(statement: &str) -> Option<(String, String, String, String, String)> {
    let rest = statement.strip_prefix("MATCH (a:")?;
    let (from_label, rest) = rest.split_once(" {etl_key: '")?;
    let (from_key, rest) = rest.split_once("'}), (b:")?;
    let (to_label, rest) = rest.split_once(" {etl_key: '")?;
    let (to_key, rest) = rest.split_once("'}) MERGE (a)-[r:")?;
    let (rel_type, _) = rest.split_once("]->(b)")?;
    Some((
        from_label.to_string(),
        from_key.to_string(),
        to_label.to_string(),
        to_key.to_string(),
        rel_type.to_string(),
    ))
}

/// Unreachable graph store used to check load-phase failure handling.
pub struct DownGraph;

#[async_trait]
impl GraphStore for DownGraph {
    async fn clear(&self) -> std::result::Result<(), GraphError> {
        Err(GraphError::Connection("connection refused".to_string()))
    }

    async fn execute(&self, _statement: &str) -> std::result::Result<(), GraphError> {
        Err(GraphError::Connection("connection refused".to_string()))
    }

    async fn counts(&self) -> std::result::Result<GraphCounts, GraphError> {
        Err(GraphError::Connection("connection refused".to_string()))
    }
}
