//! Core domain types for the graphloom pipeline.
//!
//! Configuration entities mirror the rows of the control database and are
//! read once per run. Transient entities (rows, nodes, relationships,
//! statements) live only for the run that produced them.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ── Configuration Entities ────────────────────────────────────────

/// A registered source database.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceDatabase {
    pub source_id: i64,
    /// Unique identifier referenced by relationship mappings.
    pub source_name: String,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub is_active: bool,
}

impl fmt::Debug for SourceDatabase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceDatabase")
            .field("source_id", &self.source_id)
            .field("source_name", &self.source_name)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("is_active", &self.is_active)
            .finish()
    }
}

/// Marks one column of one table in one source as omitted from extraction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FieldExclusionRule {
    pub source_id: i64,
    pub table_name: String,
    pub column_name: String,
    pub is_excluded: bool,
}

/// Translates a source table name into a graph node label.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeLabelMapping {
    pub table_name: String,
    pub node_label: String,
    pub is_active: bool,
}

/// Declares an edge type between two labels and the predicate that decides
/// which node pairs are connected.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RelationshipMapping {
    pub mapping_id: i64,
    pub source_db: String,
    pub relationship_type: String,
    pub from_label: String,
    pub to_label: String,
    pub join_condition: String,
    pub junction_table: Option<String>,
    pub junction_label: Option<String>,
    pub description: Option<String>,
    /// Comma-separated `name = alias.attribute` pairs copied onto each edge.
    pub edge_properties: Option<String>,
    pub is_active: bool,
    pub execution_order: i32,
}

impl RelationshipMapping {
    /// Whether this mapping routes through a junction table or label.
    pub fn junction_table(&self) -> Option<&str> {
        non_empty(&self.junction_table)
    }

    pub fn junction_label(&self) -> Option<&str> {
        non_empty(&self.junction_label)
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

// ── Audit State ───────────────────────────────────────────────────

/// Lifecycle of one pipeline run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Lifecycle of one (run, source, table) extraction.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TableStatus {
    Pending,
    Running,
    Success,
    Failed,
}

impl TableStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }
}

/// A generated script registered in the control database.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScriptRecord {
    pub script_id: Option<i64>,
    pub script_name: String,
    pub file_path: String,
    pub file_size_kb: i64,
    pub last_updated_at: Option<DateTime<Utc>>,
    pub last_run_time: Option<DateTime<Utc>>,
}

// ── Extracted Data ────────────────────────────────────────────────

/// Coarse classification of a source column type, used when rendering
/// property values for the graph store.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKind {
    #[default]
    Scalar,
    Date,
    Timestamp,
    TimestampTz,
    Json,
}

impl ColumnKind {
    /// Classify an `information_schema.columns.data_type` value.
    pub fn from_data_type(data_type: &str) -> Self {
        match data_type.to_ascii_lowercase().as_str() {
            "date" => Self::Date,
            "timestamp with time zone" | "timestamptz" => Self::TimestampTz,
            "timestamp without time zone" | "timestamp" => Self::Timestamp,
            "json" | "jsonb" => Self::Json,
            _ => Self::Scalar,
        }
    }
}

/// A column included in extraction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub kind: ColumnKind,
}

impl Column {
    pub fn new(name: impl Into<String>, kind: ColumnKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// The natural primary-key value of a source row, reused as node identity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BusinessKey(pub String);

impl BusinessKey {
    /// Build a key from primary-key values. Composite keys are joined with `|`.
    /// Returns `None` if any component is null.
    pub fn from_values<'a>(values: impl IntoIterator<Item = &'a Value>) -> Option<Self> {
        let parts = values
            .into_iter()
            .map(key_component)
            .collect::<Option<Vec<_>>>()?;
        if parts.is_empty() {
            return None;
        }
        Some(Self(parts.join("|")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BusinessKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Canonical string form of a scalar value used for keys and equality.
///
/// Integral numbers render without a fractional part so that `1`, `1.0` and
/// `"1"` all normalise to `"1"`. Null has no key.
pub fn key_component(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(i.to_string())
            } else if let Some(u) = n.as_u64() {
                Some(u.to_string())
            } else {
                let f = n.as_f64()?;
                if f.fract() == 0.0 && f.abs() < 9.0e15 {
                    Some((f as i64).to_string())
                } else {
                    Some(f.to_string())
                }
            }
        }
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// One extracted source row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Row {
    pub source_id: i64,
    pub table: String,
    pub attributes: Map<String, Value>,
    pub key: BusinessKey,
}

impl Row {
    /// Attribute value, treating a missing attribute as null.
    pub fn get(&self, attribute: &str) -> &Value {
        self.attributes.get(attribute).unwrap_or(&NULL)
    }
}

static NULL: Value = Value::Null;

// ── Graph Statements ──────────────────────────────────────────────

/// A node property with the source column kind it came from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Property {
    pub name: String,
    pub value: Value,
    pub kind: ColumnKind,
}

/// A node to create-or-merge, keyed by (label, business key).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GraphNode {
    pub label: String,
    pub key: BusinessKey,
    pub properties: Vec<Property>,
}

impl GraphNode {
    pub fn property(&self, name: &str) -> Option<&Value> {
        self.properties
            .iter()
            .find(|p| p.name == name)
            .map(|p| &p.value)
    }
}

/// An edge between two keyed nodes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GraphRelationship {
    pub relationship_type: String,
    pub from_label: String,
    pub from_key: BusinessKey,
    pub to_label: String,
    pub to_key: BusinessKey,
    pub properties: Vec<Property>,
}

/// One unit of the generated statement stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Statement {
    /// Uniqueness constraint on a label's key property.
    Constraint { label: String },
    Node(GraphNode),
    Relationship(GraphRelationship),
}
