//! Statement sink: orders generated statements and writes the script file.

use std::collections::HashSet;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use graphloom_core::{ScriptRecord, Statement};
use graphloom_graph::cypher;

use crate::error::Result;
use crate::nodes::NodeSection;
use crate::relationships::RelationshipSection;

/// Collects node sections (in source, then table order) and relationship
/// sections (in execution order).
#[derive(Debug, Default)]
pub struct StatementSink {
    nodes: Vec<NodeSection>,
    relationships: Vec<RelationshipSection>,
}

impl StatementSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_nodes(&mut self, section: NodeSection) {
        self.nodes.push(section);
    }

    pub fn push_relationships(&mut self, section: RelationshipSection) {
        self.relationships.push(section);
    }

    pub fn node_count(&self) -> usize {
        self.nodes.iter().map(|s| s.nodes.len()).sum()
    }

    pub fn relationship_count(&self) -> usize {
        self.relationships.iter().map(|s| s.relationships.len()).sum()
    }

    /// All statements in load order. A label's constraint precedes its first
    /// node; all nodes precede all relationships.
    pub fn statements(&self) -> Vec<Statement> {
        let mut constrained = HashSet::new();
        let mut out = Vec::with_capacity(self.node_count() + self.relationship_count());
        for section in &self.nodes {
            if constrained.insert(section.label.as_str()) {
                out.push(Statement::Constraint {
                    label: section.label.clone(),
                });
            }
            out.extend(section.nodes.iter().cloned().map(Statement::Node));
        }
        for section in &self.relationships {
            out.extend(
                section
                    .relationships
                    .iter()
                    .cloned()
                    .map(Statement::Relationship),
            );
        }
        out
    }

    /// Statements rendered one per line, ready for the loader.
    pub fn rendered(&self) -> Vec<String> {
        self.statements()
            .iter()
            .map(cypher::render_statement)
            .collect()
    }

    /// The human-auditable script: comment headers per source, table and
    /// mapping around the same statements [`Self::rendered`] returns.
    pub fn render_script(&self, generated_at: DateTime<Utc>) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "// graphloom generated script");
        let _ = writeln!(out, "// Generated: {}", generated_at.to_rfc3339());
        let _ = writeln!(
            out,
            "// Nodes: {} | Relationships: {}",
            self.node_count(),
            self.relationship_count()
        );

        let mut constrained = HashSet::new();
        let mut current_source: Option<&str> = None;
        for section in &self.nodes {
            if current_source != Some(section.source_name.as_str()) {
                let _ = writeln!(out, "\n// ============================================");
                let _ = writeln!(out, "// Source: {}", comment_text(&section.source_name));
                let _ = writeln!(out, "// ============================================");
                current_source = Some(section.source_name.as_str());
            }
            let _ = writeln!(
                out,
                "\n// Table: {} | Label: {} | Rows: {}",
                comment_text(&section.table),
                comment_text(&section.label),
                section.nodes.len()
            );
            if constrained.insert(section.label.as_str()) {
                let _ = writeln!(out, "{}", cypher::render_constraint(&section.label));
            }
            for node in &section.nodes {
                let _ = writeln!(out, "{}", cypher::render_node(node));
            }
        }

        if !self.relationships.is_empty() {
            let _ = writeln!(out, "\n// ============================================");
            let _ = writeln!(out, "// Relationships");
            let _ = writeln!(out, "// ============================================");
        }
        for section in &self.relationships {
            let _ = writeln!(
                out,
                "\n// {} (mapping {}) | Edges: {}",
                comment_text(&section.relationship_type),
                section.mapping_id,
                section.relationships.len()
            );
            if let Some(description) = section.description.as_deref() {
                for line in description.lines() {
                    let _ = writeln!(out, "// {}", comment_text(line));
                }
            }
            for rel in &section.relationships {
                let _ = writeln!(out, "{}", cypher::render_relationship(rel));
            }
        }
        out
    }
}

/// Control characters would end a `//` comment early.
fn comment_text(text: &str) -> String {
    text.chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect()
}

/// Split a script back into statements. Comment and blank lines are
/// skipped; lines are joined until one ends with `;`.
pub fn parse_script(text: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut buffer = String::new();
    for line in text.lines().map(str::trim) {
        if line.is_empty() || line.starts_with("//") {
            continue;
        }
        if !buffer.is_empty() {
            buffer.push(' ');
        }
        buffer.push_str(line);
        if line.ends_with(';') {
            statements.push(std::mem::take(&mut buffer));
        }
    }
    if !buffer.is_empty() {
        statements.push(buffer);
    }
    statements
}

/// Writes scripts as `<prefix>_<YYYYMMDD_HHMMSS>.cypher` in one directory.
#[derive(Debug, Clone)]
pub struct ScriptWriter {
    output_dir: PathBuf,
    prefix: String,
}

impl ScriptWriter {
    pub fn new(output_dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            output_dir: output_dir.into(),
            prefix: prefix.into(),
        }
    }

    pub fn file_name(&self, at: DateTime<Utc>) -> String {
        format!("{}_{}.cypher", self.prefix, at.format("%Y%m%d_%H%M%S"))
    }

    /// Write the script and describe it for the script registry.
    pub async fn write(&self, script: &str, at: DateTime<Utc>) -> Result<ScriptRecord> {
        tokio::fs::create_dir_all(&self.output_dir).await?;
        let name = self.file_name(at);
        let path = self.output_dir.join(&name);
        tokio::fs::write(&path, script).await?;

        let size = tokio::fs::metadata(&path).await?.len();
        let file_path = absolute(&path).await;
        tracing::info!(
            script = %name,
            path = %file_path,
            size_kb = size / 1024,
            "Wrote Cypher script"
        );

        Ok(ScriptRecord {
            script_id: None,
            script_name: name,
            file_path,
            file_size_kb: i64::try_from(size / 1024).unwrap_or(i64::MAX),
            last_updated_at: Some(at),
            last_run_time: None,
        })
    }
}

async fn absolute(path: &Path) -> String {
    tokio::fs::canonicalize(path)
        .await
        .unwrap_or_else(|_| path.to_path_buf())
        .display()
        .to_string()
}

/// Read a previously written script back into statements.
pub async fn read_script(path: impl AsRef<Path>) -> Result<Vec<String>> {
    let text = tokio::fs::read_to_string(path).await?;
    Ok(parse_script(&text))
}
