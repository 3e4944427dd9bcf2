//! Cypher rendering for generated statements.
//!
//! Every statement renders to a single line so the generated script can be
//! split back into statements line by line. Nodes MERGE on
//! (label, [`KEY_PROPERTY`]); relationships MATCH both endpoints the same way
//! and MERGE the edge, so replaying a script after a wipe is deterministic.

use serde_json::Value;

use graphloom_core::{ColumnKind, GraphNode, GraphRelationship, Property, Statement};

/// Property holding the business key on every generated node.
pub const KEY_PROPERTY: &str = "etl_key";

/// Detach-and-delete every node and relationship.
pub const CLEAR_GRAPH: &str = "MATCH (n) DETACH DELETE n";

/// Render a statement as one line of Cypher terminated by `;`.
pub fn render_statement(statement: &Statement) -> String {
    match statement {
        Statement::Constraint { label } => render_constraint(label),
        Statement::Node(node) => render_node(node),
        Statement::Relationship(rel) => render_relationship(rel),
    }
}

/// Uniqueness constraint on a label's key property.
pub fn render_constraint(label: &str) -> String {
    let name = constraint_name(label);
    format!(
        "CREATE CONSTRAINT {name} IF NOT EXISTS FOR (n:{}) REQUIRE n.{KEY_PROPERTY} IS UNIQUE;",
        quote_ident(label)
    )
}

pub fn render_node(node: &GraphNode) -> String {
    let key = quote_string(node.key.as_str());
    let label = quote_ident(&node.label);
    if node.properties.is_empty() {
        format!("MERGE (n:{label} {{{KEY_PROPERTY}: {key}}});")
    } else {
        format!(
            "MERGE (n:{label} {{{KEY_PROPERTY}: {key}}}) SET n += {};",
            render_map(&node.properties)
        )
    }
}

pub fn render_relationship(rel: &GraphRelationship) -> String {
    let mut out = format!(
        "MATCH (a:{} {{{KEY_PROPERTY}: {}}}), (b:{} {{{KEY_PROPERTY}: {}}}) MERGE (a)-[r:{}]->(b)",
        quote_ident(&rel.from_label),
        quote_string(rel.from_key.as_str()),
        quote_ident(&rel.to_label),
        quote_string(rel.to_key.as_str()),
        quote_ident(&rel.relationship_type),
    );
    if !rel.properties.is_empty() {
        out.push_str(" SET r += ");
        out.push_str(&render_map(&rel.properties));
    }
    out.push(';');
    out
}

fn render_map(properties: &[Property]) -> String {
    let entries: Vec<String> = properties
        .iter()
        .map(|p| format!("{}: {}", quote_ident(&p.name), render_value(&p.value, p.kind)))
        .collect();
    format!("{{{}}}", entries.join(", "))
}

/// Render a property value as a Cypher literal.
///
/// Temporal columns become temporal function calls; JSON documents are stored
/// as their serialized text since Neo4j has no nested map properties.
pub fn render_value(value: &Value, kind: ColumnKind) -> String {
    match (value, kind) {
        (Value::Null, _) => "null".to_string(),
        (Value::String(s), ColumnKind::TimestampTz) => format!("datetime({})", quote_string(s)),
        (Value::String(s), ColumnKind::Timestamp) => {
            format!("localdatetime({})", quote_string(s))
        }
        (Value::String(s), ColumnKind::Date) => format!("date({})", quote_string(s)),
        (other, ColumnKind::Json) => quote_string(&other.to_string()),
        (Value::Bool(b), _) => b.to_string(),
        (Value::Number(n), _) => n.to_string(),
        (Value::String(s), _) => quote_string(s),
        (Value::Array(items), _) => {
            let rendered: Vec<String> = items
                .iter()
                .map(|item| match item {
                    Value::Array(_) | Value::Object(_) => quote_string(&item.to_string()),
                    scalar => render_value(scalar, ColumnKind::Scalar),
                })
                .collect();
            format!("[{}]", rendered.join(", "))
        }
        (Value::Object(_), _) => quote_string(&value.to_string()),
    }
}

/// Quote a string literal, escaping everything that could end the literal
/// or break the one-statement-per-line layout.
pub fn quote_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            other => out.push(other),
        }
    }
    out.push('\'');
    out
}

/// Quote an identifier (label, property, relationship type) with backticks
/// unless it is a plain `[A-Za-z_][A-Za-z0-9_]*` name.
pub fn quote_ident(name: &str) -> String {
    let mut chars = name.chars();
    let plain = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };
    if plain {
        name.to_string()
    } else {
        format!("`{}`", name.replace('`', "``"))
    }
}

fn constraint_name(label: &str) -> String {
    let slug: String = label
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("graphloom_{slug}_{KEY_PROPERTY}")
}
