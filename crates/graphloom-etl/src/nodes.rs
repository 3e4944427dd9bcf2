//! Node statement generation.

use graphloom_core::{GraphNode, Property};

use crate::extract::ExtractedTable;

/// Node statements generated for one labelled table.
#[derive(Debug, Clone)]
pub struct NodeSection {
    pub source_name: String,
    pub table: String,
    pub label: String,
    pub nodes: Vec<GraphNode>,
}

/// One node per row, carrying every extracted non-null attribute.
///
/// No deduplication: a repeated business key yields two statements and the
/// later one wins when the script is loaded.
pub fn generate_nodes(table: &ExtractedTable, label: &str) -> NodeSection {
    let nodes = table
        .rows
        .iter()
        .map(|row| GraphNode {
            label: label.to_string(),
            key: row.key.clone(),
            properties: table
                .columns
                .iter()
                .filter_map(|column| {
                    let value = row.attributes.get(&column.name)?;
                    if value.is_null() {
                        return None;
                    }
                    Some(Property {
                        name: column.name.clone(),
                        value: value.clone(),
                        kind: column.kind,
                    })
                })
                .collect(),
        })
        .collect();

    NodeSection {
        source_name: table.source_name.clone(),
        table: table.table.clone(),
        label: label.to_string(),
        nodes,
    }
}
