//! Read operations used to verify a load.

use std::collections::BTreeMap;

use neo4rs::query;

use crate::client::{GraphClient, GraphError};

impl GraphClient {
    /// Count nodes per label. A node with several labels counts once per label.
    pub async fn count_nodes_by_label(&self) -> Result<BTreeMap<String, i64>, GraphError> {
        let q = query(
            "MATCH (n)
             UNWIND labels(n) AS label
             RETURN label, count(*) AS cnt",
        );
        let rows = self.query_rows(q).await?;
        collect_counts(&rows, "label")
    }

    /// Count relationships per type.
    pub async fn count_relationships_by_type(&self) -> Result<BTreeMap<String, i64>, GraphError> {
        let q = query(
            "MATCH ()-[r]->()
             RETURN type(r) AS rel_type, count(r) AS cnt",
        );
        let rows = self.query_rows(q).await?;
        collect_counts(&rows, "rel_type")
    }

    /// Count nodes carrying a given label.
    pub async fn count_nodes(&self, label: &str) -> Result<i64, GraphError> {
        let cypher = format!(
            "MATCH (n:{}) RETURN count(n) AS cnt",
            crate::cypher::quote_ident(label)
        );
        match self.query_one(query(&cypher)).await? {
            Some(row) => Ok(row.get::<i64>("cnt").unwrap_or(0)),
            None => Ok(0),
        }
    }
}

fn collect_counts(rows: &[neo4rs::Row], name_column: &str) -> Result<BTreeMap<String, i64>, GraphError> {
    let mut counts = BTreeMap::new();
    for row in rows {
        let name: String = row.get(name_column).map_err(|e| {
            GraphError::Serialization(format!("Failed to read {name_column}: {e}"))
        })?;
        let count: i64 = row
            .get("cnt")
            .map_err(|e| GraphError::Serialization(format!("Failed to read count: {e}")))?;
        counts.insert(name, count);
    }
    Ok(counts)
}
