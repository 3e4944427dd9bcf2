//! Graph loader: optional wipe, then statements strictly in sequence.

use std::sync::Arc;

use graphloom_graph::{GraphCounts, GraphStore};

use crate::error::{EtlError, Result};

/// Outcome of one load.
#[derive(Debug, Default)]
pub struct LoadReport {
    pub total: usize,
    pub succeeded: usize,
    /// One `StatementExecution` error per rejected statement.
    pub failures: Vec<EtlError>,
    /// Node and relationship counts after the load, when they could be read.
    pub counts: Option<GraphCounts>,
}

impl LoadReport {
    pub fn failed(&self) -> usize {
        self.failures.len()
    }
}

pub struct GraphLoader {
    graph: Arc<dyn GraphStore>,
    progress_interval: usize,
}

impl GraphLoader {
    pub fn new(graph: Arc<dyn GraphStore>, progress_interval: usize) -> Self {
        Self {
            graph,
            progress_interval: progress_interval.max(1),
        }
    }

    /// Execute `statements` in order. A failed wipe aborts the load; a
    /// failed statement is recorded and skipped.
    pub async fn load(&self, statements: &[String], clear_first: bool) -> Result<LoadReport> {
        if clear_first {
            tracing::info!("Clearing graph before load");
            self.graph.clear().await?;
        }

        let total = statements.len();
        tracing::info!(total, "Loading statements");

        let mut report = LoadReport {
            total,
            ..Default::default()
        };
        for (index, statement) in statements.iter().enumerate() {
            match self.graph.execute(statement).await {
                Ok(()) => report.succeeded += 1,
                Err(e) => {
                    tracing::warn!(index, error = %e, "Statement failed");
                    report.failures.push(EtlError::StatementExecution {
                        index,
                        message: e.to_string(),
                    });
                }
            }
            let done = index + 1;
            if done % self.progress_interval == 0 && done < total {
                tracing::info!(done, total, failed = report.failures.len(), "Load progress");
            }
        }

        report.counts = match self.graph.counts().await {
            Ok(counts) => {
                tracing::info!(
                    nodes = counts.total_nodes(),
                    relationships = counts.total_relationships(),
                    by_label = ?counts.nodes,
                    by_type = ?counts.relationships,
                    "Graph counts after load"
                );
                Some(counts)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Could not read graph counts");
                None
            }
        };

        tracing::info!(
            total,
            succeeded = report.succeeded,
            failed = report.failed(),
            "Load finished"
        );
        Ok(report)
    }
}
