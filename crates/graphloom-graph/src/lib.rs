//! graphloom-graph: Neo4j client for the unified property graph.
//!
//! All statements the pipeline generates are rendered by [`cypher`] and
//! executed through the [`GraphStore`] seam, which [`GraphClient`] implements
//! over a pooled Bolt connection.

pub mod client;
pub mod cypher;
pub mod queries;

pub use client::{GraphClient, GraphConfig, GraphCounts, GraphError, GraphStore};
