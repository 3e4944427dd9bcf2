//! Neo4j connection management and the graph store seam.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use neo4rs::{ConfigBuilder, Graph, Query};

use graphloom_core::config::Neo4jConfig;

/// Errors from graph operations.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("Neo4j connection error: {0}")]
    Connection(String),

    #[error("Neo4j query error: {0}")]
    Query(#[from] neo4rs::Error),

    #[error("Statement rejected: {0}")]
    Rejected(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Configuration for connecting to Neo4j.
#[derive(Clone)]
pub struct GraphConfig {
    pub uri: String,
    pub user: String,
    pub password: String,
    pub max_connections: u32,
    pub fetch_size: usize,
}

impl fmt::Debug for GraphConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphConfig")
            .field("uri", &self.uri)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("max_connections", &self.max_connections)
            .field("fetch_size", &self.fetch_size)
            .finish()
    }
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            uri: "bolt://localhost:7687".to_string(),
            user: "neo4j".to_string(),
            password: "graphloom-dev".to_string(),
            max_connections: 16,
            fetch_size: 256,
        }
    }
}

impl From<&Neo4jConfig> for GraphConfig {
    fn from(config: &Neo4jConfig) -> Self {
        Self {
            uri: config.uri.clone(),
            user: config.user.clone(),
            password: config.password.clone(),
            max_connections: config.max_connections,
            fetch_size: config.fetch_size,
        }
    }
}

/// Node and relationship counts, keyed by label and relationship type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GraphCounts {
    pub nodes: BTreeMap<String, i64>,
    pub relationships: BTreeMap<String, i64>,
}

impl GraphCounts {
    pub fn total_nodes(&self) -> i64 {
        self.nodes.values().sum()
    }

    pub fn total_relationships(&self) -> i64 {
        self.relationships.values().sum()
    }
}

/// The operations the loader needs from a graph store.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Detach and delete every node and relationship.
    async fn clear(&self) -> Result<(), GraphError>;

    /// Execute one statement of the generated script.
    async fn execute(&self, statement: &str) -> Result<(), GraphError>;

    /// Count nodes per label and relationships per type.
    async fn counts(&self) -> Result<GraphCounts, GraphError>;
}

/// Thread-safe Neo4j graph client with connection pooling.
///
/// Clone is cheap (inner Arc).
#[derive(Clone)]
pub struct GraphClient {
    graph: Graph,
}

impl GraphClient {
    /// Connect to Neo4j with the given configuration.
    ///
    /// neo4rs creates its pool lazily, so a `RETURN 1` ping forces the bolt
    /// handshake and surfaces an unreachable server here.
    pub async fn connect(config: &GraphConfig) -> Result<Self, GraphError> {
        let neo_config = ConfigBuilder::default()
            .uri(&config.uri)
            .user(&config.user)
            .password(&config.password)
            .max_connections(config.max_connections as usize)
            .fetch_size(config.fetch_size)
            .build()
            .map_err(|e| GraphError::Connection(e.to_string()))?;

        let graph = Graph::connect(neo_config)
            .await
            .map_err(|e| GraphError::Connection(e.to_string()))?;

        graph
            .run(Query::new("RETURN 1".to_string()))
            .await
            .map_err(|e| GraphError::Connection(e.to_string()))?;

        tracing::info!(uri = %config.uri, "Connected to Neo4j");
        Ok(Self { graph })
    }

    /// Get a reference to the underlying neo4rs Graph for direct operations.
    pub fn inner(&self) -> &Graph {
        &self.graph
    }

    /// Execute a write-only query (CREATE, MERGE, DELETE, SET).
    pub async fn run(&self, query: Query) -> Result<(), GraphError> {
        self.graph.run(query).await?;
        Ok(())
    }

    /// Execute a read query and collect all rows.
    pub async fn query_rows(&self, query: Query) -> Result<Vec<neo4rs::Row>, GraphError> {
        let mut stream = self.graph.execute(query).await?;
        let mut rows = Vec::new();
        while let Some(row) = stream.next().await? {
            rows.push(row);
        }
        Ok(rows)
    }

    /// Execute a read query and return the first row, if any.
    pub async fn query_one(&self, query: Query) -> Result<Option<neo4rs::Row>, GraphError> {
        let mut stream = self.graph.execute(query).await?;
        Ok(stream.next().await?)
    }
}

#[async_trait]
impl GraphStore for GraphClient {
    async fn clear(&self) -> Result<(), GraphError> {
        self.run(Query::new(crate::cypher::CLEAR_GRAPH.to_string()))
            .await
    }

    async fn execute(&self, statement: &str) -> Result<(), GraphError> {
        let text = statement.trim().trim_end_matches(';');
        if text.is_empty() {
            return Ok(());
        }
        self.run(Query::new(text.to_string())).await
    }

    async fn counts(&self) -> Result<GraphCounts, GraphError> {
        Ok(GraphCounts {
            nodes: self.count_nodes_by_label().await?,
            relationships: self.count_relationships_by_type().await?,
        })
    }
}
