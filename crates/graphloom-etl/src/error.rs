//! Error types for the graphloom-etl crate.

use thiserror::Error;

use graphloom_core::GraphloomError;

#[derive(Error, Debug)]
pub enum EtlError {
    /// Unreadable or invalid control metadata. Fatal.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The control database rejected a read or write. Fatal.
    #[error("Control database error: {0}")]
    ControlStore(String),

    /// A source database or the graph store could not be reached.
    #[error("Connection to {target} failed: {message}")]
    Connection { target: String, message: String },

    /// A table could not be read.
    #[error("Extraction of table {table} failed: {message}")]
    Extraction { table: String, message: String },

    /// A relationship mapping could not be evaluated.
    #[error("Relationship {relationship_type} (mapping {mapping_id}) failed: {message}")]
    RelationshipResolution {
        mapping_id: i64,
        relationship_type: String,
        message: String,
    },

    /// The graph store rejected one statement.
    #[error("Statement {index} failed: {message}")]
    StatementExecution { index: usize, message: String },

    #[error("Graph error: {0}")]
    Graph(#[from] graphloom_graph::GraphError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EtlError {
    /// Whether this error must abort the run rather than degrade one item.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Configuration(_) | Self::ControlStore(_))
    }

    pub(crate) fn extraction(table: &str, message: impl ToString) -> Self {
        Self::Extraction {
            table: table.to_string(),
            message: message.to_string(),
        }
    }
}

impl From<GraphloomError> for EtlError {
    fn from(err: GraphloomError) -> Self {
        Self::Configuration(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EtlError>;
