//! graphloom-etl: metadata-driven PostgreSQL to Neo4j pipeline.
//!
//! Reads source registrations, exclusion rules and label/relationship
//! mappings from the control database, extracts every mapped table, turns
//! rows into graph statements, writes them as one ordered Cypher script and
//! loads that script into Neo4j.

pub mod audit;
pub mod control;
pub mod db;
pub mod error;
pub mod extract;
pub mod loader;
pub mod nodes;
pub mod pipeline;
pub mod relationships;
pub mod sink;
pub mod source;

pub use error::{EtlError, Result};
pub use pipeline::{GraphTarget, Pipeline, RunSummary};
