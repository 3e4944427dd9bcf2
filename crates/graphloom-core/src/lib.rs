//! graphloom-core: Shared types, configuration, and error handling for graphloom.
//!
//! This crate provides the foundational types used across all graphloom crates:
//! - Configuration entities read from the control database
//! - Extracted rows and business keys
//! - Graph node, relationship and statement types
//! - Configuration loading
//! - Common error types

pub mod config;
pub mod error;
pub mod types;

pub use error::GraphloomError;
pub use types::{
    key_component, BusinessKey, Column, ColumnKind, FieldExclusionRule, GraphNode,
    GraphRelationship, NodeLabelMapping, Property, RelationshipMapping, Row, RunStatus,
    ScriptRecord, SourceDatabase, Statement, TableStatus,
};
