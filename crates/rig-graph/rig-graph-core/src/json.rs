//! JSON helpers for graphs, hierarchies and compiler configuration.

use thiserror::Error;

use crate::config::CompilerConfig;
use crate::error::GraphError;
use crate::graph::RigGraph;
use crate::joint::JointHierarchy;

/// Errors produced while reading or writing rig JSON.
#[derive(Debug, Error)]
pub enum JsonError {
    #[error("graph json parse error: {0}")]
    GraphParse(String),
    #[error("serialize graph: {0}")]
    GraphSerialize(String),
    #[error("loaded graph is invalid: {0}")]
    GraphInvalid(#[from] GraphError),
    #[error("joint hierarchy parse error: {0}")]
    HierarchyParse(String),
    #[error("config parse error: {0}")]
    ConfigParse(String),
}

pub fn graph_to_json(graph: &RigGraph) -> Result<String, JsonError> {
    serde_json::to_string_pretty(graph).map_err(|e| JsonError::GraphSerialize(e.to_string()))
}

/// Parse a graph and rebuild its name index. The graph is rejected when its edges,
/// drivers or solves do not admit a topological order.
pub fn graph_from_json(text: &str) -> Result<RigGraph, JsonError> {
    let mut graph: RigGraph =
        serde_json::from_str(text).map_err(|e| JsonError::GraphParse(e.to_string()))?;
    graph.reindex();
    graph.topological_order()?;
    Ok(graph)
}

/// Hierarchies are validated while deserializing.
pub fn parse_hierarchy(text: &str) -> Result<JointHierarchy, JsonError> {
    serde_json::from_str(text).map_err(|e| JsonError::HierarchyParse(e.to_string()))
}

/// Parse a possibly partial config; omitted fields keep their defaults.
pub fn parse_config(text: &str) -> Result<CompilerConfig, JsonError> {
    serde_json::from_str(text).map_err(|e| JsonError::ConfigParse(e.to_string()))
}
