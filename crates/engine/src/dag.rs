//! Dependency graph construction and DAG validation.
//!
//! [`build_graph`] and [`build_in_degree`] produce the two tables the executor
//! drives its waves from. [`validate_dag`] is the strict pass run before
//! dispatching anything:
//! 1. Every node must be stored under its own ID.
//! 2. Every edge must reference valid node IDs (both `from` and `to`).
//! 3. The directed graph must be acyclic (topological sort must succeed).

use std::collections::{HashMap, VecDeque};

use crate::models::{WorkflowDefinition, WorkflowEdge, WorkflowNode};
use crate::EngineError;

/// `from` → every `to` that depends on it, in edge order.
pub fn build_graph(edges: &[WorkflowEdge]) -> HashMap<String, Vec<String>> {
    let mut adjacency: HashMap<String, Vec<String>> = HashMap::with_capacity(edges.len());
    for edge in edges {
        adjacency
            .entry(edge.from.clone())
            .or_default()
            .push(edge.to.clone());
    }
    adjacency
}

/// Number of incoming edges per declared node.
///
/// Edges whose target is not a declared node are ignored, so such a node can
/// never become ready by accident.
pub fn build_in_degree<'a>(
    nodes: impl IntoIterator<Item = &'a WorkflowNode>,
    edges: &[WorkflowEdge],
) -> HashMap<String, usize> {
    let mut in_degree: HashMap<String, usize> =
        nodes.into_iter().map(|n| (n.id.clone(), 0)).collect();
    for edge in edges {
        if let Some(deg) = in_degree.get_mut(&edge.to) {
            *deg += 1;
        }
    }
    in_degree
}

/// Validate the workflow's DAG and return nodes in topological execution order.
///
/// # Errors
/// - [`EngineError::NodeIdMismatch`] if a node's key differs from its id.
/// - [`EngineError::UnknownNodeReference`] if an edge references a missing node.
/// - [`EngineError::CycleDetected`] if the graph is not acyclic.
pub fn validate_dag(workflow: &WorkflowDefinition) -> Result<Vec<String>, EngineError> {
    // -----------------------------------------------------------------------
    // 1. Keys and ids agree
    // -----------------------------------------------------------------------
    for (key, node) in &workflow.nodes {
        if key != &node.id {
            return Err(EngineError::NodeIdMismatch {
                key: key.clone(),
                node_id: node.id.clone(),
            });
        }
    }

    // -----------------------------------------------------------------------
    // 2. Validate edge endpoints
    // -----------------------------------------------------------------------
    for edge in &workflow.edges {
        if !workflow.nodes.contains_key(&edge.from) {
            return Err(EngineError::UnknownNodeReference {
                node_id: edge.from.clone(),
                side: "from",
            });
        }
        if !workflow.nodes.contains_key(&edge.to) {
            return Err(EngineError::UnknownNodeReference {
                node_id: edge.to.clone(),
                side: "to",
            });
        }
    }

    // -----------------------------------------------------------------------
    // 3. Topological sort (Kahn's algorithm)
    // -----------------------------------------------------------------------
    let adjacency = build_graph(&workflow.edges);
    let mut in_degree = build_in_degree(workflow.nodes.values(), &workflow.edges);

    // Seed in node-id order so the result is deterministic.
    let mut queue: VecDeque<&str> = workflow
        .nodes
        .keys()
        .filter(|id| in_degree[id.as_str()] == 0)
        .map(String::as_str)
        .collect();

    let mut sorted: Vec<String> = Vec::with_capacity(workflow.nodes.len());

    while let Some(node_id) = queue.pop_front() {
        sorted.push(node_id.to_owned());

        for neighbour in adjacency.get(node_id).into_iter().flatten() {
            if let Some(deg) = in_degree.get_mut(neighbour) {
                *deg -= 1;
                if *deg == 0 {
                    queue.push_back(neighbour);
                }
            }
        }
    }

    // If we didn't visit every node the graph contains a cycle.
    if sorted.len() != workflow.nodes.len() {
        let stuck = workflow
            .nodes
            .keys()
            .filter(|id| in_degree[id.as_str()] > 0)
            .cloned()
            .collect();
        return Err(EngineError::CycleDetected(stuck));
    }

    Ok(sorted)
}
