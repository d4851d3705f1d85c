//! Core domain models for the workflow engine.
//!
//! A [`WorkflowDefinition`] describes the graph once per workflow type; a
//! [`WorkflowInstance`] identifies one run of it. Both can be serialised to
//! and from JSON.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::EngineError;

/// Id of the synthetic log summarising a whole run.
pub const WORKFLOW_LOG_ID: &str = "workflow";

// ---------------------------------------------------------------------------
// WorkflowNode
// ---------------------------------------------------------------------------

/// A single step in the workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowNode {
    /// Unique identifier within this workflow (referenced by edges).
    pub id: String,
    /// Key into the processor registry.
    pub processor_type: String,
    /// Arbitrary configuration passed to the processor as its parameters.
    #[serde(default)]
    pub config: Value,
}

impl WorkflowNode {
    pub fn new(id: impl Into<String>, processor_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            processor_type: processor_type.into(),
            config: Value::Null,
        }
    }

    pub fn with_config(mut self, config: Value) -> Self {
        self.config = config;
        self
    }
}

// ---------------------------------------------------------------------------
// WorkflowEdge
// ---------------------------------------------------------------------------

/// Directed edge: `to` depends on `from`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowEdge {
    pub from: String,
    pub to: String,
}

impl WorkflowEdge {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// WorkflowDefinition
// ---------------------------------------------------------------------------

/// A complete workflow definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub name: String,
    /// Nodes keyed by their id.
    pub nodes: BTreeMap<String, WorkflowNode>,
    #[serde(default)]
    pub edges: Vec<WorkflowEdge>,
}

impl WorkflowDefinition {
    /// Build a definition from a node list.
    ///
    /// # Errors
    /// [`EngineError::DuplicateNodeId`] if two nodes share an id. Edges are
    /// not checked here; see [`validate_dag`](crate::validate_dag).
    pub fn new(
        name: impl Into<String>,
        nodes: Vec<WorkflowNode>,
        edges: Vec<WorkflowEdge>,
    ) -> Result<Self, EngineError> {
        let mut by_id = BTreeMap::new();
        for node in nodes {
            if by_id.contains_key(&node.id) {
                return Err(EngineError::DuplicateNodeId(node.id));
            }
            by_id.insert(node.id.clone(), node);
        }

        Ok(Self {
            id: Uuid::new_v4(),
            name: name.into(),
            nodes: by_id,
            edges,
        })
    }

    pub fn node(&self, id: &str) -> Option<&WorkflowNode> {
        self.nodes.get(id)
    }
}

// ---------------------------------------------------------------------------
// WorkflowInstance
// ---------------------------------------------------------------------------

/// One run of a workflow definition.
///
/// Re-running with the same `id` resumes the run: nodes that already
/// succeeded under this id are served from the idempotent cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowInstance {
    pub id: String,
    pub workflow_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl WorkflowInstance {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            workflow_id: None,
            created_at: Utc::now(),
        }
    }

    /// A fresh instance of `definition` with a random id.
    pub fn of(definition: &WorkflowDefinition) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            workflow_id: Some(definition.id),
            created_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// WorkflowExecutionLog
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogStatus {
    Success,
    Failed,
}

/// Terminal record for one node, or for the whole run when `id` is
/// [`WORKFLOW_LOG_ID`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowExecutionLog {
    pub id: String,
    pub instance_id: String,
    pub status: LogStatus,
    pub error_message: Option<String>,
    pub output: Option<Value>,
    pub recorded_at: DateTime<Utc>,
}

impl WorkflowExecutionLog {
    fn with_status(id: impl Into<String>, instance_id: impl Into<String>, status: LogStatus) -> Self {
        Self {
            id: id.into(),
            instance_id: instance_id.into(),
            status,
            error_message: None,
            output: None,
            recorded_at: Utc::now(),
        }
    }

    pub fn success(id: impl Into<String>, instance_id: impl Into<String>) -> Self {
        Self::with_status(id, instance_id, LogStatus::Success)
    }

    pub fn failed(
        id: impl Into<String>,
        instance_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        let mut log = Self::with_status(id, instance_id, LogStatus::Failed);
        log.error_message = Some(message.into());
        log
    }

    pub fn with_output(mut self, output: Option<Value>) -> Self {
        self.output = output;
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == LogStatus::Success
    }
}
