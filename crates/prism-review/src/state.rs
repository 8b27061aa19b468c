use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use prism_llm::Message;
use serde::Serialize;

use crate::error::{ErrorKind, ReviewError};
use crate::pr::PullRequest;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowPhase {
    Start,
    Parsed,
    Reasoning,
    Done,
    Failed,
}

impl WorkflowPhase {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum NodeResult {
    Ok { detail: String },
    Failed { kind: ErrorKind, message: String },
}

impl NodeResult {
    #[must_use]
    pub fn ok(detail: impl Into<String>) -> Self {
        Self::Ok {
            detail: detail.into(),
        }
    }

    #[must_use]
    pub fn failed(err: &ReviewError) -> Self {
        Self::Failed {
            kind: err.kind(),
            message: err.to_string(),
        }
    }

    #[must_use]
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok { .. })
    }
}

/// Per-invocation review state. Owned by a single workflow run.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowState {
    pub collection_name: Option<String>,
    pub pr_data: String,
    pub pull_request: Option<PullRequest>,
    pub phase: WorkflowPhase,
    /// Nodes in the order they finished, successfully or not.
    pub completed_nodes: Vec<String>,
    pub node_results: BTreeMap<String, NodeResult>,
    pub started_at: DateTime<Utc>,
    /// Elapsed milliseconds per node.
    pub node_timings: BTreeMap<String, u64>,
    /// Reasoning iterations started.
    pub iterations: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub transcript: Vec<Message>,
}

impl WorkflowState {
    #[must_use]
    pub fn new(pr_data: impl Into<String>) -> Self {
        Self {
            collection_name: None,
            pr_data: pr_data.into(),
            pull_request: None,
            phase: WorkflowPhase::Start,
            completed_nodes: Vec::new(),
            node_results: BTreeMap::new(),
            started_at: Utc::now(),
            node_timings: BTreeMap::new(),
            iterations: 0,
            transcript: Vec::new(),
        }
    }

    pub fn record_node(&mut self, node: &str, elapsed: Duration, result: NodeResult) {
        if !self.is_node_complete(node) {
            self.completed_nodes.push(node.to_owned());
        }
        self.node_timings.insert(
            node.to_owned(),
            u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        );
        self.node_results.insert(node.to_owned(), result);
    }

    #[must_use]
    pub fn is_node_complete(&self, node: &str) -> bool {
        self.completed_nodes.iter().any(|n| n == node)
    }

    /// Most recent node that finished successfully.
    #[must_use]
    pub fn last_completed_node(&self) -> Option<&str> {
        self.completed_nodes
            .iter()
            .rev()
            .find(|n| self.node_results.get(n.as_str()).is_some_and(NodeResult::is_ok))
            .map(String::as_str)
    }
}
