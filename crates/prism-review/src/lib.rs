//! Agentic pull request review.
//!
//! [`ReviewWorkflow`] parses a PR payload, then drives a bounded tool-using
//! agent loop over the retrieval tools until the model returns a
//! [`ReviewVerdict`] or the iteration budget runs out.

pub mod agent;
pub mod error;
pub mod pr;
pub mod prompt;
pub mod state;
pub mod verdict;
pub mod workflow;

pub use agent::AgentStep;
pub use error::{ErrorKind, ReviewError};
pub use pr::{ChangedFile, PullRequest, parse_pr_data};
pub use state::{NodeResult, WorkflowPhase, WorkflowState};
pub use verdict::{Finding, Recommendation, ReviewVerdict};
pub use workflow::{
    AGENT_NODE, PARSE_NODE, ReviewConfig, ReviewFailure, ReviewOutcome, ReviewRun, ReviewWorkflow,
};
