//! The review graph: `parse_pr_data` feeding the `pr_analysis_agent` loop.

use std::sync::Arc;
use std::time::Instant;

use prism_llm::{Embedder, LlmProvider, Message, RetryPolicy, call_with_retry};
use prism_tools::{ToolCall, ToolGateway};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::agent::AgentStep;
use crate::error::{ErrorKind, ReviewError};
use crate::pr::{PullRequest, parse_pr_data};
use crate::prompt::{pull_request_message, system_prompt};
use crate::state::{NodeResult, WorkflowPhase, WorkflowState};
use crate::verdict::ReviewVerdict;

pub const PARSE_NODE: &str = "parse_pr_data";
pub const AGENT_NODE: &str = "pr_analysis_agent";

#[derive(Debug, Clone, Copy)]
pub struct ReviewConfig {
    pub max_iterations: u32,
    /// Applied to every model call.
    pub retry: RetryPolicy,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReviewFailure {
    pub kind: ErrorKind,
    pub message: String,
    pub last_completed_node: Option<String>,
    pub retries: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReviewOutcome {
    Completed(ReviewVerdict),
    Failed(ReviewFailure),
}

/// Final state plus outcome of one review invocation.
#[derive(Debug, Clone, Serialize)]
pub struct ReviewRun {
    pub state: WorkflowState,
    pub outcome: ReviewOutcome,
}

impl ReviewRun {
    #[must_use]
    pub fn verdict(&self) -> Option<&ReviewVerdict> {
        match &self.outcome {
            ReviewOutcome::Completed(v) => Some(v),
            ReviewOutcome::Failed(_) => None,
        }
    }
}

/// Runs reviews against shared backends. Each [`run`](Self::run) owns its
/// own [`WorkflowState`], so concurrent runs do not interact.
pub struct ReviewWorkflow<P: LlmProvider, E: Embedder> {
    provider: Arc<P>,
    gateway: Arc<ToolGateway<E>>,
    config: ReviewConfig,
}

impl<P: LlmProvider, E: Embedder> ReviewWorkflow<P, E> {
    #[must_use]
    pub fn new(provider: Arc<P>, gateway: Arc<ToolGateway<E>>, config: ReviewConfig) -> Self {
        Self {
            provider,
            gateway,
            config,
        }
    }

    /// Review the pull request described by `pr_data`.
    ///
    /// Never returns an error: failures are reported in
    /// [`ReviewRun::outcome`] with the state reached so far.
    pub async fn run(&self, pr_data: &str, cancel: &CancellationToken) -> ReviewRun {
        let mut state = WorkflowState::new(pr_data);

        let start = Instant::now();
        let pr = match parse_pr_data(&state.pr_data) {
            Ok(pr) => {
                state.record_node(
                    PARSE_NODE,
                    start.elapsed(),
                    NodeResult::ok(format!("{} changed files", pr.changed_files.len())),
                );
                state.collection_name = Some(pr.repository_identity.clone());
                state.pull_request = Some(pr.clone());
                state.phase = WorkflowPhase::Parsed;
                tracing::info!(
                    collection = %pr.repository_identity,
                    files = pr.changed_files.len(),
                    "pull request parsed"
                );
                pr
            }
            Err(e) => {
                state.record_node(PARSE_NODE, start.elapsed(), NodeResult::failed(&e));
                return fail(state, &e);
            }
        };

        state.phase = WorkflowPhase::Reasoning;
        let start = Instant::now();
        let span = tracing::info_span!("pr_analysis_agent", collection = %pr.repository_identity);
        let result = self.reason(&mut state, &pr, cancel).instrument(span).await;
        match result {
            Ok(verdict) => {
                let detail = if verdict.incomplete {
                    format!("incomplete after {} iterations", state.iterations)
                } else {
                    format!("verdict after {} iterations", state.iterations)
                };
                state.record_node(AGENT_NODE, start.elapsed(), NodeResult::ok(detail));
                state.phase = WorkflowPhase::Done;
                tracing::info!(
                    iterations = state.iterations,
                    incomplete = verdict.incomplete,
                    recommendation = ?verdict.recommendation,
                    "review done"
                );
                ReviewRun {
                    state,
                    outcome: ReviewOutcome::Completed(verdict),
                }
            }
            Err(e) => {
                state.record_node(AGENT_NODE, start.elapsed(), NodeResult::failed(&e));
                fail(state, &e)
            }
        }
    }

    async fn reason(
        &self,
        state: &mut WorkflowState,
        pr: &PullRequest,
        cancel: &CancellationToken,
    ) -> Result<ReviewVerdict, ReviewError> {
        let registry = self.gateway.registry();
        let tools = registry.definitions();
        state.transcript = vec![
            Message::system(system_prompt(&registry.format_for_prompt())),
            Message::user(pull_request_message(pr)),
        ];

        for iteration in 0..self.config.max_iterations {
            if cancel.is_cancelled() {
                tracing::info!(iteration, "review cancelled");
                return Err(ReviewError::Cancelled);
            }
            state.iterations = iteration + 1;

            let provider = &self.provider;
            let transcript = &state.transcript;
            let definitions = &tools;
            let step = call_with_retry(&self.config.retry, AGENT_NODE, || async move {
                let response = provider.chat_with_tools(transcript, definitions).await?;
                AgentStep::from_response(response)
            })
            .await?;

            match step {
                AgentStep::Final(verdict) => return Ok(verdict),
                AgentStep::ToolCalls { text, calls } => {
                    tracing::debug!(iteration, calls = calls.len(), "agent requested tools");
                    state
                        .transcript
                        .push(Message::assistant_tool_calls(text, calls.clone()));
                    for request in &calls {
                        let call = ToolCall::from(request);
                        let result = self
                            .gateway
                            .dispatch(&call, state.collection_name.as_deref())
                            .await;
                        state
                            .transcript
                            .push(Message::tool_result(result.call_id, result.content));
                    }
                }
            }
        }

        tracing::warn!(
            max_iterations = self.config.max_iterations,
            "iteration limit reached without a verdict"
        );
        Ok(ReviewVerdict::incomplete(self.config.max_iterations))
    }
}

fn fail(mut state: WorkflowState, err: &ReviewError) -> ReviewRun {
    state.phase = WorkflowPhase::Failed;
    let failure = ReviewFailure {
        kind: err.kind(),
        message: err.to_string(),
        last_completed_node: state.last_completed_node().map(str::to_owned),
        retries: err.retries(),
    };
    tracing::warn!(kind = %failure.kind, error = %failure.message, "review failed");
    ReviewRun {
        state,
        outcome: ReviewOutcome::Failed(failure),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use prism_index::{InMemoryVectorStore, Indexer, IndexerConfig, Retriever, SourceFile};
    use prism_llm::{ChatResponse, LlmError, Message, ToolDefinition};
    use prism_llm::mock::{MockEmbedder, MockProvider, MockReply, tool_call};
    use serde_json::json;

    use super::*;
    use crate::verdict::Recommendation;

    const APPROVE: &str = r#"{"summary": "Small, safe change", "findings": [], "security_concerns": [], "recommendation": "approve"}"#;

    fn payload() -> String {
        json!({
            "repository_identity": "demo",
            "pull_request_id": "1",
            "title": "Tidy login",
            "description": "Rename a variable",
            "changed_files": [{"path": "auth.py", "diff": "-pw = x\n+password = x"}]
        })
        .to_string()
    }

    fn fast_retry(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
            call_timeout: Duration::from_millis(200),
        }
    }

    async fn workflow<P: LlmProvider>(
        provider: P,
        max_iterations: u32,
        max_retries: u32,
    ) -> ReviewWorkflow<P, MockEmbedder> {
        let store = Arc::new(InMemoryVectorStore::new());
        let embedder = Arc::new(MockEmbedder::default());
        let indexer = Indexer::new(store.clone(), embedder.clone(), IndexerConfig::default()).unwrap();
        indexer
            .ingest(
                "demo",
                &[SourceFile::new("auth.py", "def login(user, password):\n    return True\n")],
                false,
            )
            .await
            .unwrap();
        let retriever = Arc::new(Retriever::new(store, embedder, fast_retry(0)));
        let gateway = Arc::new(ToolGateway::new(retriever, Duration::from_secs(5)));
        ReviewWorkflow::new(
            Arc::new(provider),
            gateway,
            ReviewConfig {
                max_iterations,
                retry: fast_retry(max_retries),
            },
        )
    }

    #[tokio::test]
    async fn approves_with_stubbed_answer() {
        let provider = MockProvider::with_responses(vec![APPROVE.into()]);
        let wf = workflow(provider, 10, 2).await;
        let run = wf.run(&payload(), &CancellationToken::new()).await;

        let verdict = run.verdict().expect("completed");
        assert_eq!(verdict.recommendation, Recommendation::Approve);
        assert!(verdict.security_concerns.is_empty());
        assert!(!verdict.incomplete);
        assert_eq!(run.state.phase, WorkflowPhase::Done);
        assert_eq!(run.state.completed_nodes, vec![PARSE_NODE, AGENT_NODE]);
        assert_eq!(run.state.collection_name.as_deref(), Some("demo"));
        assert!(run.state.node_timings.contains_key(AGENT_NODE));
    }

    #[tokio::test]
    async fn tool_results_feed_the_next_turn() {
        let provider = MockProvider::with_script([
            MockReply::Respond(tool_call(
                "c1",
                "search_vector_database",
                json!({"query": "login password", "limit": 1}),
            )),
            MockReply::Respond(tool_call("c2", "get_content_by_id", json!({"record_id": "missing"}))),
            MockReply::Respond(ChatResponse::Text(APPROVE.into())),
        ]);
        let wf = workflow(provider.clone(), 10, 0).await;
        let run = wf.run(&payload(), &CancellationToken::new()).await;

        assert!(run.verdict().is_some());
        assert_eq!(run.state.iterations, 3);
        let seen = provider.transcripts();
        assert_eq!(seen.len(), 3);

        let second = &seen[1];
        let result = second.last().unwrap();
        assert_eq!(result.tool_call_id.as_deref(), Some("c1"));
        assert!(result.content.contains("auth.py"));

        let third = &seen[2];
        let result = third.last().unwrap();
        assert_eq!(result.tool_call_id.as_deref(), Some("c2"));
        assert!(result.content.starts_with("error:"));
    }

    #[tokio::test]
    async fn iteration_limit_yields_incomplete_verdict() {
        let provider = MockProvider::always(&MockReply::Respond(tool_call(
            "c",
            "list_directories",
            json!({}),
        )));
        let wf = workflow(provider.clone(), 3, 2).await;
        let run = wf.run(&payload(), &CancellationToken::new()).await;

        let verdict = run.verdict().expect("completed");
        assert!(verdict.incomplete);
        assert_eq!(verdict.recommendation, Recommendation::NeedsDiscussion);
        assert_eq!(run.state.iterations, 3);
        assert_eq!(provider.calls(), 3);
        assert_eq!(run.state.phase, WorkflowPhase::Done);
    }

    #[tokio::test]
    async fn persistent_timeout_fails_after_retries() {
        let provider = MockProvider::always(&MockReply::Hang(10_000));
        let wf = workflow(provider.clone(), 10, 2).await;
        let run = wf.run(&payload(), &CancellationToken::new()).await;

        let ReviewOutcome::Failed(failure) = &run.outcome else {
            panic!("expected failure, got {:?}", run.outcome);
        };
        assert_eq!(failure.kind, ErrorKind::BackendTimeout);
        assert_eq!(failure.retries, 2);
        assert_eq!(failure.last_completed_node.as_deref(), Some(PARSE_NODE));
        assert_eq!(provider.calls(), 3);
        assert_eq!(run.state.phase, WorkflowPhase::Failed);
        assert_eq!(run.state.completed_nodes, vec![PARSE_NODE, AGENT_NODE]);
        assert!(!run.state.node_results[AGENT_NODE].is_ok());
    }

    #[tokio::test]
    async fn malformed_answer_is_retried() {
        let provider = MockProvider::with_script([
            MockReply::Respond(ChatResponse::Text("LGTM!".into())),
            MockReply::RateLimited,
            MockReply::Respond(ChatResponse::Text(APPROVE.into())),
        ]);
        let wf = workflow(provider.clone(), 10, 2).await;
        let run = wf.run(&payload(), &CancellationToken::new()).await;
        assert!(run.verdict().is_some());
        assert_eq!(provider.calls(), 3);
        assert_eq!(run.state.iterations, 1);
    }

    #[tokio::test]
    async fn malformed_payload_fails_without_model_calls() {
        let provider = MockProvider::default();
        let wf = workflow(provider.clone(), 10, 2).await;
        let run = wf
            .run(r#"{"repository": "demo", "changed_files": []}"#, &CancellationToken::new())
            .await;

        let ReviewOutcome::Failed(failure) = &run.outcome else {
            panic!("expected failure");
        };
        assert_eq!(failure.kind, ErrorKind::MalformedInput);
        assert_eq!(failure.retries, 0);
        assert!(failure.last_completed_node.is_none());
        assert_eq!(provider.calls(), 0);
        assert_eq!(run.state.completed_nodes, vec![PARSE_NODE]);
    }

    #[tokio::test]
    async fn cancellation_stops_before_next_iteration() {
        let provider = MockProvider::default();
        let wf = workflow(provider.clone(), 10, 2).await;
        let cancel = CancellationToken::new();
        cancel.cancel();
        let run = wf.run(&payload(), &cancel).await;

        let ReviewOutcome::Failed(failure) = &run.outcome else {
            panic!("expected failure");
        };
        assert_eq!(failure.kind, ErrorKind::Cancelled);
        assert_eq!(provider.calls(), 0);
    }

    /// Cancels the run's token while the model is answering.
    struct CancelsWhileAnswering {
        inner: MockProvider,
        cancel: CancellationToken,
    }

    impl LlmProvider for CancelsWhileAnswering {
        #[allow(clippy::unnecessary_literal_bound)]
        fn name(&self) -> &str {
            "cancelling"
        }

        async fn chat_with_tools(
            &self,
            messages: &[Message],
            tools: &[ToolDefinition],
        ) -> Result<ChatResponse, LlmError> {
            self.cancel.cancel();
            self.inner.chat_with_tools(messages, tools).await
        }
    }

    #[tokio::test]
    async fn cancellation_during_iteration_stops_at_next_boundary() {
        let inner = MockProvider::always(&MockReply::Respond(tool_call(
            "c",
            "list_directories",
            json!({}),
        )));
        let cancel = CancellationToken::new();
        let provider = CancelsWhileAnswering {
            inner: inner.clone(),
            cancel: cancel.clone(),
        };
        let wf = workflow(provider, 10, 2).await;
        let run = wf.run(&payload(), &cancel).await;

        let ReviewOutcome::Failed(failure) = &run.outcome else {
            panic!("expected failure, got {:?}", run.outcome);
        };
        assert_eq!(failure.kind, ErrorKind::Cancelled);
        assert_eq!(failure.last_completed_node.as_deref(), Some(PARSE_NODE));
        assert_eq!(inner.calls(), 1);
        assert_eq!(run.state.iterations, 1);
        assert_eq!(run.state.phase, WorkflowPhase::Failed);
        // The tool call requested in the first iteration still ran.
        let last = run.state.transcript.last().unwrap();
        assert_eq!(last.tool_call_id.as_deref(), Some("c"));
    }

    #[tokio::test]
    async fn concurrent_runs_do_not_share_state() {
        let provider = MockProvider::always(&MockReply::Respond(ChatResponse::Text(APPROVE.into())));
        let wf = workflow(provider, 10, 0).await;
        let cancel = CancellationToken::new();
        let other = payload().replace("\"demo\"", "\"other\"");
        let first = payload();
        let (a, b) = tokio::join!(wf.run(&first, &cancel), wf.run(&other, &cancel));
        assert_eq!(a.state.collection_name.as_deref(), Some("demo"));
        assert_eq!(b.state.collection_name.as_deref(), Some("other"));
        assert!(a.verdict().is_some() && b.verdict().is_some());
    }

    #[test]
    fn outcome_serializes_with_status() {
        let outcome = ReviewOutcome::Failed(ReviewFailure {
            kind: ErrorKind::BackendTimeout,
            message: "timed out".into(),
            last_completed_node: Some(PARSE_NODE.into()),
            retries: 2,
        });
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["kind"], "backend_timeout");
    }
}
