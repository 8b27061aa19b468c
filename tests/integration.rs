use std::sync::Arc;
use std::time::Duration;

use prism_index::{
    ChunkerConfig, InMemoryVectorStore, Indexer, IndexerConfig, MatchKind, Retriever, SourceFile,
    SymbolKind, VectorStore, chunk_file, load_repository, record_id,
};
use prism_llm::mock::{MockEmbedder, MockProvider, MockReply, tool_call};
use prism_llm::{ChatResponse, RetryPolicy};
use prism_review::{
    AGENT_NODE, ErrorKind, PARSE_NODE, Recommendation, ReviewConfig, ReviewOutcome,
    ReviewWorkflow, WorkflowPhase,
};
use prism_tools::{ToolCall, ToolGateway};
use serde_json::json;
use tokio_util::sync::CancellationToken;

const APPROVE: &str = r#"{"summary": "Renames a variable", "findings": [], "security_concerns": [], "recommendation": "approve"}"#;

fn fast_retry(max_retries: u32, call_timeout: Duration) -> RetryPolicy {
    RetryPolicy {
        max_retries,
        base_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(4),
        call_timeout,
    }
}

fn indexer_config() -> IndexerConfig {
    IndexerConfig {
        retry: fast_retry(1, Duration::from_secs(5)),
        ..IndexerConfig::default()
    }
}

fn demo_files() -> Vec<SourceFile> {
    vec![
        SourceFile::new(
            "auth.py",
            "def login(user, password):\n    if check_password(user, password):\n        return session_for(user)\n    return None\n",
        ),
        SourceFile::new(
            "billing/invoice.py",
            "def total(items):\n    return sum(item.price for item in items)\n",
        ),
        SourceFile::new("README.md", "# Demo shop\n\nA tiny storefront.\n"),
    ]
}

struct Harness {
    store: Arc<InMemoryVectorStore>,
    embedder: Arc<MockEmbedder>,
    indexer: Indexer<MockEmbedder>,
    retriever: Arc<Retriever<MockEmbedder>>,
}

fn harness() -> Harness {
    let store = Arc::new(InMemoryVectorStore::new());
    let embedder = Arc::new(MockEmbedder::default());
    let indexer = Indexer::new(store.clone(), embedder.clone(), indexer_config()).unwrap();
    let retriever = Arc::new(Retriever::new(
        store.clone(),
        embedder.clone(),
        fast_retry(0, Duration::from_secs(5)),
    ));
    Harness {
        store,
        embedder,
        indexer,
        retriever,
    }
}

fn workflow(
    h: &Harness,
    provider: MockProvider,
    max_iterations: u32,
    max_retries: u32,
) -> ReviewWorkflow<MockProvider, MockEmbedder> {
    let gateway = Arc::new(ToolGateway::new(h.retriever.clone(), Duration::from_secs(5)));
    ReviewWorkflow::new(
        Arc::new(provider),
        gateway,
        ReviewConfig {
            max_iterations,
            retry: fast_retry(max_retries, Duration::from_millis(150)),
        },
    )
}

fn pr_payload() -> String {
    json!({
        "repository_identity": "demo",
        "pull_request_id": "42",
        "title": "Rename password variable",
        "description": "No behaviour change",
        "changed_files": [
            {"path": "auth.py", "diff": "-def login(user, pw):\n+def login(user, password):"}
        ]
    })
    .to_string()
}

async fn record_ids(store: &InMemoryVectorStore, collection: &str) -> Vec<String> {
    let mut ids: Vec<String> = store
        .scroll_payloads(collection)
        .await
        .unwrap()
        .into_iter()
        .map(|p| p.id)
        .collect();
    ids.sort();
    ids
}

#[tokio::test]
async fn repeated_ingest_leaves_collection_unchanged() {
    let h = harness();
    let first = h.indexer.ingest("demo", &demo_files(), false).await.unwrap();
    assert_eq!(first.files_indexed, 3);
    let before = record_ids(&h.store, "demo").await;
    let embed_calls = h.embedder.calls();

    let second = h.indexer.ingest("demo", &demo_files(), false).await.unwrap();
    assert!(second.already_present);
    assert_eq!(second.chunks_written, 0);
    assert_eq!(record_ids(&h.store, "demo").await, before);
    assert_eq!(h.embedder.calls(), embed_calls);
}

#[tokio::test]
async fn refresh_replaces_collection_contents() {
    let h = harness();
    h.indexer.ingest("demo", &demo_files(), false).await.unwrap();

    let updated = vec![SourceFile::new("auth.py", "def logout(user):\n    drop_session(user)\n")];
    let report = h.indexer.ingest("demo", &updated, true).await.unwrap();
    assert!(!report.already_present);
    assert_eq!(report.files_indexed, 1);

    let paths = h.retriever.list_paths("demo").await.unwrap();
    assert_eq!(paths, vec!["auth.py"]);
    assert_eq!(h.retriever.list_collections().await.unwrap(), vec!["demo"]);

    let id = record_id("demo", "auth.py", 0);
    let content = h.retriever.get_content(&id, Some("demo")).await.unwrap();
    assert!(content.text.contains("logout"));
}

#[test]
fn chunking_is_deterministic() {
    let content: String = (0..400)
        .map(|i| format!("fn item_{i}() -> usize {{ {i} }}\n"))
        .collect();
    let config = ChunkerConfig {
        max_chars: 1_000,
        overlap_chars: 100,
    };
    let a = chunk_file("src/items.rs", &content, &config);
    let b = chunk_file("src/items.rs", &content, &config);
    assert!(a.len() > 1);
    assert_eq!(a, b);
    for (i, chunk) in a.iter().enumerate() {
        assert_eq!(chunk.chunk_index, i);
        assert!(chunk.text.chars().count() <= config.max_chars);
        assert!(chunk.start_line <= chunk.end_line);
    }
}

#[tokio::test]
async fn search_orders_by_score_and_respects_limit() {
    let h = harness();
    h.indexer.ingest("demo", &demo_files(), false).await.unwrap();

    let hits = h.retriever.search("demo", "login password", 2).await.unwrap();
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].source_path, "auth.py");
    assert!(hits[0].score >= hits[1].score);

    assert!(h.retriever.search("demo", "login", 0).await.unwrap().is_empty());
    assert!(h.retriever.search("missing", "login", 5).await.is_err());
}

#[tokio::test]
async fn ingested_definitions_are_searchable() {
    let h = harness();
    h.indexer.ingest("acme/shop", &demo_files(), false).await.unwrap();

    let hits = h
        .retriever
        .search_by_symbol("acme/shop", "login", Some(SymbolKind::Function), 5)
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].match_kind, MatchKind::Exact);
    assert_eq!(hits[0].record.metadata.source_path, "auth.py");
    assert_eq!(hits[0].record.metadata.symbols[0].line, 1);

    let overview = h.retriever.overview("acme/shop").await.unwrap();
    assert_eq!(overview.symbol_count, 2);
    assert_eq!(overview.import_count, 0);
    assert!(
        h.retriever
            .search_by_import("acme/shop", "os", 5)
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn search_all_merges_collections() {
    let h = harness();
    h.indexer.ingest("demo", &demo_files(), false).await.unwrap();
    h.indexer
        .ingest(
            "other",
            &[SourceFile::new("session.py", "def session_for(user, password):\n    pass\n")],
            false,
        )
        .await
        .unwrap();

    let hits = h.retriever.search_all("session password", 2).await.unwrap();
    let collections: Vec<&str> = hits.iter().map(|h| h.collection.as_str()).collect();
    assert!(collections.contains(&"demo"));
    assert!(collections.contains(&"other"));
    assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
}

#[tokio::test]
async fn gateway_serves_ingested_repository() {
    let h = harness();
    h.indexer.ingest("demo", &demo_files(), false).await.unwrap();
    let gateway = ToolGateway::new(h.retriever.clone(), Duration::from_secs(5));

    let listed = gateway
        .dispatch(
            &ToolCall::new("1", "list_directories", json!({"collection_name": "demo"})),
            None,
        )
        .await;
    assert!(!listed.is_error);
    assert!(listed.content.contains("billing/invoice.py"));

    let searched = gateway
        .dispatch(
            &ToolCall::new("2", "search_vector_database", json!({"query": "login password"})),
            Some("demo"),
        )
        .await;
    assert!(!searched.is_error);
    assert!(searched.content.contains("auth.py"));

    let missing = gateway
        .dispatch(
            &ToolCall::new("3", "get_metadata_by_id", json!({"record_id": "nope"})),
            Some("demo"),
        )
        .await;
    assert!(missing.is_error);
}

#[tokio::test]
async fn loaded_checkout_ingests_and_persists() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("shop");
    std::fs::create_dir_all(root.join("src")).unwrap();
    std::fs::write(root.join("src/auth.py"), "def login(user, password):\n    pass\n").unwrap();
    std::fs::write(root.join("notes.txt"), "remember the milk\n").unwrap();

    let snapshot = load_repository(&root, Some("acme/shop"), 100 * 1024).unwrap();
    assert_eq!(snapshot.identity, "acme/shop");

    let h = harness();
    let report = h
        .indexer
        .ingest(&snapshot.identity, &snapshot.files, false)
        .await
        .unwrap();
    assert!(report.files_indexed >= 1);

    let snapshot_path = dir.path().join("state/index.json");
    h.store.save_snapshot(&snapshot_path).unwrap();
    let reloaded = InMemoryVectorStore::load_snapshot(&snapshot_path).unwrap();
    assert_eq!(
        record_ids(&reloaded, "acme/shop").await,
        record_ids(&h.store, "acme/shop").await
    );
}

#[tokio::test]
async fn review_approves_clean_change() {
    let h = harness();
    h.indexer.ingest("demo", &demo_files(), false).await.unwrap();
    let provider = MockProvider::with_responses(vec![APPROVE.into()]);
    let wf = workflow(&h, provider, 10, 2);

    let run = wf.run(&pr_payload(), &CancellationToken::new()).await;
    let verdict = run.verdict().expect("completed review");
    assert_eq!(verdict.recommendation, Recommendation::Approve);
    assert!(verdict.security_concerns.is_empty());
    assert_eq!(run.state.completed_nodes, vec![PARSE_NODE, AGENT_NODE]);
    assert_eq!(run.state.phase, WorkflowPhase::Done);
}

#[tokio::test]
async fn review_looks_up_related_code() {
    let h = harness();
    h.indexer.ingest("demo", &demo_files(), false).await.unwrap();
    let provider = MockProvider::with_script([
        MockReply::Respond(tool_call(
            "s1",
            "search_vector_database",
            json!({"query": "login password", "limit": 3}),
        )),
        MockReply::Respond(ChatResponse::Text(
            r#"```json
{"summary": "Login path reviewed", "findings": [{"file": "auth.py", "issues": ["rename is incomplete"]}], "security_concerns": [], "recommendation": "request_changes"}
```"#
                .into(),
        )),
    ]);
    let wf = workflow(&h, provider.clone(), 10, 0);

    let run = wf.run(&pr_payload(), &CancellationToken::new()).await;
    let verdict = run.verdict().expect("completed review");
    assert_eq!(verdict.recommendation, Recommendation::RequestChanges);
    assert_eq!(verdict.findings[0].file, "auth.py");

    let transcripts = provider.transcripts();
    let tool_reply = transcripts[1].last().unwrap();
    assert!(tool_reply.content.contains("auth.py"));
}

#[tokio::test]
async fn review_stops_at_iteration_limit() {
    let h = harness();
    h.indexer.ingest("demo", &demo_files(), false).await.unwrap();
    let provider = MockProvider::always(&MockReply::Respond(tool_call(
        "l",
        "list_directories",
        json!({"collection_name": "demo"}),
    )));
    let wf = workflow(&h, provider.clone(), 3, 2);

    let run = wf.run(&pr_payload(), &CancellationToken::new()).await;
    let verdict = run.verdict().expect("incomplete verdict");
    assert!(verdict.incomplete);
    assert_eq!(verdict.recommendation, Recommendation::NeedsDiscussion);
    assert_eq!(provider.calls(), 3);
    assert_eq!(run.state.iterations, 3);
}

#[tokio::test]
async fn review_fails_after_persistent_timeouts() {
    let h = harness();
    h.indexer.ingest("demo", &demo_files(), false).await.unwrap();
    let provider = MockProvider::always(&MockReply::Hang(5_000));
    let wf = workflow(&h, provider.clone(), 10, 2);

    let run = wf.run(&pr_payload(), &CancellationToken::new()).await;
    let ReviewOutcome::Failed(failure) = &run.outcome else {
        panic!("expected failure, got {:?}", run.outcome);
    };
    assert_eq!(failure.kind, ErrorKind::BackendTimeout);
    assert_eq!(failure.retries, 2);
    assert_eq!(failure.last_completed_node.as_deref(), Some(PARSE_NODE));
    assert_eq!(provider.calls(), 3);
    assert_eq!(run.state.phase, WorkflowPhase::Failed);

    let json = serde_json::to_value(&run).unwrap();
    assert_eq!(json["outcome"]["status"], "failed");
    assert_eq!(json["outcome"]["kind"], "backend_timeout");
}

#[tokio::test]
async fn review_accepts_github_payload() {
    let h = harness();
    h.indexer.ingest("acme/shop", &demo_files(), false).await.unwrap();
    let payload = json!({
        "repository": {"full_name": "acme/shop"},
        "pull_request": {"number": 7, "title": "Tidy", "body": "", "user": {"login": "dev"}},
        "files": [{"filename": "auth.py", "patch": "+# comment", "status": "modified"}]
    })
    .to_string();
    let wf = workflow(&h, MockProvider::with_responses(vec![APPROVE.into()]), 10, 0);

    let run = wf.run(&payload, &CancellationToken::new()).await;
    assert!(run.verdict().is_some(), "outcome: {:?}", run.outcome);
    assert_eq!(run.state.collection_name.as_deref(), Some("acme/shop"));
}
