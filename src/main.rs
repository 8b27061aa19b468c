mod config;

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use prism_index::{
    InMemoryVectorStore, Indexer, QdrantVectorStore, Retriever, SymbolKind, SymbolMatch,
    VectorStore, load_repository,
};
use prism_llm::openai::OpenAiProvider;
use prism_review::{ReviewOutcome, ReviewWorkflow};
use prism_tools::ToolGateway;
use tokio_util::sync::CancellationToken;

use crate::config::{Config, StoreBackend};

#[derive(Parser)]
#[command(name = "prism", version)]
#[command(about = "Index repositories and review pull requests with a tool-using agent", long_about = None)]
struct Cli {
    /// Path to config TOML
    #[arg(short, long, env = "PRISM_CONFIG", default_value = "prism.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Index a local repository checkout into a collection
    Ingest {
        /// Repository root
        path: PathBuf,
        /// Collection name (default: owner/repo from the origin remote)
        #[arg(long)]
        collection: Option<String>,
        /// Rebuild the collection even if it exists
        #[arg(long, default_value_t = false)]
        refresh: bool,
        /// Output JSON summary
        #[arg(long)]
        json: bool,
    },
    /// Semantic search over indexed code
    Search {
        /// Query text to embed and search
        query: String,
        /// Collection to search (default: all)
        #[arg(long)]
        collection: Option<String>,
        /// Number of results
        #[arg(short, long, default_value_t = 5)]
        limit: usize,
        /// Output JSON
        #[arg(long)]
        json: bool,
    },
    /// Find records that define a symbol
    Symbol {
        /// Symbol name; exact matches rank before substring matches
        name: String,
        /// Collection to search
        #[arg(long)]
        collection: String,
        /// Restrict to one kind: function, type, constant, or module
        #[arg(long)]
        kind: Option<SymbolKind>,
        /// Number of results
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
        /// Output JSON
        #[arg(long)]
        json: bool,
    },
    /// Find records whose imports mention a pattern
    Imports {
        pattern: String,
        #[arg(long)]
        collection: String,
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
        #[arg(long)]
        json: bool,
    },
    /// List indexed collections
    Collections {
        /// Include file, chunk, symbol, and language counts
        #[arg(long, default_value_t = false)]
        stats: bool,
    },
    /// Remove a collection
    Remove {
        collection: String,
    },
    /// Review a pull request payload (JSON file, or `-` for stdin)
    Review {
        payload: PathBuf,
    },
}

/// Vector store plus, for the in-memory backend, where to persist it.
struct Store {
    store: Arc<dyn VectorStore>,
    snapshot: Option<(Arc<InMemoryVectorStore>, PathBuf)>,
}

impl Store {
    fn open(config: &Config) -> anyhow::Result<Self> {
        match config.index.store {
            StoreBackend::Memory => {
                let memory = Arc::new(
                    InMemoryVectorStore::load_snapshot(&config.index.snapshot_path)
                        .context("failed to load index snapshot")?,
                );
                Ok(Self {
                    store: memory.clone(),
                    snapshot: Some((memory, config.index.snapshot_path.clone())),
                })
            }
            StoreBackend::Qdrant => {
                let qdrant = QdrantVectorStore::new(&config.index.qdrant_url)
                    .context("failed to connect to qdrant")?;
                Ok(Self {
                    store: Arc::new(qdrant),
                    snapshot: None,
                })
            }
        }
    }

    fn persist(&self) -> anyhow::Result<()> {
        if let Some((memory, path)) = &self.snapshot {
            memory
                .save_snapshot(path)
                .context("failed to save index snapshot")?;
            tracing::debug!(path = %path.display(), "index snapshot saved");
        }
        Ok(())
    }
}

fn provider(config: &Config, timeout_secs: u64) -> anyhow::Result<OpenAiProvider> {
    let api_key = config.llm.api_key.clone().unwrap_or_default();
    if api_key.is_empty() {
        tracing::warn!("no API key set (PRISM_LLM_API_KEY or OPENAI_API_KEY)");
    }
    OpenAiProvider::new(
        api_key,
        config.llm.base_url.clone(),
        config.llm.model.clone(),
        config.llm.max_tokens,
        Some(config.llm.embedding_model.clone()),
        Duration::from_secs(timeout_secs),
    )
    .context("failed to build LLM client")
}

fn init_subscriber() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_subscriber();
    let cli = Cli::parse();

    let config = Config::load(&cli.config)?;
    config.validate()?;

    match cli.command {
        Commands::Ingest {
            path,
            collection,
            refresh,
            json,
        } => run_ingest(&config, &path, collection.as_deref(), refresh, json).await,
        Commands::Search {
            query,
            collection,
            limit,
            json,
        } => run_search(&config, &query, collection.as_deref(), limit, json).await,
        Commands::Symbol {
            name,
            collection,
            kind,
            limit,
            json,
        } => run_symbol(&config, &collection, &name, kind, limit, json).await,
        Commands::Imports {
            pattern,
            collection,
            limit,
            json,
        } => run_imports(&config, &collection, &pattern, limit, json).await,
        Commands::Collections { stats } => run_collections(&config, stats).await,
        Commands::Remove { collection } => run_remove(&config, &collection).await,
        Commands::Review { payload } => run_review(&config, &payload).await,
    }
}

async fn run_ingest(
    config: &Config,
    path: &Path,
    collection: Option<&str>,
    refresh: bool,
    json: bool,
) -> anyhow::Result<()> {
    let store = Store::open(config)?;
    let embedder = Arc::new(provider(config, config.index.embed_timeout_secs)?);
    let indexer = Indexer::new(store.store.clone(), embedder, config.indexer())?;

    let root = path.to_owned();
    let max_file_bytes = config.index.max_file_bytes;
    let identity = collection.map(str::to_owned);
    let snapshot = tokio::task::spawn_blocking(move || {
        load_repository(&root, identity.as_deref(), max_file_bytes)
    })
    .await
    .context("repository walk panicked")??;
    tracing::info!(
        collection = %snapshot.identity,
        branch = snapshot.default_branch.as_deref().unwrap_or("unknown"),
        files = snapshot.files.len(),
        "repository loaded"
    );

    let report = indexer
        .ingest(&snapshot.identity, &snapshot.files, refresh)
        .await?;
    store.persist()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if report.already_present {
        println!(
            "{} already indexed; pass --refresh to rebuild",
            report.collection
        );
    } else {
        println!(
            "{}: {} files indexed, {} skipped, {} failed, {} chunks ({} ms)",
            report.collection,
            report.files_indexed,
            report.files_skipped,
            report.files_failed.len(),
            report.chunks_written,
            report.duration_ms
        );
        for failed in &report.files_failed {
            println!("  failed: {} ({})", failed.path, failed.error);
        }
    }
    Ok(())
}

async fn run_search(
    config: &Config,
    query: &str,
    collection: Option<&str>,
    limit: usize,
    json: bool,
) -> anyhow::Result<()> {
    let store = Store::open(config)?;
    let embedder = Arc::new(provider(config, config.index.embed_timeout_secs)?);
    let retriever = Retriever::new(store.store, embedder, config.embed_retry());

    let hits = match collection {
        Some(c) => retriever.search(c, query, limit).await?,
        None => {
            let mut hits = retriever.search_all(query, limit).await?;
            hits.truncate(limit);
            hits
        }
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&hits)?);
        return Ok(());
    }
    if hits.is_empty() {
        println!("no results");
    }
    for hit in &hits {
        println!(
            "{:.3}  {}:{}  {}-{}  [{}]",
            hit.score, hit.collection, hit.source_path, hit.start_line, hit.end_line, hit.record_id
        );
    }
    Ok(())
}

fn print_matches(matches: &[SymbolMatch], json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(matches)?);
        return Ok(());
    }
    if matches.is_empty() {
        println!("no results");
    }
    for m in matches {
        let meta = &m.record.metadata;
        let names: Vec<&str> = meta.symbols.iter().map(|s| s.name.as_str()).collect();
        println!(
            "{:<7}  {}  {}-{}  [{}]  {}",
            m.match_kind.as_str(),
            meta.source_path,
            meta.start_line,
            meta.end_line,
            meta.record_id,
            names.join(", ")
        );
    }
    Ok(())
}

async fn run_symbol(
    config: &Config,
    collection: &str,
    name: &str,
    kind: Option<SymbolKind>,
    limit: usize,
    json: bool,
) -> anyhow::Result<()> {
    let store = Store::open(config)?;
    let embedder = Arc::new(provider(config, config.index.embed_timeout_secs)?);
    let retriever = Retriever::new(store.store, embedder, config.embed_retry());
    let matches = retriever
        .search_by_symbol(collection, name, kind, limit)
        .await?;
    print_matches(&matches, json)
}

async fn run_imports(
    config: &Config,
    collection: &str,
    pattern: &str,
    limit: usize,
    json: bool,
) -> anyhow::Result<()> {
    let store = Store::open(config)?;
    let embedder = Arc::new(provider(config, config.index.embed_timeout_secs)?);
    let retriever = Retriever::new(store.store, embedder, config.embed_retry());
    let matches = retriever.search_by_import(collection, pattern, limit).await?;
    print_matches(&matches, json)
}

async fn run_collections(config: &Config, stats: bool) -> anyhow::Result<()> {
    let store = Store::open(config)?;
    let embedder = Arc::new(provider(config, config.index.embed_timeout_secs)?);
    let retriever = Retriever::new(store.store, embedder, config.embed_retry());

    for name in retriever.list_collections().await? {
        if !stats {
            println!("{name}");
            continue;
        }
        let overview = retriever.overview(&name).await?;
        let languages: Vec<String> = overview
            .languages
            .iter()
            .map(|(lang, n)| format!("{lang}={n}"))
            .collect();
        println!(
            "{name}: {} files, {} chunks, {} symbols, {} imports [{}]",
            overview.file_count,
            overview.chunk_count,
            overview.symbol_count,
            overview.import_count,
            languages.join(", ")
        );
    }
    Ok(())
}

async fn run_remove(config: &Config, collection: &str) -> anyhow::Result<()> {
    let store = Store::open(config)?;
    let embedder = Arc::new(provider(config, config.index.embed_timeout_secs)?);
    let indexer = Indexer::new(store.store.clone(), embedder, config.indexer())?;
    indexer.remove_collection(collection).await?;
    store.persist()?;
    println!("removed {collection}");
    Ok(())
}

async fn run_review(config: &Config, payload: &Path) -> anyhow::Result<()> {
    let pr_data = if payload.as_os_str() == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("failed to read payload from stdin")?;
        buf
    } else {
        std::fs::read_to_string(payload)
            .with_context(|| format!("failed to read {}", payload.display()))?
    };

    let store = Store::open(config)?;
    let embedder = Arc::new(provider(config, config.index.embed_timeout_secs)?);
    let retriever = Arc::new(Retriever::new(store.store, embedder, config.embed_retry()));
    let gateway = Arc::new(ToolGateway::new(retriever, config.tool_timeout()));
    let llm = Arc::new(provider(config, config.review.llm_timeout_secs)?);
    let workflow = ReviewWorkflow::new(llm, gateway, config.review_config());

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, stopping after the current step");
            on_signal.cancel();
        }
    });

    let run = workflow.run(&pr_data, &cancel).await;
    println!("{}", serde_json::to_string_pretty(&run)?);
    if let ReviewOutcome::Failed(failure) = &run.outcome {
        bail!("review failed ({}): {}", failure.kind, failure.message);
    }
    Ok(())
}
