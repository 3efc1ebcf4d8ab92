use anyhow::Context;
use chrono::Utc;
use clap::{ArgGroup, Parser, ValueEnum};
use doc_qa_core::{
    ingest_tree, Answer, CharacterNgramEmbedder, ChatTurn, CollectionPolicy, Embedder,
    IngestionOptions, LoaderRegistry, OpenAiChat, OpenAiConfig, OpenAiEmbedder, PgVectorConfig,
    PgVectorStore, QdrantStore, RagCoordinator, RetrievedChunk, SearchQuery, VectorIndex,
    WalkErrorPolicy, DEFAULT_CHAT_MODEL, DEFAULT_COLLECTION, DEFAULT_EMBEDDING_DIMENSIONS,
    DEFAULT_EMBEDDING_MODEL, DEFAULT_OPENAI_BASE_URL, DEFAULT_QDRANT_URL, DEFAULT_TOP_K,
};
use std::collections::BTreeSet;
use std::io::Write;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const SEPARATOR_WIDTH: usize = 80;

type Coordinator = RagCoordinator<Box<dyn Embedder>, Box<dyn VectorIndex>>;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StoreKind {
    Pgvector,
    Qdrant,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum EmbedderKind {
    Openai,
    Ngram,
}

#[derive(Parser)]
#[command(
    name = "doc-qa",
    version,
    about = "Index a document tree into a vector store and ask questions about it"
)]
#[command(group(
    ArgGroup::new("mode")
        .required(true)
        .args(["index", "query", "interactive"])
))]
struct Cli {
    /// Walk the root directory and (re)index every accepted file.
    #[arg(long)]
    index: bool,

    /// Question to answer from the indexed collection.
    query: Option<String>,

    /// Read questions from stdin, one per line, keeping the conversation.
    #[arg(long)]
    interactive: bool,

    /// Directory tree to index.
    #[arg(long, env = "DOC_QA_ROOT", default_value = "/repository")]
    root: PathBuf,

    /// Only load files with these extensions, e.g. `.md,.py`.
    #[arg(long, value_delimiter = ',')]
    extensions: Vec<String>,

    /// Maximum characters per chunk.
    #[arg(long, default_value_t = 1000)]
    chunk_size: usize,

    /// Characters shared by consecutive chunks.
    #[arg(long, default_value_t = 0)]
    chunk_overlap: usize,

    /// Skip directories that cannot be read instead of aborting the run.
    #[arg(long, default_value_t = false)]
    skip_unreadable_dirs: bool,

    /// Drop the collection before indexing.
    #[arg(long, default_value_t = false)]
    pre_delete_collection: bool,

    #[arg(long, value_enum, default_value_t = StoreKind::Pgvector)]
    store: StoreKind,

    #[arg(long, value_enum, default_value_t = EmbedderKind::Openai)]
    embedder: EmbedderKind,

    /// Bucket count for the offline n-gram embedder.
    #[arg(long, default_value_t = DEFAULT_EMBEDDING_DIMENSIONS)]
    ngram_dimensions: usize,

    /// Number of chunks retrieved per question.
    #[arg(short = 'k', long, default_value_t = DEFAULT_TOP_K)]
    top_k: usize,

    /// Print the retrieved chunks with their scores and skip the answer.
    #[arg(long, default_value_t = false)]
    no_answer: bool,

    #[arg(long, env = "PGVECTOR_COLLECTION", default_value = DEFAULT_COLLECTION)]
    collection: String,

    #[arg(long, env = "PGVECTOR_HOST", default_value = "localhost")]
    pg_host: String,

    #[arg(long, env = "PGVECTOR_PORT", default_value_t = 5432)]
    pg_port: u16,

    #[arg(long, env = "PGVECTOR_DATABASE", default_value = "postgres")]
    pg_database: String,

    #[arg(long, env = "PGVECTOR_USER", default_value = "postgres")]
    pg_user: String,

    #[arg(long, env = "PGVECTOR_PASSWORD", default_value = "postgres", hide_env_values = true)]
    pg_password: String,

    /// Qdrant base URL
    #[arg(long, env = "QDRANT_URL", default_value = DEFAULT_QDRANT_URL)]
    qdrant_url: String,

    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    openai_api_key: Option<String>,

    #[arg(long, env = "OPENAI_BASE_URL", default_value = DEFAULT_OPENAI_BASE_URL)]
    openai_base_url: String,

    #[arg(long, env = "OPENAI_MODEL", default_value = DEFAULT_CHAT_MODEL)]
    openai_model: String,

    #[arg(long, env = "OPENAI_EMBEDDING_MODEL", default_value = DEFAULT_EMBEDDING_MODEL)]
    openai_embedding_model: String,
}

impl Cli {
    fn ingestion_options(&self) -> IngestionOptions {
        let extensions = self
            .extensions
            .iter()
            .map(|extension| extension.trim())
            .filter(|extension| !extension.is_empty())
            .map(|extension| {
                if extension.starts_with('.') {
                    extension.to_string()
                } else {
                    format!(".{extension}")
                }
            })
            .collect::<BTreeSet<_>>();

        IngestionOptions {
            chunk_max_chars: self.chunk_size,
            chunk_overlap_chars: self.chunk_overlap,
            allowed_extensions: (!extensions.is_empty()).then_some(extensions),
            walk_errors: if self.skip_unreadable_dirs {
                WalkErrorPolicy::Skip
            } else {
                WalkErrorPolicy::Fail
            },
        }
    }

    fn openai_config(&self) -> OpenAiConfig {
        OpenAiConfig {
            api_key: self.openai_api_key.clone(),
            base_url: self.openai_base_url.clone(),
            chat_model: self.openai_model.clone(),
            embedding_model: self.openai_embedding_model.clone(),
            ..OpenAiConfig::default()
        }
    }

    fn pg_config(&self) -> PgVectorConfig {
        PgVectorConfig {
            host: self.pg_host.clone(),
            port: self.pg_port,
            database: self.pg_database.clone(),
            user: self.pg_user.clone(),
            password: self.pg_password.clone(),
        }
    }

    fn build_embedder(&self) -> Box<dyn Embedder> {
        match self.embedder {
            EmbedderKind::Openai => {
                if self.openai_api_key.is_none() {
                    warn!("OPENAI_API_KEY is not set; requests go out unauthenticated");
                }
                Box::new(OpenAiEmbedder::new(self.openai_config()))
            }
            EmbedderKind::Ngram => Box::new(CharacterNgramEmbedder {
                dimensions: self.ngram_dimensions,
            }),
        }
    }

    async fn build_store(&self, dimensions: usize) -> anyhow::Result<Box<dyn VectorIndex>> {
        let store: Box<dyn VectorIndex> = match self.store {
            StoreKind::Pgvector => Box::new(
                PgVectorStore::connect(&self.pg_config(), &self.collection)
                    .await
                    .context("failed to connect to pgvector")?,
            ),
            StoreKind::Qdrant => Box::new(QdrantStore::new(
                &self.qdrant_url,
                &self.collection,
                dimensions,
            )?),
        };
        Ok(store)
    }
}

fn print_answer(answer: &Answer) {
    println!("{}", answer.text);
    println!("{}", "-".repeat(SEPARATOR_WIDTH));
    println!("\nSources:");
    for source in &answer.sources {
        println!("  - {}", source.source().unwrap_or("<unknown>"));
    }
}

fn print_scored(chunks: &[RetrievedChunk]) {
    for chunk in chunks {
        println!("{}", "-".repeat(SEPARATOR_WIDTH));
        println!("Score: {:.4}", chunk.score);
        println!("{}", chunk.text);
        println!("{}", "-".repeat(SEPARATOR_WIDTH));
    }
}

async fn run_index(cli: &Cli, coordinator: &Coordinator) -> anyhow::Result<()> {
    let registry = LoaderRegistry::default();
    let report = ingest_tree(&cli.root, &cli.ingestion_options(), &registry)
        .with_context(|| format!("failed to load documents from {}", cli.root.display()))?;
    println!("Docs loaded");

    for skipped in &report.skipped_files {
        warn!(
            path = %skipped.path.display(),
            loader = skipped.loader,
            reason = %skipped.reason,
            "skipped file"
        );
    }

    let policy = if cli.pre_delete_collection {
        CollectionPolicy::Recreate
    } else {
        CollectionPolicy::Upsert
    };
    let summary = coordinator.index(&report.chunks, policy).await?;

    info!(
        collection = %summary.collection,
        chunk_count = summary.chunks,
        documents = report.documents,
        files_seen = report.files_seen,
        elapsed_ms = (summary.finished_at - summary.started_at).num_milliseconds(),
        "index run finished"
    );
    println!("Indexing complete.");
    Ok(())
}

async fn run_query(
    cli: &Cli,
    coordinator: &Coordinator,
    question: &str,
    history: &[ChatTurn],
) -> anyhow::Result<Option<Answer>> {
    let query = SearchQuery::new(question, cli.top_k);
    if cli.no_answer {
        print_scored(&coordinator.retrieve(&query).await?);
        return Ok(None);
    }

    let generator = OpenAiChat::new(cli.openai_config());
    let answer = coordinator.ask(&query, history, &generator).await?;
    print_answer(&answer);
    Ok(Some(answer))
}

async fn run_interactive(cli: &Cli, coordinator: &Coordinator) -> anyhow::Result<()> {
    let mut history: Vec<ChatTurn> = Vec::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let question = line.trim();
        if question.is_empty() {
            continue;
        }

        match run_query(cli, coordinator, question, &history).await {
            Ok(Some(answer)) => history.push(ChatTurn {
                question: question.to_string(),
                answer: answer.text,
            }),
            Ok(None) => {}
            Err(error) => warn!(%error, "query failed"),
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        "doc-qa boot"
    );

    let embedder = cli.build_embedder();
    let store = cli.build_store(embedder.dimensions()).await?;
    let coordinator = RagCoordinator::new(embedder, store);

    if cli.index {
        run_index(&cli, &coordinator).await
    } else if cli.interactive {
        run_interactive(&cli, &coordinator).await
    } else if let Some(question) = cli.query.as_deref() {
        run_query(&cli, &coordinator, question, &[]).await.map(|_| ())
    } else {
        anyhow::bail!("either --index, --interactive or a query is required")
    }
}
