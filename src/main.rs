//! # Helpdesk Agent CLI (`hdx`)
//!
//! ## Usage
//!
//! ```bash
//! hdx --config ./config/hdx.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `hdx init` | Create the database schema and the vector collection |
//! | `hdx kb add` | Add a knowledge-base article |
//! | `hdx kb list` | List articles |
//! | `hdx kb publish <id>` | Publish an article and index it |
//! | `hdx kb unpublish <id>` | Return an article to draft and drop its index |
//! | `hdx kb edit <id>` | Change an article's text, reindexing it when published |
//! | `hdx kb remove <id>` | Drop an article's index, then the article |
//! | `hdx index <id>` / `hdx unindex <id>` | Rebuild or remove one article's index |
//! | `hdx reindex` | Rebuild the index of every published article |
//! | `hdx search "<query>"` | Query the knowledge base |
//! | `hdx status` | Counts and vector collection health |
//! | `hdx conversation new` | Open a conversation for a new client |
//! | `hdx chat` | Send a customer message to an agent |

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use helpdesk_agent::bootstrap::Services;
use helpdesk_agent::config::{self, LoggingConfig};
use helpdesk_agent::kb::{DocumentStatus, NewDocument};
use helpdesk_agent::lifecycle::{self, DocumentEdit};
use helpdesk_agent::migrate;
use helpdesk_agent::orchestrator::RunState;
use helpdesk_agent::progress::report_stderr;
use helpdesk_agent::queue::{IndexJob, IndexQueue, JobResult};
use helpdesk_agent::status;

/// Helpdesk Agent CLI: knowledge-base indexing and a tool-calling support
/// agent.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/hdx.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "hdx",
    about = "Helpdesk Agent: a retrieval-augmented, tool-calling support agent",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/hdx.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema and the vector collection.
    ///
    /// Idempotent. The collection is only created when embeddings are
    /// enabled.
    Init,

    /// Manage knowledge-base articles.
    Kb {
        #[command(subcommand)]
        action: KbAction,
    },

    /// Rebuild the index of one article.
    Index { id: String },

    /// Remove one article from the index.
    Unindex { id: String },

    /// Rebuild the index of every published article.
    ///
    /// Failures of single articles are counted, not fatal. Progress is
    /// reported on stderr.
    Reindex,

    /// Search the knowledge base.
    Search {
        query: String,

        /// Maximum number of chunks to return.
        #[arg(long)]
        limit: Option<usize>,

        /// Minimum cosine similarity.
        #[arg(long)]
        threshold: Option<f32>,
    },

    /// Show database and vector index status.
    Status,

    /// Manage conversations.
    Conversation {
        #[command(subcommand)]
        action: ConversationAction,
    },

    /// Send a customer message to an agent and print the reply.
    Chat {
        /// Agent profile name (`[agents.<name>]`).
        #[arg(long)]
        agent: String,

        /// Conversation id.
        #[arg(long)]
        conversation: String,

        message: String,
    },
}

#[derive(Subcommand)]
enum KbAction {
    /// Add an article. Published articles are indexed right away.
    Add {
        #[arg(long)]
        title: String,

        #[arg(long, default_value = "")]
        excerpt: String,

        /// File holding the article body (plain text or HTML).
        #[arg(long)]
        body_file: Option<PathBuf>,

        /// `draft`, `published` or `archived`.
        #[arg(long, default_value = "draft")]
        status: String,
    },

    /// List articles.
    List {
        #[arg(long)]
        status: Option<String>,
    },

    Publish { id: String },

    Unpublish { id: String },

    /// Change an article's text. Published articles are reindexed.
    Edit {
        id: String,

        #[arg(long)]
        title: Option<String>,

        #[arg(long)]
        excerpt: Option<String>,

        #[arg(long)]
        body_file: Option<PathBuf>,
    },

    /// Delete an article and its index.
    Remove { id: String },
}

#[derive(Subcommand)]
enum ConversationAction {
    /// Create a client and open a conversation for it.
    New {
        #[arg(long)]
        name: String,

        #[arg(long, default_value = "en")]
        language: String,

        #[arg(long, default_value = "cli")]
        channel: String,

        #[arg(long)]
        department: Option<String>,
    },
}

fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    let _ = match logging.format.as_str() {
        "json" => builder.json().try_init(),
        "pretty" => builder.pretty().try_init(),
        _ => builder.compact().try_init(),
    };
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    init_tracing(&cfg.logging);

    if let Commands::Init = cli.command {
        migrate::run_migrations(&cfg).await?;
        let services = Services::open(cfg).await?;
        if services.config.embedding.is_enabled() {
            services.indexer.ensure_collection().await?;
            println!(
                "Database and collection '{}' initialized.",
                services.config.vector_index.collection
            );
        } else {
            println!("Database initialized. Embeddings are disabled, no collection created.");
        }
        return Ok(());
    }

    let services = Services::open(cfg).await?;

    match cli.command {
        Commands::Init => {}
        Commands::Kb { action } => run_kb(&services, action).await?,
        Commands::Index { id } => run_one(&services, IndexJob::Index(id)).await?,
        Commands::Unindex { id } => run_one(&services, IndexJob::Delete(id)).await?,
        Commands::Reindex => {
            let queue = services.start_queue();
            let handle = queue.submit(IndexJob::ReindexAll).await?;

            let indexer = services.indexer.clone();
            let ticker = tokio::spawn(async move {
                loop {
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    let progress = indexer.progress();
                    if progress.running {
                        report_stderr(&progress);
                    }
                }
            });
            let result = handle.wait().await;
            ticker.abort();
            queue.shutdown().await;
            print_job_result(result?);
        }
        Commands::Search {
            query,
            limit,
            threshold,
        } => {
            let Some(retriever) = &services.retriever else {
                bail!("search requires embeddings; set [embedding] provider in the config");
            };
            let settings = retriever.settings();
            let results = retriever
                .search(
                    &query,
                    limit.unwrap_or(settings.limit),
                    threshold.unwrap_or(settings.score_threshold),
                )
                .await?;
            if results.is_empty() {
                println!("No results.");
            }
            for (rank, r) in results.iter().enumerate() {
                println!(
                    "{}. [{:.3}] {} (chunk {})",
                    rank + 1,
                    r.score,
                    r.payload.document_title,
                    r.payload.chunk_index
                );
                println!("   id: {}", r.payload.document_id);
                println!("   {}", snippet(&r.payload.chunk_content, 160));
            }
        }
        Commands::Status => {
            let report = status::collect(&services).await?;
            print!("{}", report.render());
        }
        Commands::Conversation { action } => match action {
            ConversationAction::New {
                name,
                language,
                channel,
                department,
            } => {
                let client = services.support.create_client(&name, &language).await?;
                let conversation = services
                    .support
                    .create_conversation(&client.id, &channel, department.as_deref())
                    .await?;
                println!("client:       {}", client.id);
                println!("conversation: {}", conversation.id);
            }
        },
        Commands::Chat {
            agent,
            conversation,
            message,
        } => {
            let agent = services.agent(&agent)?;
            let outcome = agent.handle_message(&conversation, &message).await?;
            match (&outcome.state, &outcome.reply) {
                (_, Some(reply)) => println!("{}", reply),
                (RunState::Stopped, None) => println!("(conversation handed over)"),
                (RunState::IterationLimit, None) => println!("(no reply: iteration limit reached)"),
                (RunState::Completed, None) => println!("(no reply)"),
            }
            eprintln!(
                "model calls: {}, tool calls: {}",
                outcome.model_calls, outcome.tool_calls
            );
        }
    }

    services.pool.close().await;
    Ok(())
}

async fn run_kb(services: &Services, action: KbAction) -> Result<()> {
    match action {
        KbAction::Add {
            title,
            excerpt,
            body_file,
            status,
        } => {
            let status: DocumentStatus = status.parse()?;
            let body = body_file.map(read_body).transpose()?.unwrap_or_default();
            let doc = services
                .kb
                .create(NewDocument {
                    title,
                    excerpt,
                    body,
                    status,
                })
                .await?;
            println!("{}", doc.id);
            if doc.is_published() {
                run_one(services, IndexJob::Index(doc.id)).await?;
            }
        }
        KbAction::List { status } => {
            let status = status.map(|s| s.parse::<DocumentStatus>()).transpose()?;
            for doc in services.kb.list(status).await? {
                println!("{}  {:<9}  {}", doc.id, doc.status.as_str(), doc.title);
            }
        }
        KbAction::Publish { id } => {
            if !services.kb.set_status(&id, DocumentStatus::Published).await? {
                bail!("document {} not found", id);
            }
            run_one(services, IndexJob::Index(id)).await?;
        }
        KbAction::Unpublish { id } => {
            if !services.kb.set_status(&id, DocumentStatus::Draft).await? {
                bail!("document {} not found", id);
            }
            run_one(services, IndexJob::Delete(id)).await?;
        }
        KbAction::Edit {
            id,
            title,
            excerpt,
            body_file,
        } => {
            let edit = DocumentEdit {
                title,
                excerpt,
                body: body_file.map(read_body).transpose()?,
            };
            let queue = services.start_queue();
            let result = match lifecycle::edit_document(&services.kb, &queue, &id, edit).await {
                Ok(Some(handle)) => handle.wait().await.map(Some).map_err(anyhow::Error::from),
                Ok(None) => Ok(None),
                Err(e) => Err(e),
            };
            queue.shutdown().await;
            match result? {
                Some(job) => print_job_result(job),
                None => println!("Document updated."),
            }
        }
        KbAction::Remove { id } => {
            let queue = services.start_queue();
            let result = lifecycle::remove_document(&services.kb, &queue, &id).await;
            queue.shutdown().await;
            result?;
            println!("Document removed.");
        }
    }
    Ok(())
}

fn read_body(path: PathBuf) -> Result<String> {
    std::fs::read_to_string(&path).with_context(|| format!("Failed to read {}", path.display()))
}

async fn run_one(services: &Services, job: IndexJob) -> Result<()> {
    let queue = services.start_queue();
    let result = run_job(&queue, job).await;
    queue.shutdown().await;
    print_job_result(result?);
    Ok(())
}

async fn run_job(queue: &IndexQueue, job: IndexJob) -> Result<JobResult> {
    Ok(queue.submit(job).await?.wait().await?)
}

fn print_job_result(result: JobResult) {
    use helpdesk_agent::indexer::IndexOutcome;
    match result {
        JobResult::Indexed(IndexOutcome::Indexed { chunks, .. }) => {
            println!("Indexed {} chunks.", chunks)
        }
        JobResult::Indexed(IndexOutcome::Cleared) => println!("Document is empty, index cleared."),
        JobResult::Indexed(IndexOutcome::Skipped { status }) => {
            println!("Document is {}, not indexed.", status)
        }
        JobResult::Indexed(IndexOutcome::NotFound) => println!("Document not found."),
        JobResult::Deleted => println!("Index removed."),
        JobResult::Reindexed(progress) => println!("{}", progress.render()),
    }
}

fn snippet(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let cut: String = flat.chars().take(max_chars).collect();
    format!("{}...", cut.trim_end())
}
