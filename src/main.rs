//! # Adaptive RAG CLI (`arag`)
//!
//! ## Usage
//!
//! ```bash
//! arag --config ./config/arag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `arag serve` | Start the HTTP server |
//! | `arag init` | Create the SQLite index schema |
//! | `arag ingest <FILES>...` | Extract and index local files |
//! | `arag ask "<question>"` | Route and answer one question |
//! | `arag search "<question>"` | Hybrid retrieval only |
//! | `arag stats` | Index record and document counts |
//! | `arag clear` | Remove every indexed record |
//! | `arag completions <shell>` | Print shell completions |
//!
//! With the `memory` store backend every command starts from an empty
//! index; use `store.backend = "sqlite"` to keep the index between runs.

use std::io;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use tracing_subscriber::EnvFilter;

use adaptive_rag::config::{load_config, Config};
use adaptive_rag::ingest::UploadedFile;
use adaptive_rag::server;
use adaptive_rag::service::RagService;
use adaptive_rag::sqlite_store::SqliteStore;

/// Adaptive RAG: intent-routed question answering over uploaded documents.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/arag.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "arag",
    about = "Adaptive RAG: intent-routed question answering over your documents",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/arag.toml")]
    config: PathBuf,

    /// Emit logs as JSON lines instead of human-readable text.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server on `[server].bind`.
    Serve,

    /// Initialize the SQLite index schema. Idempotent.
    Init,

    /// Extract and index local files.
    Ingest {
        /// Files to ingest (.pdf, .doc, .docx, .pptx, .txt, .csv, .png, .jpg, .jpeg).
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Route and answer a single question.
    Ask {
        question: String,
    },

    /// Run hybrid retrieval only and print the ranked chunks.
    Search {
        question: String,

        /// Number of results (defaults to `[retrieval].top_k`).
        #[arg(long)]
        k: Option<usize>,
    },

    /// Show index statistics.
    Stats,

    /// Remove every indexed record and document.
    Clear,

    /// Generate shell completions.
    Completions {
        shell: Shell,
    },
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Commands that don't require config
    if let Commands::Completions { shell } = cli.command {
        clap_complete::generate(shell, &mut Cli::command(), "arag", &mut io::stdout());
        return Ok(());
    }

    init_tracing(cli.log_json);
    let cfg = load_config(&cli.config)?;

    match cli.command {
        Commands::Serve => server::run_server(&cfg).await?,
        Commands::Init => init(&cfg).await?,
        Commands::Ingest { files } => {
            let service = RagService::from_config(&cfg).await?;
            let result = ingest(&service, &files).await;
            service.shutdown().await;
            result?;
        }
        Commands::Ask { question } => {
            let service = RagService::from_config(&cfg).await?;
            let response = service.query("cli", &question).await?;
            println!("{}\n", response.answer);
            println!("method: {}", response.method.as_str());
            for source in &response.sources {
                let label = source
                    .file_name
                    .as_deref()
                    .or(source.title.as_deref())
                    .unwrap_or("unknown");
                match &source.url {
                    Some(url) => println!("  - {} <{}>", label, url),
                    None => println!("  - {}", label),
                }
            }
            service.shutdown().await;
        }
        Commands::Search { question, k } => {
            let service = RagService::from_config(&cfg).await?;
            let results = service.search(&question, k).await?;
            if results.is_empty() {
                println!("No results.");
            }
            for (i, r) in results.iter().enumerate() {
                println!(
                    "{}. [{:.3}] {} #{}\n   {}",
                    i + 1,
                    r.score,
                    r.source_label,
                    r.ordinal,
                    r.preview_text.replace('\n', " ")
                );
            }
            service.shutdown().await;
        }
        Commands::Stats => {
            let service = RagService::from_config(&cfg).await?;
            let stats = service.stats().await?;
            println!("records:   {}", stats.total_vector_count);
            println!("documents: {}", stats.document_count);
            println!("dimension: {}", stats.dimension);
            service.shutdown().await;
        }
        Commands::Clear => {
            let service = RagService::from_config(&cfg).await?;
            service.clear().await?;
            println!("Index cleared.");
            service.shutdown().await;
        }
        Commands::Completions { .. } => {}
    }

    Ok(())
}

async fn init(cfg: &Config) -> anyhow::Result<()> {
    match (cfg.store.backend.as_str(), &cfg.store.path) {
        ("sqlite", Some(path)) => {
            let store = SqliteStore::open(path).await?;
            store.close().await;
            println!("Index initialized at {}", path.display());
        }
        _ => println!("Memory backend: nothing to initialize."),
    }
    Ok(())
}

async fn ingest(service: &RagService, paths: &[PathBuf]) -> anyhow::Result<()> {
    let mut files = Vec::with_capacity(paths.len());
    for path in paths {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        files.push(UploadedFile {
            file_name: display_name(path),
            bytes,
        });
    }

    let report = service.upload(files).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    if !report.success {
        bail!(
            "{}",
            report.error.as_deref().unwrap_or("no files were fully ingested")
        );
    }
    Ok(())
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
