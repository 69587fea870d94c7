//! # corpus-chat CLI
//!
//! The `corpus-chat` binary serves the chat API and offers a few commands
//! for checking retrieval and answers from the terminal.
//!
//! ## Usage
//!
//! ```bash
//! corpus-chat --config ./config/chat.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `corpus-chat init` | Create the SQLite schema (SQLite backend only) |
//! | `corpus-chat serve` | Start the HTTP server |
//! | `corpus-chat ask "<question>"` | Run the full pipeline and print answer and sources |
//! | `corpus-chat retrieve "<question>"` | Print the assembled context without calling the model |
//! | `corpus-chat completions <shell>` | Print shell completions |
//!
//! ## Examples
//!
//! ```bash
//! # Compare what each policy would hand to the model
//! corpus-chat retrieve "la mystique et la politique" --policy keyword
//! corpus-chat retrieve "la mystique et la politique" --policy vector
//!
//! # Verbose pipeline logs
//! RUST_LOG=corpus_chat=debug,corpus_chat_core=debug corpus-chat ask "Chi era Péguy?"
//! ```

use clap::{CommandFactory, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use corpus_chat::config::{self, StoreBackend};
use corpus_chat::{db, migrate, server, service};
use corpus_chat_core::context::assemble;
use corpus_chat_core::retrieve::{RetrievalPolicy, Retriever};

/// Retrieval-grounded chatbot backend for a single author's works.
///
/// All commands except `completions` read a TOML configuration file.
/// See `config/chat.example.toml` for a full example.
#[derive(Parser)]
#[command(name = "corpus-chat", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/chat.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the SQLite schema.
    ///
    /// Creates the database file and the documents, chunks and chat_stats
    /// tables. Running it again is safe.
    Init,

    /// Start the HTTP server.
    Serve,

    /// Answer a question through the full pipeline.
    Ask {
        question: String,
    },

    /// Show the context a question would produce, without generating.
    Retrieve {
        question: String,

        /// Override `[retrieval].policy`: `keyword`, `bulk`, or `vector`.
        #[arg(long)]
        policy: Option<RetrievalPolicy>,
    },

    /// Generate shell completions.
    Completions {
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Commands::Completions { shell } = cli.command {
        clap_complete::generate(
            shell,
            &mut Cli::command(),
            "corpus-chat",
            &mut std::io::stdout(),
        );
        return Ok(());
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => match (&cfg.store.backend, &cfg.store.sqlite) {
            (StoreBackend::Sqlite, Some(sqlite)) => {
                let pool = db::connect(&sqlite.path).await?;
                migrate::run_migrations(&pool).await?;
                pool.close().await;
                println!("Database initialized successfully.");
            }
            _ => {
                println!("Nothing to initialize: the Supabase schema is managed in the Supabase project.");
            }
        },
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Ask { question } => {
            let pipeline = service::build_pipeline(&cfg).await?;
            let response = pipeline.answer(&question).await?;

            println!("{}", response.answer);
            if !response.sources.is_empty() {
                println!();
                println!("Sources:");
                for (i, source) in response.sources.iter().enumerate() {
                    match source.similarity {
                        Some(sim) => println!("  [{}] {} ({:.2})", i + 1, source.title, sim),
                        None => println!("  [{}] {}", i + 1, source.title),
                    }
                }
            }
        }
        Commands::Retrieve { question, policy } => {
            let store = service::build_store(&cfg).await?;
            let retriever = service::build_retriever(&cfg, store, policy)?;
            let result = retriever.retrieve(question.trim()).await?;

            println!(
                "policy: {}  chunks: {}  path: {:?}",
                retriever.policy(),
                result.len(),
                result.path
            );
            if result.is_empty() {
                println!("No results.");
            } else {
                println!();
                println!("{}", assemble(&result.chunks, &cfg.context.style()));
            }
        }
        Commands::Completions { .. } => {}
    }

    Ok(())
}
