//! # Prep CLI (`prep`)
//!
//! The `prep` binary ingests course materials, answers questions from them
//! with faithfulness verification, and serves the same operations over HTTP.
//!
//! ## Usage
//!
//! ```bash
//! prep --config ./config/prep.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `prep init` | Create the SQLite database and run schema migrations |
//! | `prep ingest <path>` | Ingest a file or directory of materials |
//! | `prep materials list\|delete` | Inspect or remove materials |
//! | `prep ask "<question>"` | Answer a question |
//! | `prep chat new\|list\|history\|rename` | Manage chat sessions |
//! | `prep logs show\|recent` | Inspect query logs |
//! | `prep source <chunk_id>` | Print a cited chunk |
//! | `prep index rebuild\|reset` | Maintain the vector index |
//! | `prep eval citations\|recall` | Offline quality metrics |
//! | `prep serve` | Start the HTTP server |
//!
//! ## Examples
//!
//! ```bash
//! prep init
//! prep ingest ./materials/Lecture_05_RNN.pdf --type lecture --course CS231
//! prep ask "What problem do LSTMs solve?" --lecture 5
//! prep chat new --title "RNN revision"
//! prep ask "And GRUs?" --session <id>
//! prep serve
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use prep_rag::ask::{self, AskRequest};
use prep_rag::config;
use prep_rag::ingest::{self, MaterialInput};
use prep_rag::models::QueryFilters;
use prep_rag::services::Services;
use prep_rag::{admin, chat, evaluate, logging, logs, migrate, server, source};

/// Prep: grounded question answering over course materials.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/prep.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "prep",
    about = "Grounded question answering over course materials, with faithfulness verification",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/prep.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Idempotent.
    Init,

    /// Ingest a file (.txt, .md, .pdf, .docx) or every supported file in a
    /// directory.
    Ingest {
        path: PathBuf,

        /// Material type (lecture, textbook, assignment, notes, ...).
        #[arg(long = "type", default_value = "lecture")]
        material_type: String,

        /// Title used in citations. Defaults to the filename.
        #[arg(long)]
        title: Option<String>,

        #[arg(long)]
        course: Option<String>,

        /// Overrides the number inferred from `Lecture_NN` in the filename.
        #[arg(long)]
        lecture: Option<i64>,

        #[arg(long)]
        chapter: Option<String>,

        #[arg(long)]
        topic: Option<String>,
    },

    /// Inspect or remove ingested materials.
    Materials {
        #[command(subcommand)]
        action: MaterialsAction,
    },

    /// Answer a question from the ingested materials.
    Ask {
        question: String,

        /// Continue a chat session.
        #[arg(long)]
        session: Option<String>,

        #[arg(long)]
        top_k: Option<usize>,

        /// Only use materials of this type.
        #[arg(long = "type")]
        material_type: Option<String>,

        #[arg(long)]
        lecture: Option<i64>,

        /// Case-insensitive topic substring.
        #[arg(long)]
        topic: Option<String>,

        /// Restrict to material ids (repeatable).
        #[arg(long = "material")]
        materials: Vec<i64>,
    },

    /// Manage chat sessions.
    Chat {
        #[command(subcommand)]
        action: ChatAction,
    },

    /// Inspect query logs.
    Logs {
        #[command(subcommand)]
        action: LogsAction,
    },

    /// Print the full text and metadata of a cited chunk.
    Source { chunk_id: String },

    /// Maintain the vector index.
    Index {
        #[command(subcommand)]
        action: IndexAction,
    },

    /// Offline quality metrics.
    Eval {
        #[command(subcommand)]
        action: EvalAction,
    },

    /// Start the HTTP server on `[server].bind`.
    Serve,
}

#[derive(Subcommand)]
enum MaterialsAction {
    List,
    /// Delete a material and its chunks, then rebuild the index.
    Delete { id: i64 },
}

#[derive(Subcommand)]
enum ChatAction {
    New {
        #[arg(long)]
        title: Option<String>,
    },
    List {
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
    History { session: String },
    Rename { session: String, title: String },
}

#[derive(Subcommand)]
enum LogsAction {
    Show { id: i64 },
    Recent {
        #[arg(long, default_value_t = 10)]
        limit: i64,
    },
}

#[derive(Subcommand)]
enum IndexAction {
    /// Re-embed every stored chunk and swap the index contents.
    Rebuild,
    /// Delete all materials, chats, logs and vectors.
    Reset {
        /// Confirm the reset.
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
enum EvalAction {
    /// Citation accuracy over the most recent query logs.
    Citations {
        #[arg(long, default_value_t = 10)]
        limit: i64,
    },
    /// Recall@K over a JSON file of `{query, relevant_chunk_ids}` objects.
    Recall {
        queries: PathBuf,
        /// K values to evaluate (repeatable). Defaults to 5, 10, 12, 20.
        #[arg(long = "k")]
        ks: Vec<usize>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    logging::init(&cfg.logging);

    if let Commands::Init = cli.command {
        migrate::run_migrations(&cfg).await?;
        println!("Database initialized successfully.");
        return Ok(());
    }

    let services = Services::from_config(cfg).await?;

    match cli.command {
        Commands::Init => {}
        Commands::Ingest {
            path,
            material_type,
            title,
            course,
            lecture,
            chapter,
            topic,
        } => {
            let input = MaterialInput {
                material_type,
                title,
                course,
                lecture_number: lecture,
                chapter,
                topic,
            };
            ingest::run_ingest(&services, &path, &input).await?;
        }
        Commands::Materials { action } => match action {
            MaterialsAction::List => admin::run_list_materials(&services).await?,
            MaterialsAction::Delete { id } => admin::run_delete_material(&services, id).await?,
        },
        Commands::Ask {
            question,
            session,
            top_k,
            material_type,
            lecture,
            topic,
            materials,
        } => {
            let filters = QueryFilters {
                material_type,
                lecture_number: lecture,
                topic,
                material_ids: (!materials.is_empty()).then_some(materials),
            };
            let request = AskRequest {
                question,
                filters: (!filters.is_empty()).then_some(filters),
                top_k,
                session_id: session,
            };
            ask::run_ask(&services, request).await?;
        }
        Commands::Chat { action } => {
            let store = services.store.as_ref();
            match action {
                ChatAction::New { title } => chat::run_new(store, title).await?,
                ChatAction::List { limit } => chat::run_list(store, limit).await?,
                ChatAction::History { session } => chat::run_history(store, &session).await?,
                ChatAction::Rename { session, title } => {
                    chat::run_rename(store, &session, &title).await?
                }
            }
        }
        Commands::Logs { action } => {
            let store = services.store.as_ref();
            match action {
                LogsAction::Show { id } => logs::run_show(store, id).await?,
                LogsAction::Recent { limit } => logs::run_recent(store, limit).await?,
            }
        }
        Commands::Source { chunk_id } => {
            source::run_show(services.store.as_ref(), &chunk_id).await?
        }
        Commands::Index { action } => match action {
            IndexAction::Rebuild => admin::run_rebuild(&services).await?,
            IndexAction::Reset { yes } => admin::run_reset(&services, yes).await?,
        },
        Commands::Eval { action } => match action {
            EvalAction::Citations { limit } => evaluate::run_citations(&services, limit).await?,
            EvalAction::Recall { queries, ks } => {
                evaluate::run_recall(&services, &queries, &ks).await?
            }
        },
        Commands::Serve => server::run_server(services).await?,
    }

    Ok(())
}
