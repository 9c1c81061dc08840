//! # MidSet CLI (`midset`)
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `midset init` | Create the SQLite database and tables |
//! | `midset ingest [paths…]` | Decode replays and store their statistics |
//! | `midset inspect <file>` | Print one decoded replay as JSON |
//! | `midset matches` | List recorded matches |
//! | `midset show <id>` | One match with its notes |
//! | `midset note add "<text>"` | Save a note and index it |
//! | `midset note list` | List notes |
//! | `midset search "<query>"` | Top-k chunks for a query |
//! | `midset embed pending` | Backfill missing vectors |
//! | `midset embed reindex <id>` | Re-chunk and re-embed one document |
//! | `midset reset --yes` | Delete all data |
//!
//! ## Examples
//!
//! ```bash
//! midset init --config ./config/midset.toml
//! midset ingest ~/Slippi/2024-02
//! midset note add --match 12 "kept missing ledge tech against Marth"
//! midset search "ledge tech" --k 3
//! ```
//!
//! Logs go to stderr and are filtered with `RUST_LOG`
//! (default `midset=info,midset_core=info`).

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use midset::matches::MatchQuery;
use midset::models::WinLoss;
use midset::{config, embed_cmd, ingest, matches, migrate, notes, search};

/// MidSet: local-first statistics and retrieval over Slippi replays.
#[derive(Parser)]
#[command(
    name = "midset",
    about = "MidSet: replay statistics, notes, and retrieval for Slippi games",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/midset.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and the matches, notes, documents
    /// and chunks tables, plus chunk_vectors when an embedding provider is
    /// configured. Safe to run repeatedly.
    Init,

    /// Decode replay files and store their statistics.
    ///
    /// Directories are scanned recursively using `[replays]` globs. Files
    /// already recorded with the same name and modification time are
    /// skipped. Uses `[replays] root` when no paths are given.
    Ingest {
        /// Replay files or directories.
        paths: Vec<PathBuf>,

        /// Decode and count without writing to the database.
        #[arg(long)]
        dry_run: bool,
    },

    /// Decode one replay and print the session and summary as JSON.
    Inspect {
        /// Path to a `.slp` file.
        file: PathBuf,
    },

    /// List recorded matches.
    Matches {
        /// Character id or name.
        #[arg(long)]
        character: Option<String>,

        /// Opponent character id or name.
        #[arg(long)]
        opponent: Option<String>,

        /// Stage id or name.
        #[arg(long)]
        stage: Option<String>,

        /// win, loss, or unknown.
        #[arg(long)]
        result: Option<WinLoss>,

        /// Sort key: date, duration, stocks, opk, or id.
        #[arg(long, default_value = "date")]
        order_by: String,

        /// Sort ascending instead of descending.
        #[arg(long)]
        asc: bool,

        #[arg(long, default_value_t = 20)]
        limit: i64,

        #[arg(long, default_value_t = 0)]
        offset: i64,
    },

    /// Show one match and its notes.
    Show {
        /// Match id.
        id: i64,
    },

    /// Notes attached to matches or kept as general reflections.
    Note {
        #[command(subcommand)]
        action: NoteAction,
    },

    /// Retrieve the chunks most relevant to a query.
    ///
    /// Uses vector similarity when embeddings are available, otherwise a
    /// case-insensitive substring match.
    Search {
        query: String,

        /// Number of results (defaults to `[retrieval] default_k`).
        #[arg(long)]
        k: Option<usize>,

        /// Only search documents of this match.
        #[arg(long = "match")]
        match_id: Option<i64>,
    },

    /// Embedding management.
    Embed {
        #[command(subcommand)]
        action: EmbedAction,
    },

    /// Delete every row from every table.
    Reset {
        /// Confirm the deletion.
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
enum NoteAction {
    /// Save a note and index it for search.
    Add {
        text: String,

        /// Attach the note to this match.
        #[arg(long = "match")]
        match_id: Option<i64>,

        /// The text is a transcribed voice recording.
        #[arg(long)]
        transcript: bool,
    },

    /// List notes, optionally for one match.
    List {
        #[arg(long = "match")]
        match_id: Option<i64>,
    },
}

/// Embedding management subcommands.
#[derive(Subcommand)]
enum EmbedAction {
    /// Embed chunks that have no vector yet.
    Pending {
        /// Maximum number of chunks to embed in this run.
        #[arg(long)]
        limit: Option<usize>,

        /// Override the batch size from config (number of texts per API call).
        #[arg(long)]
        batch_size: Option<usize>,

        /// Show counts without performing any embedding.
        #[arg(long)]
        dry_run: bool,
    },

    /// Re-chunk a stored document with the current settings and embed it
    /// again when vectors are available.
    Reindex {
        /// Document id (see `midset search` output).
        document_id: i64,
    },
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "midset=info,midset_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    // Commands that don't require config
    if let Commands::Inspect { file } = &cli.command {
        return ingest::run_inspect(file);
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest { paths, dry_run } => {
            ingest::run_ingest(&cfg, paths, dry_run).await?;
        }
        Commands::Inspect { .. } => {
            // Handled above (before config loading)
            unreachable!()
        }
        Commands::Matches {
            character,
            opponent,
            stage,
            result,
            order_by,
            asc,
            limit,
            offset,
        } => {
            let query = MatchQuery {
                character,
                opponent,
                stage,
                result,
                order_by,
                ascending: asc,
                limit,
                offset,
            };
            matches::run_matches(&cfg, &query).await?;
        }
        Commands::Show { id } => {
            matches::run_show(&cfg, id).await?;
        }
        Commands::Note { action } => match action {
            NoteAction::Add {
                text,
                match_id,
                transcript,
            } => {
                notes::run_note_add(&cfg, match_id, &text, transcript).await?;
            }
            NoteAction::List { match_id } => {
                notes::run_note_list(&cfg, match_id).await?;
            }
        },
        Commands::Search { query, k, match_id } => {
            search::run_search(&cfg, &query, k, match_id).await?;
        }
        Commands::Embed { action } => match action {
            EmbedAction::Pending {
                limit,
                batch_size,
                dry_run,
            } => {
                embed_cmd::run_embed_pending(&cfg, limit, batch_size, dry_run).await?;
            }
            EmbedAction::Reindex { document_id } => {
                embed_cmd::run_embed_reindex(&cfg, document_id).await?;
            }
        },
        Commands::Reset { yes } => {
            migrate::run_reset(&cfg, yes).await?;
        }
    }

    Ok(())
}
