//! # RepoSearch CLI (`reposearch`)
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `reposearch init` | Create the SQLite database and run schema migrations |
//! | `reposearch index <owner/name>` | Index or refresh a repository |
//! | `reposearch search "<query>"` | Semantic search over indexed repositories |
//! | `reposearch list` | List indexed repositories and their stage status |
//! | `reposearch get <chunk-id>` | Print one stored chunk |
//! | `reposearch delete <owner/name>` | Remove a repository from the index |
//! | `reposearch serve mcp` | Start the MCP server |
//! | `reposearch completions <shell>` | Print shell completions |
//!
//! ## Examples
//!
//! ```bash
//! reposearch init
//! reposearch index tokio-rs/axum
//! reposearch index tokio-rs/axum --force-reembed
//! reposearch search "how are extractors implemented" --repository tokio-rs/axum
//! reposearch serve mcp --transport http
//! ```

use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use reposearch::server::Transport;
use reposearch::{config, get, index_cmd, migrate, repos, search, server};
use reposearch_core::plan::ForceFlags;

/// RepoSearch: incremental GitHub repository indexing and semantic code
/// search.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/reposearch.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "reposearch",
    about = "RepoSearch: incremental GitHub repository indexing and semantic code search",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/reposearch.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent: running it multiple times is safe.
    Init,

    /// Index a repository, re-running only the stages whose inputs changed.
    Index {
        /// `owner/name` or a GitHub URL.
        repository: String,

        /// Redo every stage.
        #[arg(long)]
        force_refresh: bool,

        /// Download again even if the revision is unchanged.
        #[arg(long)]
        force_redownload: bool,

        /// Re-chunk (and therefore re-embed) the stored revision.
        #[arg(long)]
        force_rechunk: bool,

        /// Re-embed the last chunk set, e.g. after switching models.
        #[arg(long)]
        force_reembed: bool,
    },

    /// Search indexed repositories.
    Search {
        /// The search query string.
        query: String,

        /// Restrict results to one repository (`owner/name`).
        #[arg(long)]
        repository: Option<String>,

        /// Maximum number of results to return.
        #[arg(long)]
        limit: Option<usize>,

        /// Minimum cosine similarity for a result.
        #[arg(long)]
        score_threshold: Option<f32>,
    },

    /// List indexed repositories.
    List,

    /// Print a stored chunk by id.
    Get {
        /// Chunk id, as printed by `search`.
        id: String,
    },

    /// Delete a repository's record and chunks.
    Delete {
        /// `owner/name` or a GitHub URL.
        repository: String,
    },

    /// Start a server.
    Serve {
        #[command(subcommand)]
        service: ServeService,
    },

    /// Print shell completions to stdout.
    Completions {
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand)]
enum ServeService {
    /// Start the MCP tool server.
    Mcp {
        /// `stdio` for clients that spawn the binary, `http` to listen on
        /// `[server].bind`.
        #[arg(long, value_enum, default_value_t = Transport::Stdio)]
        transport: Transport,
    },
}

/// Logs go to stderr so stdout stays clean for command output and the
/// stdio MCP transport.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(atty::is(atty::Stream::Stderr))
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Commands that don't require config
    if let Commands::Completions { shell } = cli.command {
        clap_complete::generate(
            shell,
            &mut Cli::command(),
            "reposearch",
            &mut std::io::stdout(),
        );
        return Ok(());
    }

    init_logging();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Index {
            repository,
            force_refresh,
            force_redownload,
            force_rechunk,
            force_reembed,
        } => {
            let force = if force_refresh {
                ForceFlags::refresh()
            } else {
                ForceFlags {
                    redownload: force_redownload,
                    rechunk: force_rechunk,
                    reembed: force_reembed,
                }
            };
            index_cmd::run_index(&cfg, &repository, force).await?;
        }
        Commands::Search {
            query,
            repository,
            limit,
            score_threshold,
        } => {
            search::run_search(&cfg, &query, repository, limit, score_threshold).await?;
        }
        Commands::List => {
            repos::run_list(&cfg).await?;
        }
        Commands::Get { id } => {
            get::run_get(&cfg, &id).await?;
        }
        Commands::Delete { repository } => {
            repos::run_delete(&cfg, &repository).await?;
        }
        Commands::Serve { service } => match service {
            ServeService::Mcp { transport } => {
                server::run_server(&cfg, transport).await?;
            }
        },
        Commands::Completions { .. } => unreachable!("handled before config loading"),
    }

    Ok(())
}
