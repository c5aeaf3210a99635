use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use histview::cli::{index, list, project, read};
use histview::config::Config;
use histview::probe::ProbeRegistry;
use histview::query::{ProjectParams, QueryService, SessionParams};
use histview::server;
use histview::store::{IndexStore, SharedStore};

#[derive(Parser)]
#[command(name = "histview")]
#[command(about = "Index, search and read local Codex and Claude Code session transcripts")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path (default: ./histview.yaml, then ~/.config/histview/histview.yaml)
    #[arg(short, long)]
    config: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the JSON API and rescan sources in the background
    Serve {
        /// Listen address, overriding the configured host and port
        #[arg(long, value_name = "HOST:PORT")]
        bind: Option<String>,
    },

    /// Run one rescan of every enabled source
    Index,

    /// List sessions
    List {
        /// Filter by source (codex, claude)
        #[arg(short, long)]
        source: Option<String>,

        /// Keywords, all of which must match
        #[arg(short, long)]
        query: Option<String>,

        /// First day to include (YYYY-MM-DD)
        #[arg(long)]
        since: Option<String>,

        /// Last day to include (YYYY-MM-DD)
        #[arg(long)]
        until: Option<String>,

        /// Working directory, including its subdirectories
        #[arg(short, long)]
        project: Option<String>,

        /// Sort by start or last activity
        #[arg(long, value_name = "start|last")]
        sort: Option<String>,

        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Read a session
    Read {
        /// Full session ID, as printed by `list`
        session_id: String,

        /// Roles to hide, comma-separated (e.g. tool,other)
        #[arg(long, value_name = "ROLE,...")]
        exclude_roles: Option<String>,
    },

    /// List projects by working directory
    Projects {
        #[arg(short, long)]
        source: Option<String>,

        #[arg(short, long)]
        query: Option<String>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn,histview=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve { bind } => {
            let runtime = tokio::runtime::Runtime::new().context("starting async runtime")?;
            runtime.block_on(server::serve(&config, bind))?;
        }
        Commands::Index => {
            let registry = ProbeRegistry::new(&config);
            index::run(&open_store(&config)?, &registry)?;
        }
        Commands::List {
            source,
            query: q,
            since,
            until,
            project,
            sort,
            limit,
        } => {
            let params = SessionParams {
                source,
                q,
                start: since,
                end: until,
                project,
                sort,
                limit: limit.map(|l| l.to_string()),
            };
            list::run(&query_service(&config)?, params)?;
        }
        Commands::Read {
            session_id,
            exclude_roles,
        } => {
            read::run(&query_service(&config)?, &session_id, exclude_roles)?;
        }
        Commands::Projects { source, query: q } => {
            let params = ProjectParams {
                source,
                q,
                limit: None,
            };
            project::list(&query_service(&config)?, params)?;
        }
    }

    Ok(())
}

fn open_store(config: &Config) -> Result<SharedStore> {
    let db_path = config.database_path();
    let store = IndexStore::open(&db_path)
        .with_context(|| format!("opening index at {}", db_path.display()))?;
    Ok(Arc::new(Mutex::new(store)))
}

fn query_service(config: &Config) -> Result<QueryService> {
    Ok(QueryService::new(open_store(config)?))
}
