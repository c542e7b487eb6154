//! Cinder CLI - burn-after-reading notes over HTTP or from the shell.

mod http;

use anyhow::{bail, Context, Result};
use cinder_core::{
    AeadCipher, Argon2Hasher, CreateNote, HasherConfig, MemoryStore, NoteService, NoteStore,
    DEFAULT_RETRIES,
};
use cinder_files::FilesStore;
use cinder_sqlite::SqliteStore;
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::io::{self, Read};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "cinder=info,cinder_core=info,tower_http=info";

#[derive(Parser)]
#[command(name = "cinder", about = "Burn-after-reading notes", version)]
struct Cli {
    #[command(flatten)]
    config: Config,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Config {
    /// Server-wide secret bound into every encrypted note
    #[arg(long, env = "CINDER_SECRET", hide_env_values = true, global = true)]
    secret: Option<String>,

    /// Storage backend
    #[arg(long, env = "CINDER_BACKEND", value_enum, default_value_t = Backend::Sqlite, global = true)]
    backend: Backend,

    /// Database file (sqlite) or directory (files)
    #[arg(long, env = "CINDER_DATABASE", global = true)]
    database: Option<PathBuf>,

    /// Argon2 memory cost in KiB
    #[arg(long, env = "CINDER_ARGON2_MEMORY_KIB", default_value_t = HasherConfig::default().memory_kib, global = true)]
    argon2_memory_kib: u32,

    /// Argon2 iterations
    #[arg(long, env = "CINDER_ARGON2_ITERATIONS", default_value_t = HasherConfig::default().iterations, global = true)]
    argon2_iterations: u32,

    /// Argon2 lanes
    #[arg(long, env = "CINDER_ARGON2_PARALLELISM", default_value_t = HasherConfig::default().parallelism, global = true)]
    argon2_parallelism: u32,

    /// Retries on transient storage conflicts
    #[arg(long, env = "CINDER_VISIT_RETRIES", default_value_t = DEFAULT_RETRIES, global = true)]
    visit_retries: u32,

    #[arg(long, env = "CINDER_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,
}

#[derive(Clone, Copy, ValueEnum)]
enum Backend {
    Sqlite,
    Files,
    /// Nothing survives a restart
    Memory,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server
    Serve {
        #[arg(long, env = "CINDER_HOST", default_value = "127.0.0.1")]
        host: String,
        #[arg(long, env = "CINDER_PORT", default_value_t = 8000)]
        port: u16,
    },
    /// Create a note and print its sign
    Create {
        /// Note name
        #[arg(long)]
        name: String,
        /// Note text (reads from stdin if not provided)
        #[arg(long)]
        text: Option<String>,
        /// Burn the note after this many reads (0 for unlimited)
        #[arg(long, default_value_t = 0)]
        max_visits: u32,
        /// Encrypt the note with this password
        #[arg(long)]
        password: Option<String>,
    },
    /// Read a note, consuming one visit
    Read {
        sign: String,
        /// Password for encrypted notes
        #[arg(long)]
        password: Option<String>,
    },
}

fn init_tracing(format: LogFormat) {
    let tracing = tracing_subscriber::registry().with(
        EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
    );

    // stdout is reserved for command output.
    match format {
        LogFormat::Json => tracing
            .with(tracing_subscriber::fmt::layer().json().with_writer(io::stderr))
            .init(),
        LogFormat::Text => tracing
            .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
            .init(),
    }
}

fn open_store(config: &Config) -> Result<Box<dyn NoteStore>> {
    let store: Box<dyn NoteStore> = match config.backend {
        Backend::Sqlite => {
            let path = config
                .database
                .clone()
                .unwrap_or_else(|| PathBuf::from("cinder.sqlite"));
            Box::new(
                SqliteStore::open(&path)
                    .with_context(|| format!("Failed to open database {}", path.display()))?,
            )
        }
        Backend::Files => {
            let path = config
                .database
                .clone()
                .unwrap_or_else(|| PathBuf::from(".cinder"));
            Box::new(
                FilesStore::open(&path)
                    .with_context(|| format!("Failed to open store {}", path.display()))?,
            )
        }
        Backend::Memory => {
            tracing::warn!("using the memory backend, notes are lost on exit");
            Box::new(MemoryStore::new())
        }
    };
    Ok(store)
}

fn build_service(config: &Config) -> Result<NoteService<Box<dyn NoteStore>>> {
    let Some(secret) = config.secret.as_deref() else {
        bail!("No server secret configured. Set CINDER_SECRET or pass --secret.");
    };
    let cipher = AeadCipher::new(secret).context("Invalid server secret")?;
    let hasher = Argon2Hasher::new(HasherConfig {
        memory_kib: config.argon2_memory_kib,
        iterations: config.argon2_iterations,
        parallelism: config.argon2_parallelism,
    })
    .context("Invalid Argon2 parameters")?;

    Ok(NoteService::new(open_store(config)?, cipher)
        .with_hasher(Arc::new(hasher))
        .with_retries(config.visit_retries))
}

fn read_stdin() -> Result<String> {
    let mut buf = String::new();
    io::stdin()
        .read_to_string(&mut buf)
        .context("Failed to read from stdin")?;
    Ok(buf)
}

fn is_stdin_tty() -> bool {
    atty::is(atty::Stream::Stdin)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.config.log_format);

    let service = build_service(&cli.config)?;

    match cli.command {
        Commands::Serve { host, port } => {
            let app = http::router(Arc::new(service));
            let listener = TcpListener::bind((host.as_str(), port))
                .await
                .with_context(|| format!("Failed to bind {}:{}", host, port))?;

            tracing::info!("listening on http://{}", listener.local_addr()?);

            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .await
                .context("Server error")?;
        }

        Commands::Create {
            name,
            text,
            max_visits,
            password,
        } => {
            let text = match text {
                Some(t) => t,
                None if !is_stdin_tty() => read_stdin()?,
                None => bail!("No text given. Pass --text or pipe it on stdin."),
            };
            let sign = service
                .create(CreateNote {
                    name,
                    text,
                    max_number_visits: max_visits,
                    is_encrypted: password.is_some(),
                    encrypt_password: password,
                    ..Default::default()
                })
                .await?;
            println!("{}", sign);
        }

        Commands::Read { sign, password } => {
            let content = service.read(&sign, password.as_deref()).await?;
            println!("# {}\n", content.name);
            println!("{}", content.message);
        }
    }

    Ok(())
}
