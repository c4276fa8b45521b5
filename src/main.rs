#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::needless_pass_by_value,
    clippy::too_many_lines,
    clippy::uninlined_format_args
)]

use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};

use clawgate::memory::{MarkdownMemory, MemoryStore};
use clawgate::security::PathSandbox;
use clawgate::util::{single_line, truncate_with_ellipsis};
use clawgate::{Config, MemoryCommands, gateway};

/// `clawgate` - one agent, many chats, one workspace.
#[derive(Parser, Debug)]
#[command(name = "clawgate")]
#[command(version)]
#[command(about = "Multi-platform chat gateway for a sandboxed AI agent.", long_about = None)]
struct Cli {
    /// Config file (default: ~/.clawgate/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the gateway: channel listeners plus the control-plane API
    Gateway {
        /// Port to listen on (use 0 for random available port); defaults to config gateway.port
        #[arg(short, long)]
        port: Option<u16>,

        /// Host to bind to; defaults to config gateway.host
        #[arg(long)]
        host: Option<String>,
    },

    /// Check a path against the workspace sandbox policy
    Check {
        /// Path relative to the workspace root
        path: String,
    },

    /// Inspect workspace memory files
    Memory {
        #[command(subcommand)]
        memory_command: MemoryCommands,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging - respects RUST_LOG env var, defaults to clawgate=info
    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("clawgate=info")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = Config::load_or_init(cli.config.as_deref())?;

    match cli.command {
        Commands::Gateway { port, host } => {
            let port = port.unwrap_or(config.gateway.port);
            let host = host.unwrap_or_else(|| config.gateway.host.clone());
            if port == 0 {
                info!("Starting clawgate on {host} (random port)");
            } else {
                info!("Starting clawgate on {host}:{port}");
            }
            gateway::run_gateway(&host, port, config).await
        }

        Commands::Check { path } => {
            let sandbox = PathSandbox::new(config.workspace_policy())?;
            let validation = sandbox.validate(&path);
            match (validation.resolved, validation.error) {
                (Some(resolved), _) => {
                    println!("✅ {path} → {}", resolved.display());
                    Ok(())
                }
                (None, error) => {
                    let reason = error.unwrap_or_else(|| "rejected".into());
                    bail!(
                        "❌ {path} rejected ({}): {reason}",
                        validation.kind.unwrap_or("invalid")
                    )
                }
            }
        }

        Commands::Memory { memory_command } => {
            let memory = MarkdownMemory::new(&config.workspace_dir);
            handle_memory_command(&memory, memory_command).await
        }
    }
}

async fn handle_memory_command(memory: &dyn MemoryStore, command: MemoryCommands) -> Result<()> {
    match command {
        MemoryCommands::List => {
            let files = memory.list_daily_files().await?;
            if files.is_empty() {
                println!("No daily memory files yet.");
            }
            for name in files {
                println!("{name}");
            }
        }
        MemoryCommands::Search { query } => {
            let hits = memory.search(&query).await?;
            if hits.is_empty() {
                println!("No matches for \"{query}\".");
            }
            for hit in hits {
                println!("{}", hit.file);
                for m in hit.matches {
                    println!(
                        "  L{}: {}",
                        m.line,
                        truncate_with_ellipsis(&single_line(&m.context), 120)
                    );
                }
            }
        }
    }
    Ok(())
}
