use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use golf_worker::config::{init_config, WorkerConfig};
use golf_worker::dispatcher::{serve as serve_http, Dispatcher};
use golf_worker::isolation::{IsolationManager, SandboxCommand};
use golf_worker::sandbox::{serve_once, Limits, PhpInterpreter};

#[derive(Debug, Parser)]
#[command(name = "golf-worker", about = "Sandboxed PHP execution worker")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve POST /exec
    Serve {
        /// Address to bind (overrides LISTEN_ADDR)
        #[arg(long)]
        listen: Option<String>,
    },
    /// Run one submission from stdin (started by the worker, not by hand)
    #[command(hide = true)]
    Sandbox {
        /// PHP CLI binary
        #[arg(long, default_value = "php")]
        php: PathBuf,
        /// PHP memory_limit in MB
        #[arg(long, default_value_t = 256)]
        memory_limit_mb: u64,
        /// Address space limit in MB
        #[arg(long, default_value_t = 1024)]
        address_space_limit_mb: u64,
        /// Process count limit for the sandbox user
        #[arg(long, default_value_t = 512)]
        process_limit: u64,
        /// CPU time limit in seconds
        #[arg(long, default_value_t = 10)]
        cpu_limit_secs: u64,
        /// File size limit in KB
        #[arg(long, default_value_t = 10240)]
        file_size_limit_kb: u64,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("golf_worker=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve { listen } => serve(listen),
        Command::Sandbox {
            php,
            memory_limit_mb,
            address_space_limit_mb,
            process_limit,
            cpu_limit_secs,
            file_size_limit_kb,
        } => sandbox(
            php,
            Limits {
                memory_mb: memory_limit_mb,
                address_space_mb: address_space_limit_mb,
                processes: process_limit,
                cpu_secs: cpu_limit_secs,
                fsize_kb: file_size_limit_kb,
            },
        ),
    }
}

/// Sandbox runtime: one message in, one reply out, then exit
fn sandbox(php: PathBuf, limits: Limits) -> Result<()> {
    limits.apply().context("Failed to apply sandbox limits")?;
    debug!("Applied sandbox limits: {:?}", limits);

    let workspace = std::env::current_dir().context("Failed to resolve sandbox workspace")?;
    let mut interpreter =
        PhpInterpreter::new(php, workspace).with_memory_limit_mb(limits.memory_mb);
    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    serve_once(&mut stdin.lock(), &mut stdout.lock(), &mut interpreter)?;
    Ok(())
}

fn serve(listen: Option<String>) -> Result<()> {
    dotenvy::dotenv().ok();

    let mut config = WorkerConfig::from_env()?;
    if let Some(listen) = listen {
        config.listen_addr = listen;
    }
    let config = init_config(config)?;

    tokio::runtime::Runtime::new()
        .context("Failed to start tokio runtime")?
        .block_on(run_server(config))
}

async fn run_server(config: &'static WorkerConfig) -> Result<()> {
    info!("Starting Golf Worker...");

    let program = config.resolve_sandbox_program()?;
    let command = SandboxCommand::worker(program, &config.php_binary, &config.limits);
    info!("Sandbox command: {:?} {:?}", command.program, command.args);

    let manager = IsolationManager::new(command);
    let dispatcher = Dispatcher::new(Arc::new(manager));

    let listener = TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen_addr))?;
    info!("Listening on {}", config.listen_addr);

    serve_http(listener, dispatcher, shutdown_signal())
        .await
        .context("HTTP server failed")?;

    info!("Golf Worker stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
