use anyhow::{anyhow, Context, Result};
use asm_kernel::channel::ConsoleChannel;
use asm_kernel::config::{ConfigLoader, HarnessConfig};
use asm_kernel::session::{KernelInfo, Session};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tokio::io::AsyncReadExt;
use tracing::{debug, error, trace, warn};

#[derive(Parser)]
#[command(name = "asm-kernel")]
#[command(about = "Build and run assembly snippets with live output", long_about = None)]
struct Cli {
    /// Enable verbose output (-v for debug, -vv for trace, -vvv for all)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Configuration file (defaults to config.toml in the platform config dir)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build and run each file as one submission ("-" reads stdin)
    Run {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Print the kernel description as JSON
    Info,
    /// Print the effective configuration as TOML
    Config,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(log_level)
        .with_target(cli.verbose >= 2)
        .with_thread_ids(cli.verbose >= 3)
        .with_line_number(cli.verbose >= 3)
        .with_writer(std::io::stderr)
        .init();

    debug!("asm-kernel started with verbosity level: {}", cli.verbose);
    trace!("Full CLI args: {:?}", std::env::args().collect::<Vec<_>>());

    let result = match cli.command {
        Commands::Run { files } => run_files(cli.config, files).await,
        Commands::Info => print_info(),
        Commands::Config => print_config(cli.config).await,
    };

    if let Err(e) = result {
        error!("Fatal error: {}", e);
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

async fn load_config(path: Option<PathBuf>) -> Result<HarnessConfig> {
    ConfigLoader::new(path)
        .load()
        .await
        .context("Failed to load configuration")
}

async fn run_files(config_path: Option<PathBuf>, files: Vec<PathBuf>) -> Result<()> {
    let config = load_config(config_path).await?;
    let mut session = Session::from_config(&config);
    let channel = ConsoleChannel::new();

    let work = async {
        for file in &files {
            let code = read_source(file).await?;
            let reply = session.submit(&code, &channel).await;
            debug!("{} -> {}", file.display(), serde_json::to_string(&reply)?);
        }
        Ok::<_, anyhow::Error>(())
    };

    let result = tokio::select! {
        result = work => result,
        signal = shutdown_signal() => Err(anyhow!("Stopped by {signal}")),
    };

    session.shutdown();
    result
}

/// Resolves on Ctrl-C or SIGTERM with the name of the signal received
async fn shutdown_signal() -> &'static str {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to install Ctrl-C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => "SIGINT",
        _ = terminate => "SIGTERM",
    }
}

async fn read_source(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        let mut code = String::new();
        tokio::io::stdin()
            .read_to_string(&mut code)
            .await
            .context("Failed to read source from stdin")?;
        return Ok(code);
    }

    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))
}

fn print_info() -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&KernelInfo::default())?);
    Ok(())
}

async fn print_config(config_path: Option<PathBuf>) -> Result<()> {
    let config = load_config(config_path).await?;
    print!("{}", toml::to_string(&config)?);
    Ok(())
}
