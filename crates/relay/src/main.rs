//! PtyRelay server
//!
//! Serves shells on pseudo-terminals to WebSocket endpoints.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use relay::config::{default_config_path, Config};
use relay::{NativePtySystem, RelayServer, SessionManager};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// PtyRelay - remote pseudo-terminal relay.
#[derive(Parser, Debug)]
#[command(name = "ptyrelay")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Start the relay server
    Start {
        /// Address to listen on (overrides the configuration)
        #[arg(long, short, value_name = "ADDR")]
        listen: Option<String>,
    },

    /// Inspect or create the configuration file
    #[command(subcommand)]
    Config(ConfigCommands),
}

/// Subcommands for configuration management.
#[derive(Subcommand, Debug, Clone)]
pub enum ConfigCommands {
    /// Print the effective configuration as TOML
    Show,

    /// Write the default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long, short)]
        force: bool,
    },

    /// Print the configuration file path
    Path,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.clone().unwrap_or_else(default_config_path);

    match cli.command {
        Commands::Start { listen } => {
            let mut config = Config::load(&config_path)?;
            let overrides = config.apply_env_overrides();
            if let Some(listen) = listen {
                config.relay.listen = listen;
            }
            config.validate()?;

            let _guard = init_logging(&config, cli.verbose)?;
            tracing::info!("Using config file: {:?}", config_path);
            for (setting, value) in &overrides {
                tracing::info!("Overriding {} from environment: {}", setting, value);
            }

            run_server(config).await?;
        }
        Commands::Config(ConfigCommands::Show) => {
            let mut config = Config::load(&config_path)?;
            config.apply_env_overrides();
            print!("{}", config.to_toml()?);
        }
        Commands::Config(ConfigCommands::Init { force }) => {
            init_config(&config_path, force)?;
            println!("Wrote default configuration to {}", config_path.display());
        }
        Commands::Config(ConfigCommands::Path) => {
            println!("{}", config_path.display());
        }
    }

    Ok(())
}

/// Initialize tracing.
///
/// `RUST_LOG` wins over `--verbose`, which wins over the configured level.
/// With `log_dir` set, a daily-rolling file receives the same events.
fn init_logging(config: &Config, verbose: bool) -> anyhow::Result<Option<WorkerGuard>> {
    let level = if verbose {
        "debug".to_string()
    } else {
        config.relay.log_level.to_lowercase()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let (file_layer, guard) = match config.relay.log_dir {
        Some(ref dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory: {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, "ptyrelay.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();

    Ok(guard)
}

/// Run the relay until SIGTERM or SIGINT.
async fn run_server(config: Config) -> anyhow::Result<()> {
    let addr = config.listen_addr()?;
    let manager = Arc::new(SessionManager::new(
        Arc::new(NativePtySystem::new()),
        config.session_settings(),
    ));

    let server = RelayServer::bind(addr, manager, config.relay.outbox_capacity)
        .await
        .with_context(|| format!("Failed to listen on {addr}"))?;
    let shutdown = server.shutdown_token();

    tracing::info!(
        addr = %server.local_addr()?,
        max_sessions = config.session.max_sessions,
        "PtyRelay starting"
    );

    let server_task = tokio::spawn(server.run());

    wait_for_shutdown_signal().await?;
    tracing::info!("Received shutdown signal");

    shutdown.cancel();
    server_task.await.context("Relay server task failed")??;

    tracing::info!("PtyRelay stopped");
    Ok(())
}

/// Write the default configuration, refusing to clobber an existing file
/// unless `force` is set.
fn init_config(path: &Path, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!(
            "Configuration file already exists: {} (use --force to overwrite)",
            path.display()
        );
    }
    Config::default().save(path)
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
#[cfg(unix)]
async fn wait_for_shutdown_signal() -> anyhow::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm =
        signal(SignalKind::terminate()).context("Failed to register SIGTERM handler")?;
    let mut sigint =
        signal(SignalKind::interrupt()).context("Failed to register SIGINT handler")?;

    tokio::select! {
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM");
        }
        _ = sigint.recv() => {
            tracing::info!("Received SIGINT");
        }
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() -> anyhow::Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")
}
