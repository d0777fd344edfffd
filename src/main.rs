// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tokio::io::BufReader;
use tokio::sync::mpsc;
use tracing::Level;

use ariaflow::config::{config_path, load_config, save_config, Config};
use ariaflow::download::{DownloadEvent, DownloadId, DownloadStatus, DownloadSupervisor, EventHub};
use ariaflow::ipc;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// How long to wait for blocked stdin readers when the runtime shuts down.
const RUNTIME_SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

/// ariaflow - run and control download agents.
#[derive(Parser)]
#[command(name = "ariaflow")]
#[command(version = VERSION)]
#[command(about = "Supervise aria2c downloads: progress, pause, resume, stop.")]
#[command(long_about = "ariaflow - download agent supervisor\n\n\
    Download in the terminal:   ariaflow get <URL>... [--folder DIR]\n\
    Drive from another process: ariaflow serve   (JSON lines on stdin/stdout)\n\
    Configure:                  ariaflow config show")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Quiet mode: only warnings and errors in the log
    #[arg(short = 'q', long, global = true)]
    quiet: bool,

    /// Verbose mode: debug logging, including every progress update
    #[arg(short = 'v', long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Download one or more URLs or magnet links, showing progress bars
    ///
    /// Examples:
    ///   ariaflow get https://example.com/debian.iso
    ///   ariaflow get "magnet:?xt=urn:btih:..." --folder ~/torrents
    Get {
        /// URLs or magnet links
        #[arg(required = true)]
        urls: Vec<String>,
        /// Destination directory (defaults to the configured download_dir)
        #[arg(short, long)]
        folder: Option<String>,
    },

    /// Serve JSON-line requests on stdin, write replies and events to stdout
    Serve,

    /// Show or change configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the current configuration
    Show,
    /// Print the configuration file path
    Path,
    /// Set a value (agent_binary, download_dir, log_level)
    Set { key: String, value: String },
}

fn init_logging(cli: &Cli, config: &Config) {
    let level = if cli.verbose {
        Level::DEBUG
    } else if cli.quiet {
        Level::WARN
    } else {
        config.log_level.parse().unwrap_or(Level::INFO)
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Ctrl+C as a channel; each press sends one message.
fn interrupt_channel() -> Result<mpsc::UnboundedReceiver<()>> {
    let (tx, rx) = mpsc::unbounded_channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .context("Failed to install Ctrl+C handler")?;
    Ok(rx)
}

fn progress_style() -> Result<ProgressStyle> {
    Ok(ProgressStyle::with_template("{prefix:.bold} [{bar:30.cyan/blue}] {pos:>3}% {msg}")?
        .progress_chars("#=-"))
}

async fn run_get(config: &Config, urls: Vec<String>, folder: Option<String>) -> Result<()> {
    let hub = Arc::new(EventHub::new());
    let mut events = hub.subscribe();
    let supervisor = DownloadSupervisor::new(config.supervisor_config(), hub);
    let mut interrupts = interrupt_channel()?;

    let multi = MultiProgress::new();
    let style = progress_style()?;
    let mut bars: HashMap<DownloadId, ProgressBar> = HashMap::new();

    for url in &urls {
        match supervisor.start(url, folder.as_deref()).await {
            Ok(started) => {
                let bar = multi.add(ProgressBar::new(100));
                bar.set_style(style.clone());
                bar.set_prefix(started.download_id.to_string());
                bar.set_message(format!("-> {}", started.folder.display()));
                bars.insert(started.download_id, bar);
            }
            Err(e) => eprintln!("{} {}: {}", "[✗]".red(), url, e),
        }
    }

    if bars.is_empty() {
        bail!("No download could be started");
    }

    let mut failed = 0usize;
    let mut interrupted = false;

    while !bars.is_empty() {
        tokio::select! {
            Some(event) = events.recv() => match event {
                DownloadEvent::Progress { download_id, snapshot, status } => {
                    if let Some(bar) = bars.get(&download_id) {
                        bar.set_position(snapshot.progress_percent as u64);
                        let state = if status == DownloadStatus::Paused { " (paused)" } else { "" };
                        bar.set_message(format!(
                            "{} ETA {}{}",
                            snapshot.transfer_rate, snapshot.estimated_remaining, state
                        ));
                    }
                }
                DownloadEvent::Error { download_id, error } => {
                    let _ = multi.println(format!("{} {}: {}", "[!]".yellow(), download_id, error.trim_end()));
                }
                DownloadEvent::StatusChange { download_id, status } => {
                    if let Some(bar) = bars.get(&download_id) {
                        bar.set_message(status.to_string());
                    }
                }
                DownloadEvent::Complete { download_id, status, exit_code } => {
                    if let Some(bar) = bars.remove(&download_id) {
                        match status {
                            DownloadStatus::Completed => {
                                bar.set_position(100);
                                bar.finish_with_message(format!("{}", "done".green()));
                            }
                            DownloadStatus::Stopped => {
                                bar.abandon_with_message(format!("{}", "stopped".yellow()));
                            }
                            _ => {
                                failed += 1;
                                let code = exit_code.map(|c| c.to_string()).unwrap_or_else(|| "signal".to_string());
                                bar.abandon_with_message(format!("{} (exit {})", "failed".red(), code));
                            }
                        }
                    }
                }
            },
            Some(()) = interrupts.recv() => {
                if interrupted {
                    let _ = multi.println(format!("{} forcing shutdown", "[!]".yellow()));
                    break;
                }
                interrupted = true;
                let _ = multi.println(format!("{} stopping downloads (Ctrl+C again to force)", "[!]".yellow()));
                let ids: Vec<DownloadId> = bars.keys().cloned().collect();
                for id in ids {
                    if let Err(e) = supervisor.stop(&id).await {
                        tracing::warn!(download_id = %id, error = %e, "stop failed");
                    }
                }
            }
        }
    }

    let killed = supervisor.shutdown().await.unwrap_or(0);
    if killed > 0 {
        eprintln!("{} killed {} remaining download(s)", "[!]".yellow(), killed);
    }

    if failed > 0 {
        bail!("{} download(s) failed", failed);
    }
    Ok(())
}

async fn run_serve(config: &Config) -> Result<()> {
    let hub = Arc::new(EventHub::new());
    let events = hub.subscribe();
    let supervisor = DownloadSupervisor::new(config.supervisor_config(), hub);
    let mut interrupts = interrupt_channel()?;

    let input = BufReader::new(tokio::io::stdin());
    let output = tokio::io::stdout();

    tokio::select! {
        result = ipc::serve(&supervisor, events, input, output) => result?,
        _ = interrupts.recv() => tracing::info!("interrupted"),
    }

    let killed = supervisor.shutdown().await?;
    tracing::info!(killed, "serve finished");
    Ok(())
}

fn handle_config(command: Option<ConfigCommands>, mut config: Config) -> Result<()> {
    match command.unwrap_or(ConfigCommands::Show) {
        ConfigCommands::Show => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        ConfigCommands::Path => {
            let path: PathBuf = config_path()?;
            println!("{}", path.display());
        }
        ConfigCommands::Set { key, value } => {
            config.set(&key, &value)?;
            save_config(&config)?;
            println!("{} {} = {}", "[✓]".green(), key.bold(), value);
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config().context("Failed to load configuration")?;
    init_logging(&cli, &config);

    match cli.command {
        Commands::Config { command } => handle_config(command, config),
        Commands::Get { urls, folder } => {
            let runtime = tokio::runtime::Runtime::new().context("Failed to create Tokio runtime")?;
            let result = runtime.block_on(run_get(&config, urls, folder));
            runtime.shutdown_timeout(RUNTIME_SHUTDOWN_GRACE);
            result
        }
        Commands::Serve => {
            let runtime = tokio::runtime::Runtime::new().context("Failed to create Tokio runtime")?;
            let result = runtime.block_on(run_serve(&config));
            runtime.shutdown_timeout(RUNTIME_SHUTDOWN_GRACE);
            result
        }
    }
}
