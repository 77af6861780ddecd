//! Ferry CLI
//!
//! Direct peer-to-peer file handoff. `serve` runs the signaling coordinator;
//! `loopback` pushes a file through the whole pipeline in one process.

mod config;
mod loopback;
mod progress;

use clap::{Parser, Subcommand};
use console::style;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use config::Config;
use ferry_signal::{Coordinator, SignalServer};
use progress::format_bytes;

/// Ferry - hand a file straight to someone else
#[derive(Parser)]
#[command(name = "ferry")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Enable debug output (implies --verbose)
    #[arg(short, long)]
    debug: bool,

    /// Configuration file path
    #[arg(short, long, default_value = "~/.config/ferry/config.toml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the signaling server
    Serve {
        /// Listen address (overrides config and PORT)
        #[arg(short, long)]
        bind: Option<String>,

        /// Base URL used in share links
        #[arg(long)]
        public_url: Option<String>,
    },

    /// Transfer a file to an in-process receiver
    Loopback {
        /// File to send
        #[arg(required = true)]
        file: String,

        /// Directory the received copy is written to
        #[arg(short, long, default_value = ".")]
        output: String,
    },

    /// View configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show the effective configuration
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.debug {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "info"
    };

    tracing_subscriber::fmt().with_env_filter(log_level).init();

    let mut config = load_config(&cli.config)?;
    config.apply_port_override(std::env::var("PORT").ok().as_deref())?;
    config.validate()?;

    match cli.command {
        Commands::Serve { bind, public_url } => {
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            if let Some(public_url) = public_url {
                config.server.public_url = public_url;
            }
            config.validate()?;
            serve(&config).await?;
        }
        Commands::Loopback { file, output } => {
            run_loopback(Path::new(&file), Path::new(&output), &config).await?;
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                print!("{}", config.to_toml()?);
            }
        },
    }

    Ok(())
}

/// Resolve `path` (expanding a leading `~/`) and load it
///
/// A missing file at the default location falls back to defaults; a missing
/// file anywhere else is an error.
fn load_config(path: &str) -> anyhow::Result<Config> {
    let config_path = expand_home(path);

    if config_path.exists() {
        Config::load(&config_path)
    } else if config_path == Config::default_path() {
        Config::load_or_default()
    } else {
        Config::load(&config_path)
    }
}

fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(rest),
        None => PathBuf::from(path),
    }
}

/// Reject input paths with `..` components, canonicalizing existing ones
fn sanitize_input_path(path: &Path) -> anyhow::Result<PathBuf> {
    if path
        .components()
        .any(|c| matches!(c, std::path::Component::ParentDir))
    {
        anyhow::bail!("Path traversal attempt detected: path contains '..'");
    }
    if !path.is_file() {
        anyhow::bail!("File not found: {}", path.display());
    }
    Ok(path.canonicalize()?)
}

async fn serve(config: &Config) -> anyhow::Result<()> {
    let coordinator = Arc::new(Coordinator::new(config.coordinator_config()));
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let reaper = coordinator.spawn_reaper(config.sweep_interval(), shutdown_rx.clone());
    let server = SignalServer::bind(config.bind_addr()?, Arc::clone(&coordinator)).await?;
    let local_addr = server.local_addr();

    println!("{}", style("Ferry signaling server").bold());
    println!("Version: {}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Listening on: ws://{local_addr}");
    println!("Share links:  {}/receive/<room>", config.server.public_url.trim_end_matches('/'));
    println!("Room TTL:     {}s", config.rooms.ttl_secs);
    println!();
    println!("Ready. Press Ctrl+C to stop");

    let server_task = tokio::spawn(server.run(shutdown_rx));

    tokio::signal::ctrl_c().await?;
    println!("\nShutting down...");

    let _ = shutdown_tx.send(true);
    server_task.await??;
    reaper.await?;

    tracing::info!(
        "Stopped with {} rooms and {} connections live",
        coordinator.room_count(),
        coordinator.connection_count()
    );
    println!("Server stopped");
    Ok(())
}

async fn run_loopback(file: &Path, output: &Path, config: &Config) -> anyhow::Result<()> {
    let file = sanitize_input_path(file)?;
    let size = std::fs::metadata(&file)?.len();

    println!("File: {}", file.display());
    println!("Size: {}", format_bytes(size));
    println!();

    let report = loopback::run(&file, output, config, true).await?;

    println!();
    println!(
        "{} {} written to {}",
        style("Done:").green().bold(),
        format_bytes(report.bytes),
        report.saved_to.display()
    );
    println!("BLAKE3: {}", report.digest);
    println!("Progress updates relayed: {}", report.sender_updates);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_parse_serve() {
        let cli = Cli::parse_from(["ferry", "-v", "serve", "--bind", "127.0.0.1:9000"]);
        assert!(cli.verbose);
        assert!(!cli.debug);
        match cli.command {
            Commands::Serve { bind, public_url } => {
                assert_eq!(bind.as_deref(), Some("127.0.0.1:9000"));
                assert!(public_url.is_none());
            }
            _ => panic!("Expected serve command"),
        }
    }

    #[test]
    fn test_parse_loopback_defaults() {
        let cli = Cli::parse_from(["ferry", "loopback", "report.pdf"]);
        assert_eq!(cli.config, "~/.config/ferry/config.toml");
        match cli.command {
            Commands::Loopback { file, output } => {
                assert_eq!(file, "report.pdf");
                assert_eq!(output, ".");
            }
            _ => panic!("Expected loopback command"),
        }
    }

    #[test]
    fn test_parse_config_show() {
        let cli = Cli::parse_from(["ferry", "-d", "-c", "/tmp/ferry.toml", "config", "show"]);
        assert!(cli.debug);
        assert_eq!(cli.config, "/tmp/ferry.toml");
        assert!(matches!(
            cli.command,
            Commands::Config {
                action: ConfigAction::Show
            }
        ));
    }

    #[test]
    fn test_loopback_requires_file() {
        assert!(Cli::try_parse_from(["ferry", "loopback"]).is_err());
    }

    #[test]
    fn test_expand_home() {
        assert_eq!(expand_home("/etc/ferry.toml"), PathBuf::from("/etc/ferry.toml"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_home("~/x.toml"), home.join("x.toml"));
        }
    }

    #[test]
    fn test_load_config_explicit_missing_file_fails() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("missing.toml");
        assert!(load_config(path.to_str().unwrap()).is_err());
    }

    #[test]
    fn test_load_config_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("ferry.toml");
        fs::write(&path, "[rooms]\nttl_secs = 600\n").unwrap();

        let config = load_config(path.to_str().unwrap()).unwrap();
        assert_eq!(config.rooms.ttl_secs, 600);
    }

    #[test]
    fn test_sanitize_input_path() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("report.pdf");
        fs::write(&file_path, "test").unwrap();

        let sanitized = sanitize_input_path(&file_path).unwrap();
        assert!(sanitized.is_absolute());

        let err = sanitize_input_path(Path::new("../etc/passwd")).unwrap_err();
        assert!(err.to_string().contains("traversal"));

        assert!(sanitize_input_path(&temp_dir.path().join("absent.bin")).is_err());
        assert!(sanitize_input_path(temp_dir.path()).is_err());
    }
}
