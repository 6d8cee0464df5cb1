//! Dispatch email through a roster of providers
//!
//! Messages are deduplicated, rate limited, retried with backoff and failed
//! over between the providers configured in `courier.config.ron`.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use courier::{Courier, read_batch};
use courier_common::Message;

#[cfg(not(any(target_os = "macos", unix)))]
compile_error!("Only macos and unix are currently supported");

/// Reliable email dispatch
#[derive(Parser, Debug)]
#[command(name = "courier")]
#[command(about = "Dispatch email with deduplication, rate limiting and failover", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the configuration file (overrides `COURIER_CONFIG`)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Dispatch a single message
    Send {
        /// Recipient address
        #[arg(long)]
        to: String,

        #[arg(short, long, default_value = "")]
        subject: String,

        #[arg(short, long, default_value = "")]
        body: String,
    },
    /// Dispatch every message listed in a RON file
    Batch {
        /// File containing `[(recipient: .., subject: .., body: ..), ..]`
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = find_config_file(cli.config)?;
    let config_content = std::fs::read_to_string(&config_path).map_err(|e| {
        anyhow::anyhow!(
            "Failed to read config from {}: {}",
            config_path.display(),
            e
        )
    })?;
    let courier: Courier = ron::from_str(&config_content)?;

    let messages = match cli.command {
        Commands::Send { to, subject, body } => vec![Message::new(to, subject, body)],
        Commands::Batch { file } => read_batch(&file)?,
    };

    courier.run(messages).await
}

/// Find the configuration file using the following precedence:
/// 1. `--config` on the command line
/// 2. `COURIER_CONFIG` environment variable
/// 3. ./courier.config.ron (current working directory)
/// 4. /etc/courier/courier.config.ron (system-wide config)
fn find_config_file(explicit: Option<PathBuf>) -> anyhow::Result<PathBuf> {
    if let Some(path) = explicit {
        if path.exists() {
            return Ok(path);
        }
        anyhow::bail!("--config points to non-existent file: {}", path.display());
    }

    if let Ok(env_path) = std::env::var("COURIER_CONFIG") {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Ok(path);
        }
        anyhow::bail!(
            "COURIER_CONFIG points to non-existent file: {}",
            path.display()
        );
    }

    let default_paths = [
        PathBuf::from("./courier.config.ron"),
        PathBuf::from("/etc/courier/courier.config.ron"),
    ];

    for path in &default_paths {
        if path.exists() {
            return Ok(path.clone());
        }
    }

    let paths_tried = default_paths
        .iter()
        .map(|p| format!("  - {}", p.display()))
        .collect::<Vec<_>>()
        .join("\n");

    anyhow::bail!(
        "No configuration file found. Tried:\n  - COURIER_CONFIG environment variable\n{paths_tried}"
    )
}
