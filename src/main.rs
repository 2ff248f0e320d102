//! zdde - command-line client for a running Zemax instance.
//!
//! Opens one link, runs a single command and prints the reply.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use zdde::codec::regress_literal;
use zdde::{Arg, ChannelRegistry, LinkConfig, ZemaxLink};

#[derive(Parser, Debug)]
#[command(name = "zdde")]
#[command(version, about = "Send commands to a running Zemax instance")]
struct Cli {
    /// Request timeout in seconds (overrides the configuration)
    #[arg(short, long, global = true)]
    timeout: Option<f64>,

    /// Configuration file (defaults to $ZDDE_CONFIG or <config_dir>/zdde/config.json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send a raw command string and print the raw reply
    Send {
        /// Full command, e.g. "GetSurfaceData,2,3"
        command: String,
    },
    /// Send a named command and print the decoded fields as JSON
    Call {
        /// Command name, e.g. GetTrace
        name: String,
        /// Arguments; numbers are sent as numbers, anything else as text
        #[arg(allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Print the version of the running peer
    Version,
    /// Print the peer names and the sockets they map to
    Names,
}

fn load_config(cli: &Cli) -> Result<LinkConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let mut config = LinkConfig::from_file(path)?;
            config.apply_env(|key| std::env::var(key).ok())?;
            config
        }
        None => LinkConfig::load()?,
    };
    if let Some(secs) = cli.timeout {
        config.timeout_secs = secs;
    }
    config.validate()?;
    Ok(config)
}

fn open_link(registry: Arc<ChannelRegistry>) -> Result<ZemaxLink> {
    ZemaxLink::connect_with(registry).context("Failed to open a link to Zemax")
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.debug { "zdde=debug" } else { "zdde=info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.into()),
        ))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let config = load_config(&cli)?;
    info!(
        "zdde v{} (timeout {:?})",
        env!("CARGO_PKG_VERSION"),
        config.timeout()
    );
    let registry = Arc::new(ChannelRegistry::with_sockets(&config));

    match cli.command {
        Command::Send { command } => {
            let link = open_link(registry)?;
            let reply = link.request(&command)?;
            println!("{}", reply.trim_end());
        }
        Command::Call { name, args } => {
            let args: Vec<Arg> = args
                .iter()
                .map(|raw| Arg::from(regress_literal(raw)))
                .collect();
            let link = open_link(registry)?;
            let reply = link.send(&name, &args)?;
            println!("{}", serde_json::to_string(reply.values())?);
        }
        Command::Version => {
            let link = open_link(registry)?;
            println!("{}", link.get_version()?);
        }
        Command::Names => {
            for name in registry.peer_names() {
                println!("{}\t{}", name, config.socket_path(name).display());
            }
        }
    }

    Ok(())
}
