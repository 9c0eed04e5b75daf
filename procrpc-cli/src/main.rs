//! procrpc-cli - Command-line interface for procrpc
//!
//! One-shot calls against the demo program of a `procrpc` server.

mod commands;

use clap::{Parser, Subcommand};
use colored::Colorize;
use procrpc_client::Client;
use procrpc_protocol::SimpleTicket;
use procrpc_transport::Config;
use std::net::SocketAddr;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "procrpc-cli")]
#[command(about = "Command-line interface for procrpc servers")]
#[command(version)]
struct Cli {
    /// Server address (defaults to network.bind_addr from the config)
    #[arg(short, long, env = "PROCRPC_SERVER")]
    server: Option<SocketAddr>,

    /// Per-attempt reply timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Retries after the first attempt times out
    #[arg(short, long)]
    retries: Option<u32>,

    /// Send a simple ticket with this id
    #[arg(short = 't', long, env = "PROCRPC_TICKET")]
    ticket: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Ping the server
    Ping,

    /// Ask the server to echo a string
    Echo {
        /// Text to send
        text: String,
    },

    /// Get server info
    Info,
}

impl Cli {
    /// Applies command-line overrides on top of the loaded config.
    fn apply(&self, config: &mut Config) {
        if let Some(server) = self.server {
            config.network.bind_addr = server;
        }
        if let Some(timeout_ms) = self.timeout_ms {
            config.client.request_timeout_ms = timeout_ms;
        }
        if let Some(retries) = self.retries {
            config.client.max_retries = retries;
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = Config::load()?;
    cli.apply(&mut config);
    debug!(
        server = %config.network.bind_addr,
        timeout_ms = config.client.request_timeout_ms,
        retries = config.client.max_retries,
        "calling server"
    );

    let mut client = Client::from_config(&config).map_err(|e| {
        eprintln!("{}: {}", "Connection failed".red(), e);
        e
    })?;
    if let Some(ref id) = cli.ticket {
        client.set_ticket(SimpleTicket::new(id.as_str()));
    }

    match commands::execute(&mut client, cli.command) {
        Ok(output) => {
            println!("{}", output);
        }
        Err(e) => {
            eprintln!("{}: {}", "Error".red(), e);
            std::process::exit(1);
        }
    }

    Ok(())
}
