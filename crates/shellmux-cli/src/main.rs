//! shellmux — attach the local terminal to a persistent project shell.
//!
//! Connects to the shell host over WebSocket, authenticating with a token,
//! and pipes the local terminal to the remote session.

mod commands;
mod config;
mod terminal;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::error;
use tracing_subscriber::EnvFilter;

use shellmux_core::Project;

use crate::config::{Config, Overrides};

/// shellmux — persistent terminal sessions
#[derive(Parser)]
#[command(name = "shellmux", version, about = "Persistent terminal sessions over WebSocket")]
struct Cli {
    /// Auth token (defaults to $SHELLMUX_TOKEN)
    #[arg(long, global = true)]
    token: Option<String>,

    /// Address of the page the shell is served from
    #[arg(long = "page-url", global = true)]
    page_url: Option<String>,

    /// Configuration endpoint (defaults to <page-url>/api/config)
    #[arg(long = "config-url", global = true)]
    config_url: Option<String>,

    /// Config file path
    #[arg(long = "config", global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Attach to a project shell
    Connect {
        /// Project name
        #[arg(long)]
        project: String,

        /// Project directory on the shell host
        #[arg(long)]
        path: String,

        /// Session to resume
        #[arg(long)]
        session: Option<String>,

        /// Font size hint for the session
        #[arg(long = "font-size")]
        font_size: Option<u16>,
    },

    /// Print the socket endpoint a connect would use (token redacted)
    Endpoint,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Logs go to stderr so they never mix with session output.
    let default_filter = if cli.verbose {
        "shellmux=debug,shellmux_cli=debug,shellmux_client=debug,shellmux_core=debug"
    } else {
        "shellmux=warn,shellmux_cli=warn,shellmux_client=warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
        .with_target(cli.verbose)
        .with_writer(std::io::stderr)
        .init();

    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);
    let cfg = match Config::load(&config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("shellmux: {e:#}");
            std::process::exit(1);
        }
    };

    let token = cli
        .token
        .clone()
        .or_else(|| std::env::var("SHELLMUX_TOKEN").ok())
        .filter(|t| !t.is_empty());

    let font_size = match &cli.command {
        Command::Connect { font_size, .. } => *font_size,
        Command::Endpoint => None,
    };
    let settings = cfg.settings(Overrides {
        page_url: cli.page_url.clone(),
        config_url: cli.config_url.clone(),
        font_size,
    });

    let result = match cli.command {
        Command::Connect {
            project,
            path,
            session,
            ..
        } => {
            let project = Project::new(project, path);
            commands::connect::run(&settings, project, session, token).await
        }
        Command::Endpoint => commands::endpoint::run(&settings, token.as_deref()).await,
    };

    if let Err(e) = result {
        error!("{:#}", e);
        eprintln!("shellmux: {e:#}");
        std::process::exit(1);
    }
}
