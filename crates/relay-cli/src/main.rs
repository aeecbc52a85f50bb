mod cmd;
mod output;

use clap::{Parser, Subcommand};
use cmd::state::StateSubcommand;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "relay",
    about = "Commerce platform trigger relay: webhook server and running-state tools",
    version,
    propagate_version = true
)]
struct Cli {
    /// YAML configuration file (defaults apply when omitted)
    #[arg(long, short = 'c', global = true, env = "RELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the webhook server
    Serve {
        /// Port to listen on (overrides server.port)
        #[arg(long, env = "RELAY_PORT")]
        port: Option<u16>,
    },

    /// Inspect or steer a store's running-state document
    State {
        /// redb file (overrides server.state_db)
        #[arg(long, global = true)]
        db: Option<PathBuf>,

        #[command(subcommand)]
        subcommand: StateSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Serve { .. } => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .init();

    let config = cli.config.as_deref();
    let result = match cli.command {
        Commands::Serve { port } => cmd::serve::run(config, port),
        Commands::State { db, subcommand } => {
            cmd::state::run(config, db.as_deref(), subcommand, cli.json)
        }
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
