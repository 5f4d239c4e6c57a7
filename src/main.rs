//! OustPeer - Log-Driven P2P Abuse Blocker for Linux Gateways

use anyhow::Result;
use clap::Parser;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use oustpeer::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    let log_level = if cli.verbose {
        Level::DEBUG
    } else if cli.quiet {
        Level::ERROR
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Run => oustpeer::commands::run::run(&cli.config).await,
        Commands::Check { ip } => oustpeer::commands::check::run(&ip, &cli.config).await,
        Commands::Status => oustpeer::commands::status::run(&cli.config).await,
        Commands::Init { force } => oustpeer::commands::init::run(force, &cli.config),
        Commands::Version => {
            println!("oustpeer {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}
