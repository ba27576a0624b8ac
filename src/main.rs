//! Unified vncrelay CLI.
//!
//! - `vncrelay serve` - Run the relay
//! - `vncrelay check` - Validate a configuration file and print its listeners

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use vncrelay_config::{load_config, validate_config};

/// vncrelay unified CLI.
#[derive(Parser)]
#[command(
    name = "vncrelay",
    version,
    about = "WebSocket/TCP relay for browser VNC viewers",
    propagate_version = true
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the relay.
    #[command(name = "serve", alias = "server")]
    Serve(Box<vncrelay_server::ServerArgs>),

    /// Validate a configuration file without starting the relay.
    #[command(name = "check")]
    Check(CheckArgs),
}

#[derive(Args)]
struct CheckArgs {
    /// Config file path (json/jsonc/yaml/toml)
    #[arg(short, long)]
    config: PathBuf,
}

fn check(args: CheckArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(&args.config)?;
    validate_config(&config)?;
    println!("{}: ok", args.config.display());
    for listener in &config.listeners {
        println!(
            "  {} {} -> {} ({})",
            listener.display_name(),
            listener.listen,
            listener.target,
            listener.transport
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Serve(args) => vncrelay_server::cli::run(*args).await,
        Commands::Check(args) => check(args),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
