//! seesay CLI, the operator console.

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use tracing_subscriber::filter::{Directive, EnvFilter};

mod commands;

#[derive(Parser)]
#[command(name = "seesay", version, about = "See&Say language assessment console")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an assessment session from the console
    Run {
        /// Catalog CSV path or URL (overrides config)
        #[arg(long)]
        catalog: Option<String>,

        /// Asset base directory or URL (overrides config)
        #[arg(long)]
        assets: Option<String>,

        /// Session state file (overrides config)
        #[arg(long)]
        store: Option<PathBuf>,

        /// Output directory for session reports (overrides config)
        #[arg(long)]
        output: Option<PathBuf>,

        /// Simulate a refused microphone
        #[arg(long)]
        no_mic: bool,

        /// Config file path
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Validate a question catalog
    Validate {
        /// Catalog CSV path or URL
        #[arg(long)]
        catalog: String,
    },

    /// Clear every persisted session field
    Reset {
        /// Session state file (overrides config)
        #[arg(long)]
        store: Option<PathBuf>,

        /// Config file path
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Show the persisted session fields
    Status {
        /// Session state file (overrides config)
        #[arg(long)]
        store: Option<PathBuf>,

        /// Config file path
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Create a starter config
    Init,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let mut filter = EnvFilter::from_default_env();
    if let Ok(directive) = "seesay=info".parse::<Directive>() {
        filter = filter.add_directive(directive);
    }
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run {
            catalog,
            assets,
            store,
            output,
            no_mic,
            config,
        } => {
            commands::run::execute(commands::run::RunOptions {
                catalog,
                assets,
                store,
                output,
                no_mic,
                config,
            })
            .await
        }
        Commands::Validate { catalog } => commands::validate::execute(catalog).await,
        Commands::Reset { store, config } => commands::reset::execute(store, config),
        Commands::Status { store, config } => commands::status::execute(store, config),
        Commands::Init => commands::init::execute(),
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}
