use clap::{Parser, Subcommand};
use hybrid_pos::storage;
use std::process;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the terminal core until Ctrl-C (default)
    Run,
    /// Store the remote document store URL and API key in the OS keyring
    Configure {
        url: String,
        #[arg(long)]
        api_key: Option<String>,
    },
    /// Remove the stored remote configuration; sync is disabled afterwards
    Forget,
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => hybrid_pos::run(),
        Commands::Configure { url, api_key } => {
            storage::configure_remote(&url, api_key.as_deref()).map_err(anyhow::Error::msg)
        }
        Commands::Forget => storage::clear_remote().map_err(anyhow::Error::msg),
    };

    if let Err(e) = result {
        eprintln!("hybrid-pos: {e:#}");
        process::exit(1);
    }
}
