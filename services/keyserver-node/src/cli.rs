use clap::{Parser, Subcommand};
use std::path::PathBuf;

const DEFAULT_CONFIG: &str = "config.json";

#[derive(Parser, Debug)]
#[command(name = "keyserver", version, about = "Fleet key-chain rotation service")]
pub struct Cli {
    #[arg(
        long,
        short,
        global = true,
        env = "KEYSERVER_CONFIG",
        default_value = DEFAULT_CONFIG,
        help = "Fleet configuration file (.json or .toml)"
    )]
    pub config: PathBuf,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the rotation loop and serve metrics
    Run {
        #[arg(long, default_value_t = false, help = "Run a single cycle and exit")]
        once: bool,
    },
    /// Read the fleet and print its key-chain state without changing it
    Status,
    /// Load and validate the configuration
    Validate,
}
