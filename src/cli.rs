use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Main CLI interface for `dblink`
#[derive(Parser)]
#[command(name = "dblink")]
#[command(version = crate::VERSION)]
#[command(about = "dblink - Configuration-driven database connections for MySQL and PostgreSQL")]
#[command(
    long_about = "Open, verify and inspect database connections using credentials from configuration and the environment"
)]
pub struct Cli {
    /// Configuration file (defaults to ./dblink.toml when present)
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// The command to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Open a connection, report the server and close it again
    Check,
    /// Probe the database through a connection pool
    Health {
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the resolved configuration with secrets redacted
    Config,
}

impl Cli {
    /// Parse command line arguments
    #[must_use]
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }
}
