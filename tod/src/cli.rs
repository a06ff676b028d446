//! CLI command definitions

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// todod - Markdown todo task daemon
#[derive(Parser)]
#[command(
    name = "todod",
    about = "Watches markdown todo files and drives LLM edits for pending tasks",
    version
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// CLI subcommands
#[derive(Subcommand)]
pub enum Command {
    /// Run the daemon in the foreground
    Serve,

    /// Load and print the effective configuration, then exit
    CheckConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_serve() {
        let cli = Cli::try_parse_from(["todod", "serve"]).unwrap();
        assert!(matches!(cli.command, Some(Command::Serve)));
        assert!(!cli.verbose);
    }

    #[test]
    fn test_parse_config_flag() {
        let cli = Cli::try_parse_from(["todod", "--config", "/etc/todod.yml", "serve"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/etc/todod.yml")));
    }
}
