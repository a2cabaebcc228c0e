//! CLI argument parsing with clap

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};

/// Tessera - session consistency and resilience tooling
#[derive(Parser, Debug)]
#[command(name = "tessera")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Directory holding resilience.yaml (defaults to ~/.tessera)
    #[arg(long, global = true, env = "TESSERA_CONFIG_DIR")]
    pub config_dir: Option<Utf8PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Session token inspection
    #[command(subcommand)]
    Token(TokenCommands),

    /// Resilience configuration
    #[command(subcommand)]
    Config(ConfigCommands),
}

// Token commands
#[derive(Subcommand, Debug)]
pub enum TokenCommands {
    /// Parse a token or a composite session header and print its parts
    Parse(TokenParseArgs),

    /// Merge two tokens of the same partition
    Merge(TokenMergeArgs),

    /// Check whether a candidate token satisfies a required one
    Satisfies(TokenSatisfiesArgs),
}

#[derive(Args, Debug)]
pub struct TokenParseArgs {
    /// Token (`1#100#1=20`) or header (`0:1#100#1=20,1:1#50`)
    pub token: String,
}

#[derive(Args, Debug)]
pub struct TokenMergeArgs {
    pub left: String,
    pub right: String,
}

#[derive(Args, Debug)]
pub struct TokenSatisfiesArgs {
    /// Token the read must have caught up with
    #[arg(long)]
    pub required: String,

    /// Token of the replica being read from
    #[arg(long)]
    pub candidate: String,
}

// Config commands
#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Show the resolved resilience configuration
    Show(ConfigShowArgs),
}

#[derive(Args, Debug)]
pub struct ConfigShowArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,

    /// Show only the embedded defaults
    #[arg(long)]
    pub defaults: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_satisfies_flags() {
        let cli = Cli::parse_from([
            "tessera",
            "token",
            "satisfies",
            "--required",
            "1#100",
            "--candidate",
            "1#120",
        ]);
        match cli.command {
            Commands::Token(TokenCommands::Satisfies(args)) => {
                assert_eq!(args.required, "1#100");
                assert_eq!(args.candidate, "1#120");
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::parse_from(["tessera", "config", "show", "--json", "-vv"]);
        assert_eq!(cli.verbose, 2);
        assert!(matches!(
            cli.command,
            Commands::Config(ConfigCommands::Show(ConfigShowArgs { json: true, .. }))
        ));
    }
}
