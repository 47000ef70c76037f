use clap::{ArgAction, Args, Parser, Subcommand};
use tracing::Level;

use crate::cli::commands::{
    controls::ControlsArgs, findings::FindingsArgs, identity::IdentityArgs, query::QueryArgs,
    swimlanes::SwimlanesArgs,
};

#[deny(missing_docs)]
#[derive(Parser, Debug)]
#[command(version = env!("CARGO_PKG_VERSION"))]
/// sonraictl - bulk query and maintenance utilities for the Sonrai
/// security-posture API
pub struct CommandLineArgs {
    /// The command to execute
    #[command(subcommand)]
    pub command: Command,

    /// Global arguments that apply to all subcommands
    #[command(flatten)]
    pub global_args: GlobalArgs,
}

impl CommandLineArgs {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        CommandLineArgs::parse()
    }
}

/// Top-level subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a GraphQL query from a file and print or export the results
    Query(QueryArgs),

    /// Bulk operations on findings: comment, assign, status changes, export
    Findings(FindingsArgs),

    /// Swimlane maintenance driven by template swimlanes
    #[command(subcommand)]
    Swimlanes(SwimlanesArgs),

    /// Pair cloud identities by tagging both sides of a mapping
    Identity(IdentityArgs),

    /// Migrate permission-firewall control states between accounts
    Controls(ControlsArgs),
}

/// Top-level global CLI arguments
#[derive(Args, Debug, Clone, Default)]
#[command(next_help_heading = "Global Options")]
pub struct GlobalArgs {
    /// Enable verbose output (up to 2 times for more detail)
    #[arg(global = true, long = "verbose", short = 'v', action = ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error messages and disable progress bars
    #[arg(global = true, long, short)]
    pub quiet: bool,

    /// Ignore TLS certificate validation
    #[arg(global = true, long)]
    pub ignore_certs: bool,
}

impl GlobalArgs {
    pub fn use_progress(&self) -> bool {
        use std::io::IsTerminal;
        !self.quiet && std::io::stderr().is_terminal()
    }

    pub fn log_level(&self) -> Level {
        if self.quiet {
            Level::ERROR
        } else {
            match self.verbose {
                0 => Level::INFO,  // Default level if no `-v` is provided
                1 => Level::DEBUG, // `-v`
                _ => Level::TRACE, // `-vv` or more
            }
        }
    }
}
