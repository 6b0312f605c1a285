//! CLI command definitions and dispatch.

mod discover;
mod version;

use clap::{Parser, Subcommand};

/// addontrace - discover and verify Dockerfile add-ons.
#[derive(Parser)]
#[command(name = "addontrace", version, about)]
pub struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Log filter used when `RUST_LOG` is unset.
    pub fn log_level(&self) -> &'static str {
        match self.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }
}

/// Available commands.
#[derive(Subcommand)]
pub enum Command {
    /// Discover add-ons installed by a Dockerfile and verify them against an image
    Discover(discover::DiscoverArgs),
    /// Show version information
    Version(version::VersionArgs),
}

/// Dispatch a parsed CLI command.
pub async fn dispatch(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Command::Discover(args) => discover::execute(args).await,
        Command::Version(args) => version::execute(args).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_from_verbosity() {
        let cli = Cli::parse_from(["addontrace", "version"]);
        assert_eq!(cli.log_level(), "warn");
        let cli = Cli::parse_from(["addontrace", "-vv", "version"]);
        assert_eq!(cli.log_level(), "debug");
        let cli = Cli::parse_from(["addontrace", "version", "-vvvv"]);
        assert_eq!(cli.log_level(), "trace");
    }

    #[test]
    fn test_parse_discover_command() {
        let cli = Cli::parse_from([
            "addontrace",
            "discover",
            "-f",
            "build/Dockerfile",
            "-i",
            "app:1.0",
            "-o",
            "spdx",
            "--build-arg",
            "VERSION=2",
            "--no-daemon",
        ]);
        match cli.command {
            Command::Discover(args) => {
                assert!(args.no_daemon);
                assert_eq!(args.image.as_deref(), Some("app:1.0"));
            }
            _ => panic!("expected discover"),
        }
    }
}
