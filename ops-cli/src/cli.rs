//! Command-line definition

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use uuid::Uuid;

/// Operator tool for the household survey sync engine
#[derive(Parser, Debug)]
#[command(name = "survey", version)]
#[command(about = "Inspect, drain and export the on-device survey store")]
pub struct Cli {
    /// Configuration file (YAML or TOML)
    #[arg(short, long, env = "SURVEY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Command {
    /// Show record counts, queue depth and last sync time
    Status,

    /// Drain the queue once, even if the remote looks unreachable
    Sync,

    /// Run the sync loop until interrupted
    Run,

    /// Export local data
    #[command(subcommand)]
    Export(ExportCommand),

    /// Inspect or repair the mutation queue
    #[command(subcommand)]
    Queue(QueueCommand),

    /// Delete local survey data
    Clear {
        /// Clear even if entries are still waiting to sync
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum ExportCommand {
    /// Full JSON dump of every collection
    Backup {
        /// Output file; defaults to bogia_survey_backup_<date>.json
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Household table as CSV
    Table(TableArgs),
}

#[derive(Args, Debug, PartialEq)]
pub struct TableArgs {
    /// Output file; `-` writes to stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    #[arg(long)]
    pub ward: Option<String>,

    #[arg(long)]
    pub llg: Option<String>,

    /// pending, synced or error
    #[arg(long)]
    pub status: Option<String>,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum QueueCommand {
    /// List queued entries in drain order
    List,

    /// Clear backoff so every entry is retried on the next drain
    Retry,

    /// Remove one entry without applying it; its record is marked error
    Discard { id: Uuid },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_nested_commands() {
        let cli = Cli::try_parse_from(["survey", "-v", "queue", "list"]).unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.command, Command::Queue(QueueCommand::List));

        let cli = Cli::try_parse_from(["survey", "clear", "--force"]).unwrap();
        assert_eq!(cli.command, Command::Clear { force: true });

        let cli = Cli::try_parse_from([
            "survey", "export", "table", "--ward", "Ward 4", "--status", "pending", "-o", "-",
        ])
        .unwrap();
        let Command::Export(ExportCommand::Table(args)) = cli.command else {
            panic!("expected export table");
        };
        assert_eq!(args.ward.as_deref(), Some("Ward 4"));
        assert_eq!(args.output, Some(PathBuf::from("-")));
    }

    #[test]
    fn test_discard_requires_uuid() {
        assert!(Cli::try_parse_from(["survey", "queue", "discard", "not-a-uuid"]).is_err());

        let id = Uuid::new_v4();
        let id_arg = id.to_string();
        let cli = Cli::try_parse_from(["survey", "queue", "discard", id_arg.as_str()]).unwrap();
        assert_eq!(cli.command, Command::Queue(QueueCommand::Discard { id }));
    }
}
