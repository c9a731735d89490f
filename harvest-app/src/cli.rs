use clap::{Parser, Subcommand};
use harvest_drivers::harvest_browser::pacing::SequenceName;
use std::path::PathBuf;

/// Lead harvesting toolkit: job store maintenance, CSV migration, pacing previews.
#[derive(Parser, Debug)]
#[command(name = "harvest")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// YAML configuration file. Without it `harvest.yaml` is read when present.
    #[arg(short = 'c', long = "config", env = "HARVEST_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create directories, load persisted jobs, and prune expired ones.
    Startup,

    /// Inspect or prune the job store.
    Jobs {
        #[command(subcommand)]
        command: JobsCommand,
    },

    /// Write JSON-lines profile records to a CSV file.
    Export {
        /// One JSON object per line, keyed by canonical column keys.
        #[arg(short = 'i', long = "input")]
        input: PathBuf,
        /// Relative paths resolve against `export.output_dir`.
        destination: PathBuf,
        /// Replace existing rows instead of appending.
        #[arg(long)]
        overwrite: bool,
    },

    /// Rewrite legacy CSV files onto the canonical header.
    Migrate {
        /// Files, or directories whose `*.csv` files are migrated.
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Preview pacing behaviour.
    Pacing {
        #[command(subcommand)]
        command: PacingCommand,
    },
}

#[derive(Subcommand, Debug)]
pub enum JobsCommand {
    /// Print every persisted job as JSON lines.
    List,
    /// Delete terminal jobs older than the threshold.
    Cleanup {
        /// Defaults to `jobs.retention_days`.
        #[arg(long = "max-age-days")]
        max_age_days: Option<u64>,
    },
}

#[derive(Subcommand, Debug)]
pub enum PacingCommand {
    /// Print the delays a named wait sequence would take.
    Plan {
        /// e.g. after-navigation, before-next-page, rate-limit-cooldown
        sequence: SequenceName,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_nested_subcommands() {
        let cli = Cli::try_parse_from(["harvest", "jobs", "cleanup", "--max-age-days", "7"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Jobs {
                command: JobsCommand::Cleanup {
                    max_age_days: Some(7)
                }
            }
        ));

        let cli = Cli::try_parse_from(["harvest", "pacing", "plan", "warmup"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Pacing {
                command: PacingCommand::Plan {
                    sequence: SequenceName::Warmup
                }
            }
        ));
    }

    #[test]
    fn export_takes_input_and_destination() {
        let cli = Cli::try_parse_from(["harvest", "export", "-i", "rows.jsonl", "leads.csv"]).unwrap();
        let Command::Export {
            input,
            destination,
            overwrite,
        } = cli.command
        else {
            panic!("expected export");
        };
        assert_eq!(input, PathBuf::from("rows.jsonl"));
        assert_eq!(destination, PathBuf::from("leads.csv"));
        assert!(!overwrite);
        assert!(Cli::try_parse_from(["harvest", "export", "leads.csv"]).is_err());
    }

    #[test]
    fn migrate_requires_a_path() {
        assert!(Cli::try_parse_from(["harvest", "migrate"]).is_err());
        assert!(Cli::try_parse_from(["harvest", "pacing", "plan", "nope"]).is_err());
    }
}
