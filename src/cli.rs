use clap::{ArgAction, Parser, Subcommand};
use p4sync::DEFAULT_CHANGELIST;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "p4sync")]
#[command(about = "Sync, unshelve and clean Perforce workspaces", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Config file (default: <config dir>/p4sync/config.toml)
    #[arg(long, global = true, env = "P4SYNC_CONFIG")]
    pub config: Option<PathBuf>,

    /// Verbosity (-v debug, -vv trace). RUST_LOG takes precedence.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Register the configured workspace and sync it
    Sync {
        /// File specs to sync (default: whole workspace)
        files: Vec<String>,

        /// Use the workspace as it exists on the server, without re-registering
        #[arg(long)]
        no_create: bool,

        /// Resync files the have-list reports as current (-f)
        #[arg(short, long)]
        force: bool,

        /// Preview only (-n)
        #[arg(short = 'n', long)]
        preview: bool,

        /// Parallel transfer threads, overrides [parallel].threads
        #[arg(long)]
        threads: Option<i64>,
    },

    /// Unshelve a changelist into the configured workspace
    Unshelve {
        /// Shelved changelist to restore
        #[arg(short, long)]
        source: i32,

        /// Target changelist (0 = default changelist, -1 = server default)
        #[arg(
            short = 'c',
            long,
            default_value_t = DEFAULT_CHANGELIST,
            allow_negative_numbers = true
        )]
        target: i32,

        /// Overwrite writable files (-f)
        #[arg(short, long)]
        force: bool,
    },

    /// Reconcile the workspace back to the depot's state
    Cleanup,

    /// Register the configured workspace on the server
    CreateWorkspace,

    /// Delete a workspace from the server
    DeleteWorkspace {
        /// Workspace name (default: the configured workspace)
        name: Option<String>,

        /// Delete even with opened files or another owner (-f)
        #[arg(short, long)]
        force: bool,
    },

    /// List recent submitted changelists
    Changes {
        /// Maximum number of changelists
        #[arg(short, long, default_value_t = 10)]
        max: i32,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_sync_with_files() {
        let cli = Cli::parse_from(["p4sync", "sync", "-f", "--threads", "4", "//depot/main/..."]);
        match cli.command {
            Command::Sync {
                files,
                force,
                threads,
                no_create,
                ..
            } => {
                assert_eq!(files, vec!["//depot/main/..."]);
                assert!(force);
                assert!(!no_create);
                assert_eq!(threads, Some(4));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_unshelve_negative_target() {
        let cli = Cli::parse_from(["p4sync", "unshelve", "-s", "1234", "-c", "-1"]);
        match cli.command {
            Command::Unshelve { source, target, .. } => {
                assert_eq!(source, 1234);
                assert_eq!(target, -1);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_unshelve_target_defaults_to_default_changelist() {
        let cli = Cli::parse_from(["p4sync", "unshelve", "--source", "9"]);
        assert!(matches!(
            cli.command,
            Command::Unshelve { target: DEFAULT_CHANGELIST, .. }
        ));
    }
}
