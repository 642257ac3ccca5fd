use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "tdeploy")]
#[command(version)]
#[command(about = "Dependency-ordered cluster deployments", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Config file (defaults to ./tdeploy.toml, then the config directory)
    #[arg(long, global = true, env = "TDEPLOY_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Build the operation graph and report every problem
    Validate {
        /// Reconfiguration rules to check against the graph
        #[arg(long)]
        rules: Option<PathBuf>,
    },

    /// Print the ordered plan for a selection
    Dag(SelectionArgs),

    /// Deploy a selection of operations
    Deploy(DeployArgs),

    /// Resume an unfinished deployment
    Resume {
        /// Deployment to resume (defaults to the most recent)
        id: Option<u64>,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Re-run operations impacted by configuration changes
    Reconfigure {
        /// Only consider these services (defaults to all)
        #[arg(short, long = "service")]
        services: Vec<String>,

        /// Show the plan without running it
        #[arg(long)]
        dry_run: bool,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Manage versioned service configuration
    #[command(subcommand)]
    Versions(VersionsCommand),

    /// List past deployments
    History {
        /// Number of deployments to show
        #[arg(short = 'n', long, default_value_t = 20)]
        limit: usize,
    },

    /// Show one deployment
    Show {
        id: u64,

        /// Print the full record as JSON
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Graph selection shared by `dag` and `deploy`
#[derive(Args, Debug, Default)]
pub struct SelectionArgs {
    /// Deploy up to these operations, including everything they need
    #[arg(short, long = "target")]
    pub targets: Vec<String>,

    /// Deploy from these operations, including everything depending on them
    #[arg(short, long = "source")]
    pub sources: Vec<String>,

    /// Keep only operations whose name matches this glob
    #[arg(long, conflicts_with = "regex")]
    pub glob: Option<String>,

    /// Keep only operations whose name matches this regex (anchored at the start)
    #[arg(long)]
    pub regex: Option<String>,
}

#[derive(Args, Debug)]
pub struct DeployArgs {
    #[command(flatten)]
    pub selection: SelectionArgs,

    /// Run exactly these operations, in graph order
    #[arg(
        short,
        long = "operation",
        conflicts_with_all = ["targets", "sources", "glob", "regex"]
    )]
    pub operations: Vec<String>,

    /// Show the plan without running it
    #[arg(long)]
    pub dry_run: bool,

    /// Keep going after a failed operation
    #[arg(long)]
    pub keep_going: bool,

    #[command(flatten)]
    pub run: RunArgs,
}

/// Options shared by commands that run a plan
#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// Pretend every operation succeeds instead of running the executor
    #[arg(long)]
    pub mock: bool,

    /// Skip confirmation prompts
    #[arg(short, long)]
    pub yes: bool,
}

#[derive(Subcommand)]
pub enum VersionsCommand {
    /// Current version of every service
    List,

    /// History of a service, newest first
    Log { service: String },

    /// Record a directory as the new configuration of a service
    Commit {
        service: String,

        /// Directory holding the service's configuration files
        dir: PathBuf,

        /// Description of the change
        #[arg(short, long)]
        message: String,
    },

    /// Files changed between two versions (`to` defaults to the current one)
    Diff {
        service: String,
        from: String,
        to: Option<String>,

        /// Show line changes, not just paths
        #[arg(long)]
        content: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_deploy_arguments() {
        let cli = Cli::try_parse_from([
            "tdeploy", "deploy", "-t", "hdfs_init", "--glob", "hdfs_*", "--keep-going", "--mock",
        ])
        .unwrap();
        match cli.command {
            Command::Deploy(args) => {
                assert_eq!(args.selection.targets, vec!["hdfs_init"]);
                assert_eq!(args.selection.glob.as_deref(), Some("hdfs_*"));
                assert!(args.keep_going);
                assert!(args.run.mock);
                assert!(!args.run.yes);
            }
            _ => panic!("expected deploy"),
        }
    }

    #[test]
    fn test_operations_conflict_with_selection() {
        assert!(
            Cli::try_parse_from(["tdeploy", "deploy", "-o", "a_config", "-t", "b_config"])
                .is_err()
        );
        assert!(
            Cli::try_parse_from(["tdeploy", "dag", "--glob", "a*", "--regex", "a"]).is_err()
        );
    }
}
