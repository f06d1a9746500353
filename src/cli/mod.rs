//! CLI argument definitions for Tsubame.

use clap::{Parser, Subcommand};

/// Tsubame - persistent, filterable message streams for your social feeds.
///
/// Start with `tsb account add` to register an account, then `tsb init` to
/// create the default streams.
#[derive(Parser, Debug)]
#[command(name = "tsb")]
#[command(author, version, about = "Persistent, filterable message streams for social feeds", long_about = None)]
pub struct Cli {
    /// Output in human-readable format instead of JSON
    #[arg(short = 'H', long = "human", global = true)]
    pub human_readable: bool,

    /// Use <path> as the data directory.
    /// Can also be set via TSUBAME_DATA_DIR environment variable.
    #[arg(long = "data-dir", global = true, env = "TSUBAME_DATA_DIR")]
    pub data_dir: Option<std::path::PathBuf>,

    /// Log level or tracing filter directive (overrides config)
    #[arg(long = "log-level", global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Top-level commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create the timeline, mentions and favourites streams for every account
    ///
    /// Existing streams are kept. Each new stream is refreshed once.
    Init,

    /// Stream management commands
    Stream {
        #[command(subcommand)]
        command: StreamCommands,
    },

    /// Message source commands (what a stream fetches)
    Source {
        #[command(subcommand)]
        command: SourceCommands,
    },

    /// Filter commands (what a stream keeps)
    Filter {
        #[command(subcommand)]
        command: FilterCommands,
    },

    /// Local user list commands
    List {
        #[command(subcommand)]
        command: ListCommands,
    },

    /// Upstream account commands
    Account {
        #[command(subcommand)]
        command: AccountCommands,
    },

    /// Configuration commands
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

/// Stream subcommands
#[derive(Subcommand, Debug)]
pub enum StreamCommands {
    /// List streams in display order
    List,

    /// Show a stream with its sources, filters and messages
    Show {
        /// Stream name
        name: String,

        /// Show at most this many of the newest messages
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
    },

    /// Create an empty stream
    Create {
        /// Stream name (must be unique)
        name: String,

        /// Stream description
        #[arg(short, long, default_value = "")]
        description: String,
    },

    /// Delete a stream
    Delete {
        /// Stream name
        name: String,

        /// Also delete its sources, filters and message caches
        #[arg(long)]
        purge: bool,
    },

    /// Fetch new messages (all streams when no name is given)
    Refresh {
        /// Stream name
        name: Option<String>,
    },

    /// Rename a stream
    Rename {
        /// Current stream name
        name: String,

        /// New stream name
        new_name: String,
    },

    /// Move a stream to a new position
    Move {
        /// Stream name
        name: String,

        /// Target position (0-based)
        index: usize,
    },
}

/// Source subcommands
#[derive(Subcommand, Debug)]
pub enum SourceCommands {
    /// Add a message source to a stream
    Add {
        /// Stream name
        stream: String,

        /// Source kind
        #[arg(value_parser = ["home-timeline", "mentions", "favourites", "user-posts", "user-favourites", "remote-list", "local-list"])]
        kind: String,

        /// Username, remote list id, or local list name the source follows
        #[arg(short, long)]
        target: Option<String>,

        /// Account to fetch through (defaults to the first account)
        #[arg(short, long)]
        account: Option<String>,

        /// Keep fetched messages in a persistent cache
        #[arg(long)]
        cache: bool,

        /// Add the source disabled
        #[arg(long)]
        disabled: bool,
    },

    /// List the sources of a stream
    List {
        /// Stream name
        stream: String,
    },

    /// Remove the source at a position
    Remove {
        /// Stream name
        stream: String,

        /// Source position (0-based)
        index: usize,
    },

    /// Enable or disable the source at a position
    Toggle {
        /// Stream name
        stream: String,

        /// Source position (0-based)
        index: usize,

        /// Enable (true) or disable (false)
        #[arg(long, action = clap::ArgAction::Set)]
        enabled: bool,
    },
}

/// Filter subcommands
#[derive(Subcommand, Debug)]
pub enum FilterCommands {
    /// Add a filter to a stream
    Add {
        /// Stream name
        stream: String,

        /// Filter kind
        #[arg(value_parser = ["user", "user-list", "media"])]
        kind: String,

        /// Username (user), or list name / remote list id (user-list)
        #[arg(short, long)]
        target: Option<String>,

        /// Treat the user-list target as a remote list id
        #[arg(long)]
        remote: bool,

        /// Account used to fetch remote list members (defaults to the first account)
        #[arg(short, long)]
        account: Option<String>,

        /// Drop matching messages instead of keeping them
        #[arg(long)]
        negative: bool,

        /// Human-readable filter name
        #[arg(long, default_value = "")]
        name: String,
    },

    /// List the filters of a stream
    List {
        /// Stream name
        stream: String,
    },

    /// Remove the filter at a position
    Remove {
        /// Stream name
        stream: String,

        /// Filter position (0-based)
        index: usize,
    },
}

/// Local user list subcommands
#[derive(Subcommand, Debug)]
pub enum ListCommands {
    /// Create a local user list
    Create {
        /// List name (must be unique)
        name: String,

        /// Initial member usernames
        users: Vec<String>,

        /// List description
        #[arg(short, long, default_value = "")]
        description: String,
    },

    /// Show every local user list
    Show,

    /// Add a user to a list
    Add {
        /// List name
        name: String,

        /// Username
        user: String,
    },

    /// Remove a user from a list
    Remove {
        /// List name
        name: String,

        /// Username
        user: String,
    },
}

/// Account subcommands
#[derive(Subcommand, Debug)]
pub enum AccountCommands {
    /// Add or update an account
    Add {
        /// Account username
        username: String,

        /// Bearer token
        #[arg(long, env = "TSUBAME_TOKEN", hide_env_values = true)]
        token: String,

        /// API base URL
        #[arg(long)]
        api_base: Option<String>,
    },

    /// List accounts (tokens masked)
    List,

    /// Remove an account
    Remove {
        /// Account username
        username: String,
    },
}

/// Configuration subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Show resolved configuration values and where each came from
    Show,

    /// Set a profile configuration value
    Set {
        /// Configuration key (e.g. cache-size)
        key: String,
        /// Configuration value
        value: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        // This will panic if the CLI is misconfigured
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_source_add() {
        let cli = Cli::try_parse_from([
            "tsb", "source", "add", "news", "user-posts", "--target", "serval", "--cache",
        ])
        .unwrap();
        match cli.command {
            Some(Commands::Source {
                command:
                    SourceCommands::Add {
                        stream,
                        kind,
                        target,
                        cache,
                        disabled,
                        ..
                    },
            }) => {
                assert_eq!(stream, "news");
                assert_eq!(kind, "user-posts");
                assert_eq!(target.as_deref(), Some("serval"));
                assert!(cache);
                assert!(!disabled);
            }
            other => panic!("unexpected parse: {:?}", other),
        }
    }

    #[test]
    fn test_rejects_unknown_filter_kind() {
        assert!(Cli::try_parse_from(["tsb", "filter", "add", "news", "colour"]).is_err());
    }
}
