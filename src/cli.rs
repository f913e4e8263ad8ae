//! CLI argument parsing using clap v4

use clap::{Parser, Subcommand};

use crate::channel::ChannelAddr;
use crate::error::Result;

/// taskpool - hand out integer tasks to a bounded pool of workers
///
/// A coordinator owns a fixed number of worker slots and a message channel.
/// Workers register on that channel, ask for tasks, classify each value as
/// prime or composite and report back.
#[derive(Parser, Debug)]
#[command(name = "taskpool")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to configuration file
    #[arg(short, long, global = true, env = "TASKPOOL_CONFIG")]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the coordinator on a channel
    Coordinator {
        #[command(flatten)]
        channel: ChannelArgs,

        /// Number of worker slots
        #[arg(short = 'n', long)]
        slots: Option<usize>,

        /// Fixed seed for task values
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Run one worker against a coordinator's channel
    Worker {
        #[command(flatten)]
        channel: ChannelArgs,

        /// Simulated work time per task, in milliseconds
        #[arg(long)]
        work_delay_ms: Option<u64>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

/// Channel identity given on the command line
#[derive(clap::Args, Debug, Clone)]
pub struct ChannelArgs {
    /// Channel name starting with '/', or an existing path when PROJECT_ID follows
    #[arg(value_name = "NAME | PATH")]
    pub target: String,

    /// Positive project id; selects a path-keyed channel
    #[arg(value_name = "PROJECT_ID", allow_negative_numbers = true)]
    pub project_id: Option<String>,
}

impl ChannelArgs {
    /// Resolve to a validated channel identity
    pub fn addr(&self) -> Result<ChannelAddr> {
        ChannelAddr::from_args(&self.target, self.project_id.as_deref())
    }
}

/// Configuration subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum ConfigSubcommand {
    /// Display the effective configuration
    Show,

    /// Initialize a new configuration file
    Init {
        /// Path where to create the config file
        #[arg(short, long)]
        path: Option<String>,

        /// Overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Validate the configuration
    Validate,
}
