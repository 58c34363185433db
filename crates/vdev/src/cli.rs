//! Clap derive structures for the `vdev` runner.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use vdev_core::GarageCommand;

/// vdev -- virtual garage doors for a home-automation gateway
#[derive(Debug, Parser)]
#[command(
    name = "vdev",
    version,
    about = "Run virtual garage devices synced to gateway variables or door controllers",
    propagate_version = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    /// Defaults to `run`
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Config file (defaults to the platform config dir)
    #[arg(long, short = 'c', env = "VDEV_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Also append logs to this file
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run every configured garage until interrupted
    Run,

    /// Validate the config and show how each garage would run
    Check,

    /// Write a starter config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Send one command to a garage and exit
    Send {
        /// Garage name as configured
        device: String,

        /// light-on, light-off, door-open, door-close, door-trigger,
        /// door-stop, lock, unlock, reset-statistics, query
        command: GarageCommand,
    },

    /// Print the stored fields of one or all garages
    Status {
        /// Garage name; all when omitted
        device: Option<String>,
    },
}
