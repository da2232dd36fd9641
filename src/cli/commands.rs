//! CLI command definitions using clap.
//!
//! Defines the main CLI structure and subcommands:
//! - list / run: discover and launch capabilities in-process
//! - runs / show / recover: inspect and repair the run ledger
//! - serve: host the console socket
//! - watch / submit / cancel: talk to a running host

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Caprun - launch declared automation capabilities and follow their runs
#[derive(Parser, Debug)]
#[command(name = "caprun")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

/// Main subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List discovered capabilities
    List,

    /// Plan, approve and run a capability in this process
    Run(RunArgs),

    /// List recorded runs, newest first
    Runs {
        /// Filter by status (running, succeeded, failed, cancelled)
        #[arg(short, long)]
        status: Option<String>,

        /// Show at most this many runs
        #[arg(short = 'n', long, default_value_t = 20)]
        limit: usize,
    },

    /// Show one run record as JSON
    Show {
        /// Run ID to show
        run_id: String,
    },

    /// Mark runs interrupted by a crash as failed
    Recover,

    /// Serve the console socket until interrupted
    Serve {
        /// Socket path (overrides config)
        #[arg(long)]
        socket: Option<PathBuf>,
    },

    /// Stream events from a running host
    Watch {
        /// Socket path (overrides config)
        #[arg(long)]
        socket: Option<PathBuf>,
    },

    /// Ask a running host to start a capability and follow it
    Submit {
        /// Capability ID to run
        #[arg(short, long)]
        capability: String,

        /// Prompt passed to the capability
        #[arg(short, long)]
        prompt: Option<String>,

        /// Request dry-run mode
        #[arg(long)]
        check: bool,

        /// Extra secret file, may repeat
        #[arg(long = "env-file")]
        env_files: Vec<String>,

        /// Socket path (overrides config)
        #[arg(long)]
        socket: Option<PathBuf>,
    },

    /// Ask a running host to cancel a run
    Cancel {
        /// Run ID to cancel
        #[arg(long)]
        run_id: Option<String>,

        /// Cancel the earliest active run of this capability
        #[arg(long)]
        capability: Option<String>,

        /// Socket path (overrides config)
        #[arg(long)]
        socket: Option<PathBuf>,
    },
}

/// Arguments for `run`
#[derive(Args, Debug, Clone, Default)]
pub struct RunArgs {
    /// Capability ID; prompts for a choice when absent
    #[arg(short, long)]
    pub capability: Option<String>,

    /// Prompt passed to the capability
    #[arg(short, long)]
    pub prompt: Option<String>,

    /// Run in dry-run mode when supported (default)
    #[arg(long, overrides_with = "no_check")]
    pub check: bool,

    /// Run in execute mode
    #[arg(long, overrides_with = "check")]
    pub no_check: bool,

    /// Print the plan and exit
    #[arg(long)]
    pub plan_only: bool,

    /// Refuse to run in execute mode
    #[arg(long)]
    pub dry_run_only: bool,

    /// Extra secret file, may repeat
    #[arg(long = "env-file", alias = "env")]
    pub env_files: Vec<String>,

    /// Skip the approval prompt
    #[arg(long)]
    pub auto_approve: bool,
}

impl RunArgs {
    /// Dry-run is the default; `--no-check` turns it off
    pub fn wants_check(&self) -> bool {
        !self.no_check
    }
}
