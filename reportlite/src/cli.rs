use clap::{Parser, Subcommand};
use reportlite_core::stamp::ExecutionMode;
use std::path::PathBuf;

/// ReportLite - build and run envelope for a periodic report task
#[derive(Parser, Debug)]
#[command(name = "reportlite")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Application root (default: REPORTLITE_APP_ROOT or /app)
    #[arg(long, global = true, value_name = "DIR")]
    pub app_root: Option<PathBuf>,

    /// Isolated runtime root (default: REPORTLITE_VENV or /opt/venv)
    #[arg(long, global = true, value_name = "DIR")]
    pub venv: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build the envelope (requires root): directories, identity, isolated
    /// runtime, dependencies, ownership transfer, build stamp
    Build {
        /// Application source tree copied into the app root
        #[arg(long, value_name = "DIR")]
        source: Option<PathBuf>,

        /// Dependency manifest (one `name[constraint]` per line)
        #[arg(long, value_name = "FILE")]
        requirements: Option<PathBuf>,

        /// Home directory of the unprivileged identity
        #[arg(long, value_name = "DIR")]
        home: Option<PathBuf>,

        /// Name of the unprivileged identity
        #[arg(long)]
        user: Option<String>,

        /// Task script relative to the app root
        #[arg(long, value_name = "FILE")]
        task: Option<String>,

        /// Execution mode recorded for `start`: one-shot or scheduled
        #[arg(long, default_value = "one-shot")]
        mode: ExecutionMode,

        /// Pinned interpreter version; the build fails if the isolated runtime reports another
        #[arg(long)]
        python_version: Option<String>,

        /// Base interpreter used to create the isolated runtime
        #[arg(long, value_name = "PATH")]
        base_python: Option<PathBuf>,

        /// Print the ordered build plan without changing anything
        #[arg(long, default_value = "false")]
        dry_run: bool,

        /// Output the build report as JSON
        #[arg(long, default_value = "false")]
        json: bool,
    },

    /// Run the task once as the unprivileged identity; exit with its status
    Run,

    /// Run the foreground scheduler: the task fires at 12:00 on the 1st of every month
    Schedule,

    /// Run in the execution mode recorded at build time
    Start,

    /// Inspect a built envelope: ownership, interpreter version, installed set
    Verify {
        /// Output as JSON
        #[arg(long, default_value = "false")]
        json: bool,
    },

    /// Show upcoming trigger times
    Next {
        /// How many occurrences to list
        #[arg(long, default_value = "3")]
        count: usize,
    },
}
