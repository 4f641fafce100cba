mod cli;
mod commands;
mod observability;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};
use reportlite_core::config::{IdentityConfig, PathsConfig, RuntimeConfig};

/// Exit code for failures of the envelope itself (bad stamp, failed
/// privilege drop, ...), distinct from anything the task returns.
const ENVELOPE_FAILURE: i32 = 125;

fn main() {
    observability::init_tracing();
    let cli = Cli::parse();

    let code = match dispatch(cli) {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ENVELOPE_FAILURE
        }
    };
    std::process::exit(code);
}

fn dispatch(cli: Cli) -> Result<i32> {
    let mut paths = PathsConfig::from_env();
    if let Some(app_root) = cli.app_root {
        paths.app_root = app_root;
    }
    if let Some(venv) = cli.venv {
        paths.venv_root = venv;
    }

    match cli.command {
        Commands::Build {
            source,
            requirements,
            home,
            user,
            task,
            mode,
            python_version,
            base_python,
            dry_run,
            json,
        } => {
            if let Some(source) = source {
                paths.source = source;
            }
            if let Some(requirements) = requirements {
                paths.requirements = requirements;
            }
            if let Some(home) = home {
                paths.home = home;
            }
            if let Some(task) = task {
                paths.task = task;
            }
            let mut identity = IdentityConfig::from_env();
            if let Some(user) = user {
                identity = identity.with_user(user);
            }
            let mut runtime = RuntimeConfig::from_env();
            if python_version.is_some() {
                runtime.expected_version = python_version;
            }
            if base_python.is_some() {
                runtime.base_python = base_python;
            }
            let opts = commands::build::BuildOptions {
                paths,
                identity,
                runtime,
                mode,
            };
            if dry_run {
                commands::build::print_plan(&commands::build::plan(&opts), json)?;
            } else {
                commands::build::cmd_build(&opts, json)?;
            }
            Ok(0)
        }
        Commands::Run => commands::run::cmd_run(&paths.app_root),
        Commands::Schedule => commands::run::cmd_schedule(&paths.app_root),
        Commands::Start => commands::run::cmd_start(&paths.app_root),
        Commands::Verify { json } => commands::verify::cmd_verify(&paths.app_root, json),
        Commands::Next { count } => {
            commands::next::cmd_next(count)?;
            Ok(0)
        }
    }
}
