//! `reportlite build`: the privileged build stage.
//!
//! Stages run strictly in order and the first failure aborts the build. Any
//! previous stamp is removed before the first stage, and the new one is
//! written atomically after ownership has been transferred and checked, so a
//! failed build never leaves a runnable envelope.

use anyhow::{Context, Result};
use chrono::Utc;
use reportlite_core::config::{IdentityConfig, PathsConfig, RuntimeConfig};
use reportlite_core::manifest::DependencySet;
use reportlite_core::stamp::{BuildStamp, ExecutionMode, STAMP_VERSION};
use reportlite_envelope::bootstrap::{self, Layout};
use reportlite_envelope::env::builder;
use reportlite_envelope::env::RuntimeLayout;
use reportlite_envelope::identity;
use reportlite_envelope::info_log;
use reportlite_envelope::ownership;
use reportlite_envelope::privilege::Privileged;
use serde::Serialize;

#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub paths: PathsConfig,
    pub identity: IdentityConfig,
    pub runtime: RuntimeConfig,
    pub mode: ExecutionMode,
}

/// One step of the build, planned or done.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct BuildAction {
    pub stage: &'static str,
    pub description: String,
    pub skipped: bool,
}

impl BuildAction {
    fn done(stage: &'static str, description: String) -> Self {
        Self {
            stage,
            description,
            skipped: false,
        }
    }

    fn skipped(stage: &'static str, description: String) -> Self {
        Self {
            stage,
            description,
            skipped: true,
        }
    }
}

/// The ordered build plan, without touching anything.
pub fn plan(opts: &BuildOptions) -> Vec<BuildAction> {
    let p = &opts.paths;
    let id = &opts.identity;
    let base = opts
        .runtime
        .base_python
        .as_ref()
        .map(|b| b.display().to_string())
        .unwrap_or_else(|| "python3 from PATH".to_string());
    let pin = opts
        .runtime
        .expected_version
        .as_deref()
        .map(|v| format!(", expect Python {v}"))
        .unwrap_or_default();
    vec![
        BuildAction::done(
            "bootstrap",
            format!(
                "[plan] create directories {}, {}, {}",
                p.app_root.display(),
                p.venv_root.display(),
                p.home.display()
            ),
        ),
        BuildAction::done(
            "bootstrap",
            format!(
                "[plan] ensure group '{}' and user '{}' (home {}, shell {})",
                id.group,
                id.user,
                p.home.display(),
                id.shell
            ),
        ),
        BuildAction::done(
            "bootstrap",
            format!(
                "[plan] copy application source {} -> {}",
                p.source.display(),
                p.app_root.display()
            ),
        ),
        BuildAction::done(
            "runtime",
            format!(
                "[plan] create isolated runtime at {} from {}{}",
                p.venv_root.display(),
                base,
                pin
            ),
        ),
        BuildAction::done(
            "dependencies",
            format!(
                "[plan] upgrade pip, then install {} without cache",
                p.requirements.display()
            ),
        ),
        BuildAction::done(
            "ownership",
            format!(
                "[plan] chown -R {}:{} {}, {}, {}",
                id.user,
                id.group,
                p.app_root.display(),
                p.venv_root.display(),
                p.home.display()
            ),
        ),
        BuildAction::done(
            "stamp",
            format!(
                "[plan] atomically record build stamp (mode {}) in {}",
                opts.mode,
                p.app_root.display()
            ),
        ),
    ]
}

/// `reportlite build`
pub fn cmd_build(opts: &BuildOptions, json: bool) -> Result<()> {
    let (stamp, actions) = run_build(opts)?;
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "stamp": stamp,
                "actions": actions,
            }))?
        );
    } else {
        print_actions(&actions);
        eprintln!();
        eprintln!(
            "✅ Built: Python {} in {}, {} package(s), runs as '{}' ({})",
            stamp.python_version,
            stamp.venv_root.display(),
            stamp.installed.len(),
            stamp.user,
            stamp.mode
        );
    }
    Ok(())
}

pub fn print_plan(actions: &[BuildAction], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(actions)?);
    } else {
        print_actions(actions);
        eprintln!();
        eprintln!("(Dry run: nothing changed. Remove --dry-run to build.)");
    }
    Ok(())
}

fn print_actions(actions: &[BuildAction]) {
    for a in actions {
        let mark = if a.skipped { "·" } else { "•" };
        eprintln!("  {} [{}] {}", mark, a.stage, a.description);
    }
}

fn run_build(opts: &BuildOptions) -> Result<(BuildStamp, Vec<BuildAction>)> {
    let p = &opts.paths;
    let mut actions = Vec::new();

    // Manifest errors are caught before anything is mutated.
    let deps = DependencySet::load(&p.requirements)?;
    info_log!(
        "Dependency manifest {}: {} requirement(s)",
        p.requirements.display(),
        deps.len()
    );

    let proof = Privileged::acquire()?;
    let layout = Layout::from_config(p);
    if BuildStamp::remove(&layout.app_root)? {
        info_log!("Removed the previous build stamp; the envelope is not runnable until this build completes");
    }

    // 1. bootstrap
    bootstrap::create_layout(&proof, &layout)?;
    actions.push(BuildAction::done(
        "bootstrap",
        format!(
            "created directories {}, {}, {}",
            layout.app_root.display(),
            layout.venv_root.display(),
            layout.home.display()
        ),
    ));

    let (ident, created) = identity::ensure_identity(&proof, &opts.identity, &layout.home)?;
    let describe = format!(
        "user '{}' (uid {}, group '{}' gid {}, home {})",
        ident.name,
        ident.uid,
        ident.group,
        ident.gid,
        ident.home.display()
    );
    actions.push(if created {
        BuildAction::done("bootstrap", format!("created {describe}"))
    } else {
        BuildAction::skipped("bootstrap", format!("{describe} already exists"))
    });

    let copied = bootstrap::copy_source(&proof, &p.source, &layout.app_root)?;
    actions.push(BuildAction::done(
        "bootstrap",
        format!(
            "copied {} file(s) from {} into {}",
            copied,
            p.source.display(),
            layout.app_root.display()
        ),
    ));
    // A source tree copied from a built envelope carries its stamp along.
    BuildStamp::remove(&layout.app_root)?;
    let task_path = p.task_path();
    if !task_path.is_file() {
        anyhow::bail!(
            "Task script {} not found after copying the application source",
            task_path.display()
        );
    }

    // 2. isolated runtime
    let runtime = RuntimeLayout::new(&layout.venv_root);
    let base_python = builder::discover_base_python(&opts.runtime)?;
    let constructed = builder::construct_runtime(&proof, &base_python, &runtime)?;
    let python_version =
        builder::probe_version(&runtime, opts.runtime.expected_version.as_deref())?;
    actions.push(if constructed {
        BuildAction::done(
            "runtime",
            format!(
                "created isolated runtime {} from {} (Python {})",
                runtime.root().display(),
                base_python.display(),
                python_version
            ),
        )
    } else {
        BuildAction::skipped(
            "runtime",
            format!(
                "isolated runtime {} already present (Python {})",
                runtime.root().display(),
                python_version
            ),
        )
    });

    // 3. dependencies
    builder::install_dependencies(&proof, &runtime, &p.requirements)?;
    let installed = builder::freeze(&runtime)?;
    actions.push(BuildAction::done(
        "dependencies",
        format!(
            "installed {} requirement(s); {} distribution(s) present",
            deps.len(),
            installed.len()
        ),
    ));

    // 4. ownership, then the stamp
    let roots = layout.roots();
    let changed = ownership::transfer_ownership(&proof, &roots, &ident)?;
    for root in roots {
        let foreign = ownership::find_foreign_owned(root, ident.uid)
            .with_context(|| format!("Inspect ownership of {}", root.display()))?;
        if let Some(first) = foreign.first() {
            anyhow::bail!(
                "{} entries under {} are not owned by '{}' after transfer (first: {})",
                foreign.len(),
                root.display(),
                ident.name,
                first.display()
            );
        }
    }
    actions.push(BuildAction::done(
        "ownership",
        format!(
            "transferred {} entries to {}:{}",
            changed, ident.name, ident.group
        ),
    ));

    let stamp = BuildStamp {
        version: STAMP_VERSION,
        built_at: Utc::now(),
        app_root: layout.app_root.clone(),
        venv_root: layout.venv_root.clone(),
        home: layout.home.clone(),
        task: p.task.clone(),
        user: ident.name.clone(),
        group: ident.group.clone(),
        uid: ident.uid,
        gid: ident.gid,
        python_version,
        manifest_digest: deps.digest(),
        installed,
        mode: opts.mode,
    };
    let stamp_path = stamp.write_with(|staged| {
        ownership::transfer_ownership(&proof, &[staged], &ident)?;
        Ok(())
    })?;
    actions.push(BuildAction::done(
        "stamp",
        format!("wrote {}", stamp_path.display()),
    ));

    Ok((stamp, actions))
}
