//! `reportlite run`, `reportlite schedule` and `reportlite start`: the run stage.
//!
//! Every path loads the build stamp, drops to the stamped identity and only
//! then resolves and launches the task.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use reportlite_core::stamp::{BuildStamp, ExecutionMode};
use reportlite_envelope::identity::Identity;
use reportlite_envelope::info_log;
use reportlite_envelope::privilege::{drop_privileges, Unprivileged};
use reportlite_envelope::runner;
use reportlite_envelope::runtime_resolver::TaskCommand;
use reportlite_envelope::schedule::{CronTrigger, Supervisor};

struct Prepared {
    stamp: BuildStamp,
    proof: Unprivileged,
    task: TaskCommand,
}

fn prepare(app_root: &Path) -> Result<Prepared> {
    let stamp = BuildStamp::load(app_root)?;
    let identity = Identity::from_stamp(&stamp)?;
    let proof = drop_privileges(&identity)?;
    let task = TaskCommand::resolve(&stamp, &proof);
    if !task.script.is_file() {
        anyhow::bail!("Task script {} is missing", task.script.display());
    }
    if !task.interpreter.exists() {
        anyhow::bail!(
            "Isolated interpreter {} is missing; rebuild with `reportlite build`",
            task.interpreter.display()
        );
    }
    tracing::debug!(
        user = %proof.user(),
        uid = proof.uid(),
        script = %task.script.display(),
        "Run stage prepared"
    );
    Ok(Prepared { stamp, proof, task })
}

/// `reportlite run`: one invocation; the task's exit code becomes ours.
pub fn cmd_run(app_root: &Path) -> Result<i32> {
    let p = prepare(app_root)?;
    run_prepared(&p)
}

/// `reportlite schedule`: fire on the monthly trigger until SIGINT/SIGTERM.
pub fn cmd_schedule(app_root: &Path) -> Result<i32> {
    let p = prepare(app_root)?;
    schedule_prepared(p, &*shutdown_on_signal()?)
}

/// `reportlite start`: whichever mode the build stamped.
pub fn cmd_start(app_root: &Path) -> Result<i32> {
    let p = prepare(app_root)?;
    start_prepared(p, shutdown_on_signal)
}

/// The signal handler is only installed for the scheduler, so a one-shot
/// envelope keeps the default SIGINT/SIGTERM behaviour.
fn start_prepared<F>(p: Prepared, shutdown: F) -> Result<i32>
where
    F: FnOnce() -> Result<Arc<AtomicBool>>,
{
    info_log!("Starting in {} mode", p.stamp.mode);
    match p.stamp.mode {
        ExecutionMode::OneShot => run_prepared(&p),
        ExecutionMode::Scheduled => schedule_prepared(p, &*shutdown()?),
    }
}

/// A flag set on SIGINT or SIGTERM.
fn shutdown_on_signal() -> Result<Arc<AtomicBool>> {
    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&shutdown);
    ctrlc::set_handler(move || {
        flag.store(true, Ordering::SeqCst);
    })
    .context("Failed to install the shutdown signal handler")?;
    Ok(shutdown)
}

fn run_prepared(p: &Prepared) -> Result<i32> {
    info_log!(
        "Running {} as '{}'",
        p.task.script.display(),
        p.proof.user()
    );
    let outcome = runner::run_once(&p.proof, &p.task)?;
    if outcome.success() {
        info_log!("Task finished in {:.1}s", outcome.elapsed.as_secs_f64());
    } else {
        tracing::warn!(exit_code = outcome.exit_code, "Task failed");
    }
    Ok(outcome.exit_code)
}

fn schedule_prepared(p: Prepared, shutdown: &AtomicBool) -> Result<i32> {
    let trigger = CronTrigger::monthly_report()?;
    let report = Supervisor::new(trigger, p.task).run(&p.proof, shutdown)?;
    info_log!(
        "Scheduler exited after {} invocation(s), {} failed",
        report.invocations,
        report.failures
    );
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use nix::unistd::{getgid, getuid, Group, User};
    use reportlite_core::stamp::STAMP_VERSION;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    /// A stamped envelope for the current (unprivileged) user whose task
    /// touches `ran` and exits 7. `None` when running as root, where preparing
    /// would drop the privileges of the whole test process.
    fn envelope(dir: &Path, mode: ExecutionMode) -> Option<BuildStamp> {
        if getuid().is_root() {
            return None;
        }
        let me = User::from_uid(getuid()).ok().flatten()?;
        if me.gid != getgid() {
            return None;
        }
        let group = Group::from_gid(getgid())
            .ok()
            .flatten()
            .map(|g| g.name)
            .unwrap_or_else(|| me.name.clone());
        let app = dir.join("app");
        let venv = dir.join("venv");
        fs::create_dir_all(venv.join("bin")).unwrap();
        fs::create_dir_all(&app).unwrap();
        let python = venv.join("bin/python");
        fs::write(&python, "#!/bin/sh\nexec /bin/sh \"$@\"\n").unwrap();
        fs::set_permissions(&python, fs::Permissions::from_mode(0o755)).unwrap();
        fs::write(
            app.join("monthly-report.py"),
            format!("touch {}\nexit 7\n", dir.join("ran").display()),
        )
        .unwrap();
        let stamp = BuildStamp {
            version: STAMP_VERSION,
            built_at: Utc::now(),
            app_root: app,
            venv_root: venv,
            home: dir.to_path_buf(),
            task: "monthly-report.py".to_string(),
            user: me.name.clone(),
            group,
            uid: me.uid.as_raw(),
            gid: me.gid.as_raw(),
            python_version: "3.7.17".to_string(),
            manifest_digest: String::new(),
            installed: Vec::new(),
            mode,
        };
        stamp.write().unwrap();
        Some(stamp)
    }

    #[test]
    fn start_runs_one_shot_stamp_once_with_task_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let Some(stamp) = envelope(dir.path(), ExecutionMode::OneShot) else {
            return;
        };
        let p = prepare(&stamp.app_root).unwrap();
        let code = start_prepared(p, || panic!("one-shot must not install a signal handler")).unwrap();
        assert_eq!(code, 7);
        assert!(dir.path().join("ran").exists());
        assert_eq!(cmd_run(&stamp.app_root).unwrap(), 7);
    }

    #[test]
    fn start_hands_scheduled_stamp_to_the_supervisor() {
        let dir = tempfile::tempdir().unwrap();
        let Some(stamp) = envelope(dir.path(), ExecutionMode::Scheduled) else {
            return;
        };
        let p = prepare(&stamp.app_root).unwrap();
        let stopped = || Ok(Arc::new(AtomicBool::new(true)));
        assert_eq!(start_prepared(p, stopped).unwrap(), 0);
        assert!(!dir.path().join("ran").exists());
    }

    #[test]
    fn missing_stamp_points_at_build() {
        let dir = tempfile::tempdir().unwrap();
        let err = cmd_run(dir.path()).unwrap_err();
        assert!(format!("{err:#}").contains("reportlite build"));
    }

    #[test]
    fn start_without_stamp_fails_before_running() {
        let dir = tempfile::tempdir().unwrap();
        assert!(cmd_start(dir.path()).is_err());
        assert!(cmd_schedule(dir.path()).is_err());
    }
}
