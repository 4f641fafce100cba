//! ONE_SHOT execution: run the task once and hand back its exit status.

use std::process::Stdio;
use std::time::{Duration, Instant};

use crate::common::exit_code_of;
use crate::error::{EnvelopeError, Result};
use crate::privilege::Unprivileged;
use crate::runtime_resolver::TaskCommand;

/// Result of one task invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskOutcome {
    pub exit_code: i32,
    pub elapsed: Duration,
}

impl TaskOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Run the task with inherited stdio and block until it exits.
pub fn run_once(_proof: &Unprivileged, task: &TaskCommand) -> Result<TaskOutcome> {
    let start = Instant::now();
    let mut cmd = task.command();
    cmd.stdin(Stdio::null())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit());

    let status = cmd
        .status()
        .map_err(|source| EnvelopeError::TaskSpawn {
            program: task.interpreter.clone(),
            source,
        })?;

    let outcome = TaskOutcome {
        exit_code: exit_code_of(status),
        elapsed: start.elapsed(),
    };
    tracing::debug!(
        exit_code = outcome.exit_code,
        elapsed_ms = outcome.elapsed.as_millis() as u64,
        "Task finished"
    );
    Ok(outcome)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    /// A task whose "interpreter" is `sh`: the script body runs as shell.
    pub(crate) fn shell_task(dir: &Path, body: &str) -> TaskCommand {
        let interpreter = dir.join("venv/bin/python");
        fs::create_dir_all(interpreter.parent().unwrap()).unwrap();
        fs::write(&interpreter, "#!/bin/sh\nexec /bin/sh \"$@\"\n").unwrap();
        fs::set_permissions(&interpreter, fs::Permissions::from_mode(0o755)).unwrap();
        let script = dir.join("monthly-report.py");
        fs::write(&script, body).unwrap();
        TaskCommand {
            interpreter,
            script,
            working_dir: dir.to_path_buf(),
            env: vec![("PYTHONUNBUFFERED".to_string(), "1".into())],
        }
    }

    #[test]
    fn exit_code_is_passed_through_exactly() {
        let dir = tempfile::tempdir().unwrap();
        let proof = Unprivileged::current_for_tests();
        let task = shell_task(dir.path(), "exit 0\n");
        for code in [0, 1, 2, 3, 7, 99, 128, 255] {
            fs::write(&task.script, format!("exit {code}\n")).unwrap();
            let outcome = run_once(&proof, &task).unwrap();
            assert_eq!(outcome.exit_code, code);
            assert_eq!(outcome.success(), code == 0);
        }
    }

    #[test]
    fn task_runs_in_working_dir_with_env() {
        let dir = tempfile::tempdir().unwrap();
        let task = shell_task(
            dir.path(),
            "[ \"$PYTHONUNBUFFERED\" = 1 ] || exit 10\n[ -f ./monthly-report.py ] || exit 11\nexit 0\n",
        );
        let outcome = run_once(&Unprivileged::current_for_tests(), &task).unwrap();
        assert_eq!(outcome.exit_code, 0);
    }

    #[test]
    fn missing_interpreter_is_a_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut task = shell_task(dir.path(), "exit 0\n");
        task.interpreter = dir.path().join("no/such/python");
        assert!(matches!(
            run_once(&Unprivileged::current_for_tests(), &task),
            Err(EnvelopeError::TaskSpawn { .. })
        ));
    }
}
