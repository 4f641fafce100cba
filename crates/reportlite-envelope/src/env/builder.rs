//! Build the isolated Python runtime and install the dependency manifest into it.

use reportlite_core::config::RuntimeConfig;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::common::run_captured;
use crate::error::{EnvelopeError, Result};
use crate::identity::Identity;
use crate::ownership::find_foreign_owned;
use crate::privilege::Privileged;

/// Filesystem view of the isolated runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeLayout {
    root: PathBuf,
}

impl RuntimeLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn bin_dir(&self) -> PathBuf {
        self.root.join("bin")
    }

    /// The isolated interpreter. Never a system-wide one.
    pub fn python(&self) -> PathBuf {
        self.bin_dir().join("python")
    }

    /// `pyvenv.cfg` marks a constructed instance.
    pub fn is_initialised(&self) -> bool {
        self.root.join("pyvenv.cfg").is_file()
    }
}

/// Base interpreter used to construct the runtime: the configured one, else
/// `python3` / `python` from PATH.
pub fn discover_base_python(cfg: &RuntimeConfig) -> Result<PathBuf> {
    if let Some(ref explicit) = cfg.base_python {
        return which::which(explicit).map_err(|e| EnvelopeError::RuntimeConstruction {
            root: explicit.clone(),
            reason: format!("base interpreter not usable: {e}"),
        });
    }
    for name in ["python3", "python"] {
        if let Ok(path) = which::which(name) {
            return Ok(path);
        }
    }
    Err(EnvelopeError::RuntimeConstruction {
        root: PathBuf::new(),
        reason: "python3 or python not found in PATH".to_string(),
    })
}

/// Create the runtime with `<base> -m venv <root>`. Returns `false` when an
/// instance already exists at `root`; it is left untouched. A non-empty
/// directory that is not an instance is refused, and so is an instance with
/// any entry not owned by the building uid.
pub fn construct_runtime(_proof: &Privileged, base_python: &Path, layout: &RuntimeLayout) -> Result<bool> {
    let fail = |reason: String| EnvelopeError::RuntimeConstruction {
        root: layout.root().to_path_buf(),
        reason,
    };
    if layout.is_initialised() {
        let builder_uid = nix::unistd::geteuid().as_raw();
        let foreign = find_foreign_owned(layout.root(), builder_uid).map_err(|e| fail(format!("{e:#}")))?;
        if let Some(first) = foreign.first() {
            return Err(fail(format!(
                "existing runtime was not built by this stage: {} entries not owned by uid {} (first: {}); remove it to rebuild",
                foreign.len(),
                builder_uid,
                first.display()
            )));
        }
        tracing::info!(root = %layout.root().display(), "Isolated runtime already present, not recreating");
        return Ok(false);
    }
    if layout.root().exists() {
        let mut entries = std::fs::read_dir(layout.root()).map_err(|e| fail(e.to_string()))?;
        if entries.next().is_some() {
            return Err(fail(
                "directory is not empty and is not an isolated runtime".to_string(),
            ));
        }
    }

    let mut cmd = Command::new(base_python);
    cmd.arg("-m").arg("venv").arg(layout.root());
    let (out, rendered) = run_captured(&mut cmd).map_err(|e| fail(format!("{}: {e}", base_python.display())))?;
    if !out.status.success() {
        return Err(fail(format!(
            "`{}` failed: {}",
            rendered,
            String::from_utf8_lossy(&out.stderr).trim()
        )));
    }
    if !layout.is_initialised() || !layout.python().exists() {
        return Err(fail("venv did not produce an interpreter".to_string()));
    }
    Ok(true)
}

/// Run `<root>/bin/python --version` and return the reported version. When
/// `expected` is set the version must match it.
pub fn probe_version(layout: &RuntimeLayout, expected: Option<&str>) -> Result<String> {
    probe(layout, expected, None)
}

/// [`probe_version`] with the interpreter running as `identity`.
pub fn probe_version_as(layout: &RuntimeLayout, expected: Option<&str>, identity: &Identity) -> Result<String> {
    probe(layout, expected, Some(identity))
}

fn probe(layout: &RuntimeLayout, expected: Option<&str>, run_as: Option<&Identity>) -> Result<String> {
    let interpreter = layout.python();
    let fail = |reason: String| EnvelopeError::RuntimeProbe {
        interpreter: interpreter.clone(),
        reason,
    };
    if !interpreter.exists() {
        return Err(fail("interpreter missing; refusing system fallback".to_string()));
    }

    let mut cmd = python_command(layout, run_as);
    cmd.arg("--version");
    let (out, _) = run_captured(&mut cmd).map_err(|e| fail(e.to_string()))?;
    if !out.status.success() {
        return Err(fail(format!(
            "exited with {}: {}",
            out.status,
            String::from_utf8_lossy(&out.stderr).trim()
        )));
    }
    // Interpreters before 3.4 print the version on stderr.
    let text = format!(
        "{}{}",
        String::from_utf8_lossy(&out.stdout),
        String::from_utf8_lossy(&out.stderr)
    );
    let found = parse_version_output(&text)
        .ok_or_else(|| fail(format!("unrecognised version output: {}", text.trim())))?;

    if let Some(expected) = expected {
        if !version_matches(expected, &found) {
            return Err(EnvelopeError::VersionMismatch {
                expected: expected.to_string(),
                found,
            });
        }
    }
    Ok(found)
}

/// Upgrade the installer, then install every declared dependency with no
/// local cache. Any failure is fatal; nothing is retried.
pub fn install_dependencies(
    _proof: &Privileged,
    layout: &RuntimeLayout,
    manifest: &Path,
) -> Result<()> {
    pip(
        layout,
        &["install", "--no-cache-dir", "--upgrade", "pip"],
        "upgrade installer",
        None,
    )?;
    let manifest_arg = manifest.to_string_lossy().to_string();
    pip(
        layout,
        &["install", "--no-cache-dir", "-r", manifest_arg.as_str()],
        "install manifest",
        None,
    )?;
    Ok(())
}

/// Installed distributions (`pip freeze`), sorted.
pub fn freeze(layout: &RuntimeLayout) -> Result<Vec<String>> {
    freeze_with(layout, None)
}

/// [`freeze`] with the interpreter running as `identity`.
pub fn freeze_as(layout: &RuntimeLayout, identity: &Identity) -> Result<Vec<String>> {
    freeze_with(layout, Some(identity))
}

fn freeze_with(layout: &RuntimeLayout, run_as: Option<&Identity>) -> Result<Vec<String>> {
    let stdout = pip(layout, &["freeze"], "freeze", run_as)?;
    let mut lines: Vec<String> = stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect();
    lines.sort();
    Ok(lines)
}

/// The isolated interpreter, optionally switched to `run_as` in the child
/// only. The calling process keeps its own credentials.
fn python_command(layout: &RuntimeLayout, run_as: Option<&Identity>) -> Command {
    let mut cmd = Command::new(layout.python());
    if let Some(identity) = run_as {
        cmd.uid(identity.uid)
            .gid(identity.gid)
            .current_dir(layout.root())
            .env("HOME", &identity.home);
    }
    cmd
}

fn pip(layout: &RuntimeLayout, args: &[&str], step: &str, run_as: Option<&Identity>) -> Result<String> {
    let mut cmd = python_command(layout, run_as);
    cmd.arg("-m")
        .arg("pip")
        .args(args)
        .env("PIP_DISABLE_PIP_VERSION_CHECK", "1")
        .env("PYTHONDONTWRITEBYTECODE", "1");
    let (out, rendered) = run_captured(&mut cmd).map_err(|e| EnvelopeError::DependencyInstall {
        step: step.to_string(),
        stderr: e.to_string(),
    })?;
    if !out.status.success() {
        return Err(EnvelopeError::DependencyInstall {
            step: format!("{step}: `{rendered}`"),
            stderr: String::from_utf8_lossy(&out.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&out.stdout).to_string())
}

/// Extract `X.Y[.Z...]` from `Python X.Y.Z` style output.
fn parse_version_output(text: &str) -> Option<String> {
    text.split_whitespace()
        .skip_while(|w| !w.eq_ignore_ascii_case("python"))
        .nth(1)
        .filter(|v| v.chars().next().map_or(false, |c| c.is_ascii_digit()))
        .map(String::from)
}

/// `expected` must be a component-wise prefix of `found`:
/// "3.7" matches "3.7.17" but not "3.70.1".
pub fn version_matches(expected: &str, found: &str) -> bool {
    let expected: Vec<&str> = expected.trim().split('.').collect();
    let found: Vec<&str> = found.trim().split('.').collect();
    !expected.is_empty() && expected.len() <= found.len() && expected.iter().zip(&found).all(|(e, f)| e == f)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    /// Stand-in interpreter: answers `--version`, logs pip invocations next
    /// to the venv root, prints a fixed freeze list, and fails `pip install`
    /// for any manifest mentioning `nonexistent-pkg`.
    const FAKE_PYTHON: &str = r#"#!/bin/sh
root="$(dirname "$(dirname "$0")")"
if [ "$1" = "--version" ]; then echo "Python 3.7.17"; exit 0; fi
if [ "$1" = "-m" ] && [ "$2" = "venv" ]; then
  mkdir -p "$3/bin" && cp "$0" "$3/bin/python" && echo "home = /usr/bin" > "$3/pyvenv.cfg"; exit $?
fi
if [ "$1" = "-m" ] && [ "$2" = "pip" ]; then
  shift 2
  echo "$*" >> "$root/pip.log"
  if [ "$1" = "freeze" ]; then printf 'requests==2.31.0\nPyYAML==5.4.1\n'; exit 0; fi
  for a in "$@"; do
    if [ -f "$a" ] && grep -q nonexistent-pkg "$a"; then
      echo "ERROR: No matching distribution found for nonexistent-pkg" >&2; exit 1
    fi
  done
  exit 0
fi
exit 2
"#;

    fn write_exec(path: &Path, body: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, body).unwrap();
        fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
    }

    fn base_python(dir: &Path) -> PathBuf {
        let base = dir.join("base/bin/python");
        write_exec(&base, FAKE_PYTHON);
        base
    }

    #[test]
    fn construct_then_probe_then_noop() {
        let dir = tempfile::tempdir().unwrap();
        let base = base_python(dir.path());
        let layout = RuntimeLayout::new(dir.path().join("opt/venv"));
        let proof = Privileged::assume_for_tests();

        assert!(construct_runtime(&proof, &base, &layout).unwrap());
        assert!(layout.is_initialised());
        assert_eq!(probe_version(&layout, Some("3.7")).unwrap(), "3.7.17");
        assert_eq!(probe_version(&layout, None).unwrap(), "3.7.17");

        // Second construction leaves the instance alone.
        fs::write(layout.root().join("marker"), "keep").unwrap();
        assert!(!construct_runtime(&proof, &base, &layout).unwrap());
        assert!(layout.root().join("marker").exists());
    }

    #[test]
    fn runtime_handed_to_another_uid_is_not_reused() {
        if !nix::unistd::geteuid().is_root() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let base = base_python(dir.path());
        let layout = RuntimeLayout::new(dir.path().join("opt/venv"));
        let proof = Privileged::assume_for_tests();
        assert!(construct_runtime(&proof, &base, &layout).unwrap());

        // A previous build handed the interpreter to the unprivileged identity.
        std::os::unix::fs::lchown(layout.python(), Some(65534), Some(65534)).unwrap();
        match construct_runtime(&proof, &base, &layout) {
            Err(EnvelopeError::RuntimeConstruction { reason, .. }) => {
                assert!(reason.contains("not built by this stage"), "{reason}")
            }
            other => panic!("expected RuntimeConstruction, got {other:?}"),
        }
    }

    #[test]
    fn inspection_as_identity_runs_child_under_that_uid() {
        if !nix::unistd::geteuid().is_root() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        fs::set_permissions(dir.path(), fs::Permissions::from_mode(0o755)).unwrap();
        let layout = RuntimeLayout::new(dir.path().join("venv"));
        let marker = dir.path().join("uids");
        write_exec(
            &layout.python(),
            &format!(
                "#!/bin/sh\nid -u >> {}\n{}",
                marker.display(),
                FAKE_PYTHON.trim_start_matches("#!/bin/sh\n")
            ),
        );
        fs::write(&marker, "").unwrap();
        fs::set_permissions(&marker, fs::Permissions::from_mode(0o666)).unwrap();
        let nobody = Identity {
            name: "nobody".to_string(),
            group: "nogroup".to_string(),
            uid: 65534,
            gid: 65534,
            home: PathBuf::from("/nonexistent"),
            shell: PathBuf::from("/usr/sbin/nologin"),
        };

        assert_eq!(probe_version_as(&layout, None, &nobody).unwrap(), "3.7.17");
        assert_eq!(freeze_as(&layout, &nobody).unwrap().len(), 2);
        let uids = fs::read_to_string(&marker).unwrap();
        assert_eq!(uids.lines().collect::<Vec<_>>(), vec!["65534", "65534"]);
    }

    #[test]
    fn non_runtime_directory_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let base = base_python(dir.path());
        let root = dir.path().join("opt/venv");
        fs::create_dir_all(&root).unwrap();
        fs::write(root.join("unrelated.txt"), "data").unwrap();
        let err = construct_runtime(&Privileged::assume_for_tests(), &base, &RuntimeLayout::new(&root))
            .unwrap_err();
        assert!(matches!(err, EnvelopeError::RuntimeConstruction { .. }));
        assert!(root.join("unrelated.txt").exists());
    }

    #[test]
    fn version_pin_mismatch_fails_the_probe() {
        let dir = tempfile::tempdir().unwrap();
        let layout = RuntimeLayout::new(dir.path().join("venv"));
        write_exec(&layout.python(), FAKE_PYTHON);
        match probe_version(&layout, Some("3.11")) {
            Err(EnvelopeError::VersionMismatch { expected, found }) => {
                assert_eq!(expected, "3.11");
                assert_eq!(found, "3.7.17");
            }
            other => panic!("expected VersionMismatch, got {other:?}"),
        }
    }

    #[test]
    fn missing_interpreter_never_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let layout = RuntimeLayout::new(dir.path().join("venv"));
        assert!(matches!(
            probe_version(&layout, None),
            Err(EnvelopeError::RuntimeProbe { .. })
        ));
    }

    #[test]
    fn install_upgrades_installer_first_without_cache() {
        let dir = tempfile::tempdir().unwrap();
        let layout = RuntimeLayout::new(dir.path().join("venv"));
        write_exec(&layout.python(), FAKE_PYTHON);
        let manifest = dir.path().join("requirements.txt");
        fs::write(&manifest, "requests==2.31.0\nPyYAML==5.4.1\n").unwrap();

        install_dependencies(&Privileged::assume_for_tests(), &layout, &manifest).unwrap();
        let log = fs::read_to_string(layout.root().join("pip.log")).unwrap();
        let calls: Vec<&str> = log.lines().collect();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0], "install --no-cache-dir --upgrade pip");
        assert_eq!(
            calls[1],
            format!("install --no-cache-dir -r {}", manifest.display())
        );
    }

    #[test]
    fn unresolvable_dependency_fails_the_build() {
        let dir = tempfile::tempdir().unwrap();
        let layout = RuntimeLayout::new(dir.path().join("venv"));
        write_exec(&layout.python(), FAKE_PYTHON);
        let manifest = dir.path().join("requirements.txt");
        fs::write(&manifest, "requests==2.31.0\nnonexistent-pkg==0.0.1\n").unwrap();

        match install_dependencies(&Privileged::assume_for_tests(), &layout, &manifest) {
            Err(EnvelopeError::DependencyInstall { stderr, .. }) => {
                assert!(stderr.contains("nonexistent-pkg"))
            }
            other => panic!("expected DependencyInstall, got {other:?}"),
        }
    }

    #[test]
    fn freeze_is_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let layout = RuntimeLayout::new(dir.path().join("venv"));
        write_exec(&layout.python(), FAKE_PYTHON);
        assert_eq!(
            freeze(&layout).unwrap(),
            vec!["PyYAML==5.4.1".to_string(), "requests==2.31.0".to_string()]
        );
    }

    #[test]
    fn version_output_parsing_and_matching() {
        assert_eq!(parse_version_output("Python 3.7.17\n"), Some("3.7.17".to_string()));
        assert_eq!(parse_version_output("Python 2.7.18"), Some("2.7.18".to_string()));
        assert_eq!(parse_version_output("garbage"), None);

        assert!(version_matches("3.7", "3.7.17"));
        assert!(version_matches("3.7.17", "3.7.17"));
        assert!(!version_matches("3.7", "3.70.1"));
        assert!(!version_matches("3.7.17", "3.7"));
        assert!(!version_matches("3.8", "3.7.17"));
    }

    #[test]
    fn explicit_base_python_must_exist() {
        let cfg = RuntimeConfig {
            base_python: Some(PathBuf::from("/definitely/not/python3")),
            expected_version: None,
        };
        assert!(matches!(
            discover_base_python(&cfg),
            Err(EnvelopeError::RuntimeConstruction { .. })
        ));
    }
}
