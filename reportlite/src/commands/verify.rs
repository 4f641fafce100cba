//! `reportlite verify`: check a built envelope against its stamp.
//!
//! Ownership is inspected first without executing anything. The isolated
//! interpreter is only executed as the stamped identity: when verify itself
//! runs as root, the interpreter child is switched to that identity, and a
//! stamp naming uid 0 is refused.

use std::collections::BTreeSet;
use std::path::Path;

use anyhow::Result;
use reportlite_core::stamp::BuildStamp;
use reportlite_envelope::env::builder;
use reportlite_envelope::env::RuntimeLayout;
use reportlite_envelope::identity::Identity;
use reportlite_envelope::ownership;
use reportlite_envelope::privilege;
use serde::Serialize;

#[derive(Debug, Serialize)]
struct Check {
    name: String,
    ok: bool,
    detail: String,
}

#[derive(Debug, Serialize)]
struct VerifyReport {
    app_root: String,
    ok: bool,
    checks: Vec<Check>,
}

/// `reportlite verify`: exit 0 when every check passes, 1 otherwise.
pub fn cmd_verify(app_root: &Path, json: bool) -> Result<i32> {
    let stamp = BuildStamp::load(app_root)?;
    let checks = run_checks(&stamp);
    let report = VerifyReport {
        app_root: stamp.app_root.display().to_string(),
        ok: checks.iter().all(|c| c.ok),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        eprintln!("🔍 Envelope at {}", report.app_root);
        for c in &report.checks {
            let mark = if c.ok { "✓" } else { "✗" };
            eprintln!("  {} {}: {}", mark, c.name, c.detail);
        }
        eprintln!();
        if report.ok {
            eprintln!("✅ Envelope matches its build stamp");
        } else {
            eprintln!("❌ Envelope does not match its build stamp");
        }
    }
    Ok(if report.ok { 0 } else { 1 })
}

fn run_checks(stamp: &BuildStamp) -> Vec<Check> {
    let mut checks = Vec::new();

    for root in [&stamp.app_root, &stamp.venv_root, &stamp.home] {
        let name = format!("ownership {}", root.display());
        checks.push(match ownership::find_foreign_owned(root, stamp.uid) {
            Ok(foreign) if foreign.is_empty() => Check {
                name,
                ok: true,
                detail: format!("owned by {} (uid {})", stamp.user, stamp.uid),
            },
            Ok(foreign) => Check {
                name,
                ok: false,
                detail: format!(
                    "{} entries not owned by uid {} (first: {})",
                    foreign.len(),
                    stamp.uid,
                    foreign[0].display()
                ),
            },
            Err(e) => Check {
                name,
                ok: false,
                detail: format!("{e:#}"),
            },
        });
    }

    let task = stamp.task_path();
    checks.push(Check {
        name: "task".to_string(),
        ok: task.is_file(),
        detail: task.display().to_string(),
    });

    let run_as = if privilege::is_privileged() {
        match inspection_identity(stamp) {
            Ok(identity) => Some(identity),
            Err(reason) => {
                for name in ["interpreter", "dependencies"] {
                    checks.push(Check {
                        name: name.to_string(),
                        ok: false,
                        detail: reason.clone(),
                    });
                }
                return checks;
            }
        }
    } else {
        None
    };

    let runtime = RuntimeLayout::new(&stamp.venv_root);
    let probed = match &run_as {
        Some(identity) => builder::probe_version_as(&runtime, None, identity),
        None => builder::probe_version(&runtime, None),
    };
    checks.push(match probed {
        Ok(found) if found == stamp.python_version => Check {
            name: "interpreter".to_string(),
            ok: true,
            detail: format!("Python {found}"),
        },
        Ok(found) => Check {
            name: "interpreter".to_string(),
            ok: false,
            detail: format!("stamped {}, found {}", stamp.python_version, found),
        },
        Err(e) => Check {
            name: "interpreter".to_string(),
            ok: false,
            detail: e.to_string(),
        },
    });

    let frozen = match &run_as {
        Some(identity) => builder::freeze_as(&runtime, identity),
        None => builder::freeze(&runtime),
    };
    checks.push(match frozen {
        Ok(found) => compare_installed(&stamp.installed, &found),
        Err(e) => Check {
            name: "dependencies".to_string(),
            ok: false,
            detail: e.to_string(),
        },
    });

    checks
}

/// The identity the interpreter checks run as when verify runs privileged.
fn inspection_identity(stamp: &BuildStamp) -> std::result::Result<Identity, String> {
    let identity = Identity::from_stamp(stamp).map_err(|e| e.to_string())?;
    if identity.is_root() {
        return Err("stamped identity resolves to uid 0; refusing to execute the isolated interpreter".to_string());
    }
    Ok(identity)
}

fn compare_installed(stamped: &[String], found: &[String]) -> Check {
    let stamped: BTreeSet<&str> = stamped.iter().map(String::as_str).collect();
    let found: BTreeSet<&str> = found.iter().map(String::as_str).collect();
    let missing: Vec<&str> = stamped.difference(&found).copied().collect();
    let unexpected: Vec<&str> = found.difference(&stamped).copied().collect();
    let ok = missing.is_empty() && unexpected.is_empty();
    let detail = if ok {
        format!("{} distribution(s) as stamped", stamped.len())
    } else {
        let mut parts = Vec::new();
        if !missing.is_empty() {
            parts.push(format!("missing {}", missing.join(", ")));
        }
        if !unexpected.is_empty() {
            parts.push(format!("unexpected {}", unexpected.join(", ")));
        }
        parts.join("; ")
    };
    Check {
        name: "dependencies".to_string(),
        ok,
        detail,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(v: &[&str]) -> Vec<String> {
        v.iter().map(|x| x.to_string()).collect()
    }

    #[test]
    fn installed_sets_compare_by_membership() {
        let c = compare_installed(
            &s(&["idna==3.4", "requests==2.31.0"]),
            &s(&["requests==2.31.0", "idna==3.4"]),
        );
        assert!(c.ok);
        assert_eq!(c.detail, "2 distribution(s) as stamped");
    }

    #[test]
    fn drift_lists_missing_and_unexpected() {
        let c = compare_installed(
            &s(&["idna==3.4", "requests==2.31.0"]),
            &s(&["idna==3.4", "requests==2.32.0"]),
        );
        assert!(!c.ok);
        assert_eq!(
            c.detail,
            "missing requests==2.31.0; unexpected requests==2.32.0"
        );
    }

    use chrono::Utc;
    use reportlite_core::stamp::{ExecutionMode, STAMP_VERSION};
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    /// A built-looking envelope whose interpreter appends its uid to `uids`.
    fn envelope(dir: &Path, identity: &Identity) -> BuildStamp {
        fs::set_permissions(dir, fs::Permissions::from_mode(0o755)).unwrap();
        let marker = dir.join("uids");
        fs::write(&marker, "").unwrap();
        fs::set_permissions(&marker, fs::Permissions::from_mode(0o666)).unwrap();
        let venv = dir.join("venv");
        fs::create_dir_all(venv.join("bin")).unwrap();
        let python = venv.join("bin/python");
        fs::write(
            &python,
            format!(
                "#!/bin/sh\nid -u >> {}\n[ \"$1\" = --version ] && echo 'Python 3.7.17'\nexit 0\n",
                marker.display()
            ),
        )
        .unwrap();
        fs::set_permissions(&python, fs::Permissions::from_mode(0o755)).unwrap();
        let app = dir.join("app");
        fs::create_dir_all(&app).unwrap();
        BuildStamp {
            version: STAMP_VERSION,
            built_at: Utc::now(),
            app_root: app,
            venv_root: venv,
            home: dir.join("home"),
            task: "monthly-report.py".to_string(),
            user: identity.name.clone(),
            group: identity.group.clone(),
            uid: identity.uid,
            gid: identity.gid,
            python_version: "3.7.17".to_string(),
            manifest_digest: String::new(),
            installed: Vec::new(),
            mode: ExecutionMode::OneShot,
        }
    }

    #[test]
    fn privileged_verify_runs_interpreter_as_stamped_identity() {
        if !privilege::is_privileged() {
            return;
        }
        let Ok(Some(nobody)) = Identity::lookup("nobody") else {
            return;
        };
        let dir = tempfile::tempdir().unwrap();
        let stamp = envelope(dir.path(), &nobody);
        stamp.write().unwrap();

        assert_eq!(cmd_verify(&stamp.app_root, true).unwrap(), 1);
        let uids = fs::read_to_string(dir.path().join("uids")).unwrap();
        let uids: Vec<&str> = uids.lines().collect();
        assert!(!uids.is_empty());
        let expected = nobody.uid.to_string();
        assert!(uids.iter().all(|u| *u == expected), "{uids:?}");
    }

    #[test]
    fn root_stamp_never_executes_the_interpreter() {
        if !privilege::is_privileged() {
            return;
        }
        let Ok(Some(root)) = Identity::lookup("root") else {
            return;
        };
        let dir = tempfile::tempdir().unwrap();
        let stamp = envelope(dir.path(), &root);

        let checks = run_checks(&stamp);
        let interpreter = checks.iter().find(|c| c.name == "interpreter").unwrap();
        assert!(!interpreter.ok);
        assert!(interpreter.detail.contains("uid 0"));
        assert_eq!(fs::read_to_string(dir.path().join("uids")).unwrap(), "");
    }

    #[test]
    fn missing_stamp_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(cmd_verify(dir.path(), true).is_err());
    }
}
