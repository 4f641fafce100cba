//! Dependency manifest: the declared `(name, version-constraint)` set
//! installed into the isolated runtime at build time.
//!
//! Only plain requirement lines are accepted. Installer options (`-r`,
//! `--index-url`, ...) and direct URL references are rejected so that the
//! same manifest always resolves the same way.

use anyhow::Context;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::Path;
use std::sync::OnceLock;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ManifestError {
    #[error("line {line}: installer options are not allowed in the manifest: '{text}'")]
    OptionLine { line: usize, text: String },

    #[error("line {line}: malformed requirement '{text}'")]
    Malformed { line: usize, text: String },

    #[error("line {line}: '{name}' is already declared on line {first}")]
    Duplicate {
        line: usize,
        first: usize,
        name: String,
    },
}

/// One declared dependency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    pub name: String,
    pub extras: Option<String>,
    /// Version constraint, e.g. `==2.31.0` or `>=1.0,<2`
    pub constraint: Option<String>,
    /// Environment marker after `;`
    pub marker: Option<String>,
    /// 1-based line number in the manifest
    pub line: usize,
}

impl Requirement {
    /// Canonical package name: lowercase, runs of `-_.` collapsed to `-`.
    pub fn canonical_name(&self) -> String {
        canonicalize(&self.name)
    }

    /// Normalised form used for digests and log output.
    pub fn normalized(&self) -> String {
        let mut s = self.canonical_name();
        if let Some(ref extras) = self.extras {
            s.push_str(&extras.replace(char::is_whitespace, ""));
        }
        if let Some(ref c) = self.constraint {
            s.push_str(&c.replace(char::is_whitespace, ""));
        }
        if let Some(ref m) = self.marker {
            s.push_str("; ");
            s.push_str(m);
        }
        s
    }
}

/// Ordered dependency set parsed from a manifest file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencySet {
    pub requirements: Vec<Requirement>,
}

impl DependencySet {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Read dependency manifest {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Parse dependency manifest {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self, ManifestError> {
        let mut requirements = Vec::new();
        let mut seen: HashMap<String, usize> = HashMap::new();

        for (idx, raw) in content.lines().enumerate() {
            let line_no = idx + 1;
            let text = strip_comment(raw).trim();
            if text.is_empty() {
                continue;
            }
            if text.starts_with('-') {
                return Err(ManifestError::OptionLine {
                    line: line_no,
                    text: text.to_string(),
                });
            }
            let req = parse_line(text, line_no)?;
            let key = req.canonical_name();
            if let Some(&first) = seen.get(&key) {
                return Err(ManifestError::Duplicate {
                    line: line_no,
                    first,
                    name: req.name,
                });
            }
            seen.insert(key, line_no);
            requirements.push(req);
        }

        Ok(Self { requirements })
    }

    pub fn len(&self) -> usize {
        self.requirements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    /// sha256 over the normalised requirement lines, in declaration order.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        for req in &self.requirements {
            hasher.update(req.normalized().as_bytes());
            hasher.update(b"\n");
        }
        hex::encode(hasher.finalize())
    }
}

fn requirement_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^(?P<name>[A-Za-z0-9](?:[A-Za-z0-9._-]*[A-Za-z0-9])?)\s*(?P<extras>\[[A-Za-z0-9._,\s-]*\])?\s*(?P<constraint>(?:===|==|>=|<=|~=|!=|>|<)[^;]+)?(?:;\s*(?P<marker>.+))?$",
        )
        .expect("requirement regex is valid")
    })
}

fn parse_line(text: &str, line: usize) -> Result<Requirement, ManifestError> {
    let malformed = || ManifestError::Malformed {
        line,
        text: text.to_string(),
    };
    let caps = requirement_re().captures(text).ok_or_else(malformed)?;
    let name = caps.name("name").ok_or_else(malformed)?.as_str().to_string();
    let constraint = caps.name("constraint").map(|m| m.as_str().trim().to_string());
    // Every comma-separated clause must carry its own operator.
    if let Some(ref c) = constraint {
        let ops = ["===", "==", ">=", "<=", "~=", "!=", ">", "<"];
        let ok = c.split(',').all(|clause| {
            let clause = clause.trim();
            ops.iter()
                .find_map(|op| clause.strip_prefix(op))
                .map(str::trim)
                .map(|v| !v.is_empty() && !v.contains(char::is_whitespace))
                .unwrap_or(false)
        });
        if !ok {
            return Err(malformed());
        }
    }
    Ok(Requirement {
        name,
        extras: caps.name("extras").map(|m| m.as_str().to_string()),
        constraint,
        marker: caps.name("marker").map(|m| m.as_str().trim().to_string()),
        line,
    })
}

/// Comments start at `#` at line start or after whitespace.
fn strip_comment(line: &str) -> &str {
    let bytes = line.as_bytes();
    for (i, b) in bytes.iter().enumerate() {
        if *b == b'#' && (i == 0 || bytes[i - 1].is_ascii_whitespace()) {
            return &line[..i];
        }
    }
    line
}

fn canonicalize(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_sep = false;
    for ch in name.chars() {
        if matches!(ch, '-' | '_' | '.') {
            if !last_sep {
                out.push('-');
            }
            last_sep = true;
        } else {
            out.push(ch.to_ascii_lowercase());
            last_sep = false;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_pinned_and_ranged_requirements() {
        let set = DependencySet::parse(
            "# report deps\nPyYAML==5.4.1\nrequests >= 2.25, <3  # http\nbs4\n\nurllib3[socks]~=1.26; python_version < \"3.8\"\n",
        )
        .unwrap();
        assert_eq!(set.len(), 4);
        assert_eq!(set.requirements[0].name, "PyYAML");
        assert_eq!(set.requirements[0].constraint.as_deref(), Some("==5.4.1"));
        assert_eq!(set.requirements[1].constraint.as_deref(), Some(">= 2.25, <3"));
        assert_eq!(set.requirements[1].line, 3);
        assert_eq!(set.requirements[2].constraint, None);
        assert_eq!(set.requirements[3].extras.as_deref(), Some("[socks]"));
        assert_eq!(
            set.requirements[3].marker.as_deref(),
            Some("python_version < \"3.8\"")
        );
    }

    #[test]
    fn rejects_installer_options() {
        let err = DependencySet::parse("requests\n-r other.txt\n").unwrap_err();
        assert!(matches!(err, ManifestError::OptionLine { line: 2, .. }));
        let err = DependencySet::parse("--index-url https://example.org/simple\n").unwrap_err();
        assert!(matches!(err, ManifestError::OptionLine { line: 1, .. }));
    }

    #[test]
    fn rejects_malformed_lines() {
        for bad in [
            "requests @ https://example.org/requests.tar.gz",
            "requests==",
            "requests >=1.0, 2.0",
            "==1.0",
        ] {
            let err = DependencySet::parse(bad).unwrap_err();
            assert!(
                matches!(err, ManifestError::Malformed { line: 1, .. }),
                "expected malformed for {bad:?}, got {err:?}"
            );
        }
    }

    #[test]
    fn rejects_duplicates_after_normalisation() {
        let err = DependencySet::parse("python-dateutil==2.8\nPython_DateUtil>=2\n").unwrap_err();
        assert_eq!(
            err,
            ManifestError::Duplicate {
                line: 2,
                first: 1,
                name: "Python_DateUtil".to_string()
            }
        );
    }

    #[test]
    fn digest_ignores_comments_and_whitespace_but_not_order() {
        let a = DependencySet::parse("requests>=2.25,<3\nPyYAML==5.4.1\n").unwrap();
        let b = DependencySet::parse("# pinned\nrequests >= 2.25, < 3   # http\n\npyyaml==5.4.1\n")
            .unwrap();
        let reordered = DependencySet::parse("PyYAML==5.4.1\nrequests>=2.25,<3\n").unwrap();
        assert_eq!(a.digest(), b.digest());
        assert_ne!(a.digest(), reordered.digest());
    }

    #[test]
    fn empty_manifest_is_valid() {
        let set = DependencySet::parse("\n# nothing yet\n").unwrap();
        assert!(set.is_empty());
    }

    #[test]
    fn load_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = DependencySet::load(&dir.path().join("requirements.txt")).unwrap_err();
        assert!(format!("{err:#}").contains("requirements.txt"));
    }
}
