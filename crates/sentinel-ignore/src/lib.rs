//! Builds a path matcher from `.gitignore`, `.secretignore`, and
//! CLI-provided extra patterns (§4.D). Matching uses standard gitignore
//! semantics against a path relative to the process working directory.
//! The resolver is a pure function — its result is not cached across
//! scans, since rebuilding it is cheap relative to a full tree walk.

use std::path::Path;

use anyhow::{Context, Result};
use ignore::gitignore::{Gitignore, GitignoreBuilder};

/// Whether a candidate path matched an ignore rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Ignored,
    Allowed,
}

pub struct IgnoreMatcher {
    inner: Gitignore,
}

impl IgnoreMatcher {
    /// Build a matcher from `.gitignore` and `.secretignore` in `root`
    /// (either may be absent), followed by `extra_patterns` in order.
    pub fn build(root: &Path, extra_patterns: &[String]) -> Result<IgnoreMatcher> {
        let mut builder = GitignoreBuilder::new(root);

        for name in [".gitignore", ".secretignore"] {
            let path = root.join(name);
            if path.is_file() {
                if let Some(err) = builder.add(&path) {
                    return Err(err).with_context(|| format!("failed to parse {}", path.display()));
                }
            }
        }

        for pattern in extra_patterns {
            builder
                .add_line(None, pattern)
                .with_context(|| format!("invalid ignore pattern {pattern:?}"))?;
        }

        let inner = builder.build().context("failed to build ignore matcher")?;
        Ok(IgnoreMatcher { inner })
    }

    /// Decide whether `path` (relative to the process working directory)
    /// should be skipped. `is_dir` affects directory-only gitignore rules
    /// (a trailing `/` in the pattern).
    pub fn decide(&self, path: &Path, is_dir: bool) -> Decision {
        match self.inner.matched(path, is_dir) {
            ignore::Match::None | ignore::Match::Whitelist(_) => Decision::Allowed,
            ignore::Match::Ignore(_) => Decision::Ignored,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn honors_gitignore_file() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(".gitignore"), "target/\n*.secret\n").unwrap();
        let matcher = IgnoreMatcher::build(dir.path(), &[]).unwrap();

        assert_eq!(
            matcher.decide(Path::new("target"), true),
            Decision::Ignored
        );
        assert_eq!(
            matcher.decide(Path::new("a.secret"), false),
            Decision::Ignored
        );
        assert_eq!(
            matcher.decide(Path::new("src/main.rs"), false),
            Decision::Allowed
        );
    }

    #[test]
    fn honors_secretignore_file() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(".secretignore"), "fixtures/\n").unwrap();
        let matcher = IgnoreMatcher::build(dir.path(), &[]).unwrap();

        assert_eq!(
            matcher.decide(Path::new("fixtures"), true),
            Decision::Ignored
        );
    }

    #[test]
    fn appends_cli_patterns_after_files() {
        let dir = tempdir().unwrap();
        let matcher =
            IgnoreMatcher::build(dir.path(), &["*.log".to_string()]).unwrap();

        assert_eq!(
            matcher.decide(Path::new("debug.log"), false),
            Decision::Ignored
        );
    }

    #[test]
    fn missing_ignore_files_yield_allow_all() {
        let dir = tempdir().unwrap();
        let matcher = IgnoreMatcher::build(dir.path(), &[]).unwrap();
        assert_eq!(
            matcher.decide(Path::new("anything.txt"), false),
            Decision::Allowed
        );
    }
}
