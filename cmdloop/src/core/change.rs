//! Deterministic classification of an applied command block.

use std::collections::BTreeMap;

/// Content fingerprint of a watched path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fingerprint {
    Missing,
    Directory,
    /// Device, fifo or socket; never read.
    Special,
    /// Hex-encoded SHA-256 of the file contents.
    File(String),
}

/// Fingerprints of every watched path at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    entries: BTreeMap<String, Fingerprint>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<String>, fingerprint: Fingerprint) {
        self.entries.insert(path.into(), fingerprint);
    }

    pub fn get(&self, path: &str) -> Option<&Fingerprint> {
        self.entries.get(path)
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Paths whose fingerprint differs between `before` and `after`.
///
/// A path absent from `after` counts as `Missing`.
pub fn changed_paths(before: &Snapshot, after: &Snapshot) -> Vec<String> {
    before
        .entries
        .iter()
        .filter(|(path, fp)| after.get(path).unwrap_or(&Fingerprint::Missing) != *fp)
        .map(|(path, _)| path.clone())
        .collect()
}

/// How the loop should treat an applied command block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepVerdict {
    Success,
    Failure { error: String },
}

impl StepVerdict {
    pub fn is_success(&self) -> bool {
        matches!(self, StepVerdict::Success)
    }
}

/// Classify a shell step from its exit status and the watched fingerprints.
///
/// A zero exit that leaves every watched path unchanged is a failure: the
/// commands most likely targeted text that was not there. Blocks that watch
/// no paths are judged by exit status alone.
pub fn classify_step(
    exit_ok: bool,
    error_text: &str,
    before: &Snapshot,
    after: &Snapshot,
) -> StepVerdict {
    if !exit_ok {
        return StepVerdict::Failure {
            error: error_text.trim().to_string(),
        };
    }
    if before.is_empty() || !changed_paths(before, after).is_empty() {
        return StepVerdict::Success;
    }
    let watched: Vec<&str> = before.paths().collect();
    StepVerdict::Failure {
        error: format!(
            "commands exited 0 but changed none of the watched files ({}); \
             pattern not found, the edit was a no-op",
            watched.join(", ")
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(entries: &[(&str, Fingerprint)]) -> Snapshot {
        let mut snap = Snapshot::new();
        for (path, fp) in entries {
            snap.insert(*path, fp.clone());
        }
        snap
    }

    #[test]
    fn created_file_is_a_change() {
        let before = snapshot(&[("a.txt", Fingerprint::Missing)]);
        let after = snapshot(&[("a.txt", Fingerprint::File("e3b0".to_string()))]);
        assert_eq!(changed_paths(&before, &after), vec!["a.txt"]);
        assert!(classify_step(true, "", &before, &after).is_success());
    }

    #[test]
    fn unchanged_watched_files_fail_despite_zero_exit() {
        let before = snapshot(&[
            ("existing.txt", Fingerprint::File("abc".to_string())),
            ("s/foo/foo/", Fingerprint::Missing),
        ]);
        let after = before.clone();
        match classify_step(true, "", &before, &after) {
            StepVerdict::Failure { error } => {
                assert!(error.contains("pattern not found"));
                assert!(error.contains("existing.txt"));
            }
            StepVerdict::Success => panic!("no-op edit must fail"),
        }
    }

    #[test]
    fn one_changed_path_is_enough() {
        let before = snapshot(&[
            ("a.txt", Fingerprint::File("1".to_string())),
            ("b.txt", Fingerprint::File("2".to_string())),
        ]);
        let after = snapshot(&[
            ("a.txt", Fingerprint::File("1".to_string())),
            ("b.txt", Fingerprint::Missing),
        ]);
        assert!(classify_step(true, "", &before, &after).is_success());
    }

    #[test]
    fn nonzero_exit_fails_with_error_text() {
        let before = snapshot(&[("a.txt", Fingerprint::Missing)]);
        let after = snapshot(&[("a.txt", Fingerprint::Directory)]);
        assert_eq!(
            classify_step(false, "  sed: can't read x  \n", &before, &after),
            StepVerdict::Failure {
                error: "sed: can't read x".to_string()
            }
        );
    }

    #[test]
    fn nothing_watched_trusts_exit_status() {
        let empty = Snapshot::new();
        assert!(classify_step(true, "", &empty, &empty).is_success());
    }
}
