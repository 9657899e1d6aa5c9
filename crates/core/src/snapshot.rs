//! Edit-set snapshots: building, comparing, and the wire format.
//!
//! An [`EditSet`] is one participant's changed lines relative to the shared
//! base branch. Entries live in a `BTreeMap` and every line list is sorted
//! and deduplicated, so derived equality is structural and the JSON encoding
//! is canonical.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::{GitError, SnapshotError};
use crate::git::{DiffProvider, WorkingDiff};

// ---------------------------------------------------------------------------
// EditSet
// ---------------------------------------------------------------------------

/// One participant's published change-set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditSet {
    pub participant: String,
    #[serde(default)]
    pub branch: Option<String>,
    /// File path -> ascending, deduplicated line numbers. Never holds an
    /// empty line list.
    #[serde(default)]
    pub entries: BTreeMap<String, Vec<u32>>,
}

impl EditSet {
    /// A snapshot with no pending changes.
    pub fn empty(participant: impl Into<String>, branch: Option<String>) -> Self {
        Self {
            participant: participant.into(),
            branch,
            entries: BTreeMap::new(),
        }
    }

    /// Build from arbitrary line collections, enforcing the entry invariants.
    pub fn from_lines<I, P, L>(participant: impl Into<String>, branch: Option<String>, files: I) -> Self
    where
        I: IntoIterator<Item = (P, L)>,
        P: Into<String>,
        L: IntoIterator<Item = u32>,
    {
        let mut merged: BTreeMap<String, BTreeSet<u32>> = BTreeMap::new();
        for (path, lines) in files {
            merged.entry(path.into()).or_default().extend(lines);
        }
        let entries: BTreeMap<String, Vec<u32>> = merged
            .into_iter()
            .filter(|(_, lines)| !lines.is_empty())
            .map(|(path, lines)| (path, lines.into_iter().collect()))
            .collect();
        Self {
            participant: participant.into(),
            branch,
            entries,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total number of (file, line) pairs.
    pub fn line_count(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    /// Serialize to the storage form.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Decode a value read from the shared store under `key`.
    ///
    /// Accepts the current object form and the legacy array-of-files form.
    /// The result is normalized; the store key is authoritative for the
    /// participant identity.
    pub fn from_wire(key: &str, raw: &str) -> Result<Self, SnapshotError> {
        if key.is_empty() {
            return Err(SnapshotError::EmptyParticipant(key.to_string()));
        }
        let wire: WireSnapshot =
            serde_json::from_str(raw).map_err(|e| SnapshotError::Malformed {
                participant: key.to_string(),
                detail: e.to_string(),
            })?;

        let edit_set = match wire {
            WireSnapshot::Current(set) => {
                if set.participant != key {
                    debug!(key, participant = %set.participant, "snapshot participant differs from store key");
                }
                Self::from_lines(key, set.branch, set.entries)
            }
            WireSnapshot::Legacy(files) => {
                let branch = files.iter().find_map(|f| f.branch.clone()).filter(|b| !b.is_empty());
                Self::from_lines(
                    key,
                    branch,
                    files.into_iter().map(|f| (f.filename, f.line_numbers)),
                )
            }
        };
        Ok(edit_set)
    }
}

/// Everything a peer may have written under its key.
#[derive(Deserialize)]
#[serde(untagged)]
enum WireSnapshot {
    Current(EditSet),
    Legacy(Vec<LegacyFileEdit>),
}

/// Per-file record written by older agents.
#[derive(Deserialize)]
struct LegacyFileEdit {
    filename: String,
    #[serde(rename = "lineNumbers", default)]
    line_numbers: Vec<u32>,
    #[serde(default)]
    branch: Option<String>,
}

// ---------------------------------------------------------------------------
// Builder & change detection
// ---------------------------------------------------------------------------

/// Turns a raw diff into a canonical [`EditSet`] for one participant.
#[derive(Debug, Clone)]
pub struct SnapshotBuilder {
    participant: String,
}

impl SnapshotBuilder {
    pub fn new(participant: impl Into<String>) -> Self {
        Self {
            participant: participant.into(),
        }
    }

    pub fn participant(&self) -> &str {
        &self.participant
    }

    /// Sort each file's lines and stamp identity. Never fails; an empty diff
    /// yields an empty snapshot.
    pub fn build(&self, diff: WorkingDiff) -> EditSet {
        EditSet::from_lines(self.participant.clone(), diff.branch, diff.files)
    }
}

/// Whether `current` must be published given what was last published.
pub fn has_changed(previous: Option<&EditSet>, current: &EditSet) -> bool {
    previous != Some(current)
}

// ---------------------------------------------------------------------------
// Local snapshot source
// ---------------------------------------------------------------------------

/// Captures the local participant's current snapshot.
///
/// The diff runs on tokio's blocking pool since providers do repository I/O.
#[derive(Clone)]
pub struct SnapshotSource {
    provider: Arc<dyn DiffProvider>,
    builder: SnapshotBuilder,
}

impl SnapshotSource {
    pub fn new(provider: Arc<dyn DiffProvider>, builder: SnapshotBuilder) -> Self {
        Self { provider, builder }
    }

    pub fn participant(&self) -> &str {
        self.builder.participant()
    }

    pub async fn capture(&self) -> Result<EditSet, GitError> {
        let provider = self.provider.clone();
        let diff = tokio::task::spawn_blocking(move || provider.changed_lines())
            .await
            .map_err(|e| GitError::TaskFailed(e.to_string()))??;
        Ok(self.builder.build(diff))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diff(branch: Option<&str>, files: &[(&str, &[u32])]) -> WorkingDiff {
        WorkingDiff {
            branch: branch.map(str::to_string),
            files: files
                .iter()
                .map(|(path, lines)| (path.to_string(), lines.iter().copied().collect()))
                .collect(),
        }
    }

    #[test]
    fn test_build_sorts_lines_and_stamps_identity() {
        let builder = SnapshotBuilder::new("alice");
        let set = builder.build(diff(Some("feature"), &[("a.txt", &[9, 3, 7])]));
        assert_eq!(set.participant, "alice");
        assert_eq!(set.branch.as_deref(), Some("feature"));
        assert_eq!(set.entries["a.txt"], vec![3, 7, 9]);
    }

    #[test]
    fn test_build_empty_diff() {
        let set = SnapshotBuilder::new("alice").build(WorkingDiff::default());
        assert!(set.is_empty());
        assert_eq!(set.participant, "alice");
    }

    #[test]
    fn test_build_drops_files_without_lines() {
        let set = SnapshotBuilder::new("alice").build(diff(None, &[("a.txt", &[]), ("b.txt", &[1])]));
        assert_eq!(set.entries.len(), 1);
        assert!(set.entries.contains_key("b.txt"));
    }

    #[test]
    fn test_unchanged_regardless_of_insertion_order() {
        let a = EditSet::from_lines("alice", None, vec![("a.txt", vec![1, 2]), ("b.txt", vec![5])]);
        let b = EditSet::from_lines("alice", None, vec![("b.txt", vec![5]), ("a.txt", vec![2, 1])]);
        assert!(!has_changed(Some(&a), &b));
    }

    #[test]
    fn test_changed_cases() {
        let base = EditSet::from_lines("alice", Some("main".into()), vec![("a.txt", vec![1])]);
        assert!(has_changed(None, &base));

        let other_branch = EditSet::from_lines("alice", Some("dev".into()), vec![("a.txt", vec![1])]);
        assert!(has_changed(Some(&base), &other_branch));

        let other_lines = EditSet::from_lines("alice", Some("main".into()), vec![("a.txt", vec![1, 2])]);
        assert!(has_changed(Some(&base), &other_lines));

        let cleared = EditSet::empty("alice", Some("main".into()));
        assert!(has_changed(Some(&base), &cleared));
    }

    #[test]
    fn test_from_lines_dedups_repeated_paths() {
        let set = EditSet::from_lines("alice", None, vec![("a.txt", vec![4, 2]), ("a.txt", vec![2, 3])]);
        assert_eq!(set.entries["a.txt"], vec![2, 3, 4]);
        assert_eq!(set.line_count(), 3);
    }

    #[test]
    fn test_wire_is_canonical() {
        let a = EditSet::from_lines("alice", None, vec![("z.txt", vec![1]), ("a.txt", vec![2])]);
        let json = a.to_json().unwrap();
        assert_eq!(
            json,
            r#"{"participant":"alice","branch":null,"entries":{"a.txt":[2],"z.txt":[1]}}"#
        );
        assert_eq!(EditSet::from_wire("alice", &json).unwrap(), a);
    }

    #[test]
    fn test_from_wire_normalizes_unsorted_input() {
        let raw = r#"{"participant":"bob","entries":{"a.txt":[9,7,7],"b.txt":[]}}"#;
        let set = EditSet::from_wire("bob", raw).unwrap();
        assert_eq!(set.entries.len(), 1);
        assert_eq!(set.entries["a.txt"], vec![7, 9]);
    }

    #[test]
    fn test_from_wire_legacy_array() {
        let raw = r#"[{"filename":"a.txt","lineNumbers":[7,9],"user":"bob","branch":"master"},
                      {"filename":"b.txt","lineNumbers":[1],"user":"bob","branch":"master"}]"#;
        let set = EditSet::from_wire("bob", raw).unwrap();
        assert_eq!(set.participant, "bob");
        assert_eq!(set.branch.as_deref(), Some("master"));
        assert_eq!(set.entries["a.txt"], vec![7, 9]);
        assert_eq!(set.entries["b.txt"], vec![1]);
    }

    #[test]
    fn test_from_wire_rejects_garbage() {
        let err = EditSet::from_wire("bob", "not json").unwrap_err();
        assert!(matches!(err, SnapshotError::Malformed { ref participant, .. } if participant == "bob"));

        let err = EditSet::from_wire("bob", r#"{"entries": 3}"#).unwrap_err();
        assert!(matches!(err, SnapshotError::Malformed { .. }));
    }

    #[test]
    fn test_from_wire_key_is_authoritative() {
        let raw = r#"{"participant":"mallory","entries":{"a.txt":[1]}}"#;
        let set = EditSet::from_wire("bob", raw).unwrap();
        assert_eq!(set.participant, "bob");
    }
}
