//! Line-level overlap detection between the local edit-set and every peer's.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{AppConfig, PeerBranches};
use crate::snapshot::EditSet;

/// One local edit that collides with a peer's edit on the same file and line.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConflictRecord {
    pub peer: String,
    pub file: String,
    pub line: u32,
}

impl ConflictRecord {
    pub fn new(peer: impl Into<String>, file: impl Into<String>, line: u32) -> Self {
        Self {
            peer: peer.into(),
            file: file.into(),
            line,
        }
    }
}

/// Stateless evaluator configured with the comparison rules.
#[derive(Debug, Clone, Default)]
pub struct ConflictEvaluator {
    /// Single-user test mode: compare against our own published row too.
    self_compare: bool,
    peer_branches: PeerBranches,
}

impl ConflictEvaluator {
    pub fn new(self_compare: bool, peer_branches: PeerBranches) -> Self {
        Self {
            self_compare,
            peer_branches,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.agent.self_compare, config.conflicts.peer_branches)
    }

    /// Compute every `(peer, file, line)` where `local` and a peer snapshot
    /// in `shared` touch the same line.
    ///
    /// `shared` maps store keys to raw stored values. A value that fails to
    /// decode only drops that peer. The result is sorted and holds no
    /// duplicate triples.
    pub fn evaluate(&self, local: &EditSet, shared: &HashMap<String, String>) -> Vec<ConflictRecord> {
        if local.is_empty() {
            debug!("no local edits, nothing can conflict");
            return Vec::new();
        }

        // Visit peers in key order so logs read the same on every run.
        let peers: BTreeMap<&str, &str> = shared
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();

        let mut conflicts = Vec::new();
        for (peer, raw) in peers {
            if peer == local.participant && !self.self_compare {
                continue;
            }

            let peer_set = match EditSet::from_wire(peer, raw) {
                Ok(set) => set,
                Err(e) => {
                    warn!(peer, error = %e, "skipping unreadable peer snapshot");
                    continue;
                }
            };

            if self.peer_branches == PeerBranches::Same && peer_set.branch != local.branch {
                debug!(
                    peer,
                    peer_branch = peer_set.branch.as_deref().unwrap_or("<detached>"),
                    "skipping peer on another branch"
                );
                continue;
            }

            for (file, local_lines) in &local.entries {
                let Some(peer_lines) = peer_set.entries.get(file) else {
                    continue;
                };
                for line in intersect_sorted(local_lines, peer_lines) {
                    conflicts.push(ConflictRecord::new(peer, file.as_str(), line));
                }
            }
        }

        conflicts.sort();
        conflicts.dedup();

        if !conflicts.is_empty() {
            info!(count = conflicts.len(), "overlapping edits detected");
        }
        conflicts
    }
}

/// Intersection of two ascending, duplicate-free sequences.
fn intersect_sorted(a: &[u32], b: &[u32]) -> Vec<u32> {
    let mut out = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                out.push(a[i]);
                i += 1;
                j += 1;
            }
        }
    }
    out
}
