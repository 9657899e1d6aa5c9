//! Git-backed diff provider.

pub mod diff;

pub use diff::{current_branch, resolve_identity, DiffProvider, GitDiffProvider, WorkingDiff};
