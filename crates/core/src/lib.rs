//! MergeWarn core library.
//!
//! Each participant publishes the set of lines it has changed relative to a
//! shared base branch and is warned, as soon as it happens, when a peer's
//! published set touches the same lines: configuration, git diffing, the
//! shared store, conflict evaluation and reporting, and the two agent loops.

pub mod agent;
pub mod config;
pub mod conflict;
pub mod errors;
pub mod git;
pub mod listener;
pub mod publisher;
pub mod scheduler;
pub mod shutdown;
pub mod snapshot;
pub mod store;
pub mod watcher;

// Re-exports for convenience.
pub use agent::Agent;
pub use config::AppConfig;
pub use conflict::{ConflictEvaluator, ConflictRecord, ConflictReporter};
pub use errors::CoreError;
pub use snapshot::EditSet;
pub use store::{MemoryStore, SharedStore};
