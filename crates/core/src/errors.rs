//! Error types for the MergeWarn core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`CoreError`] enum unifies them all for callers that want a
//! single error type.

use thiserror::Error;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Git(#[from] GitError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    /// The filesystem watcher could not be set up.
    #[error("filesystem watch error: {0}")]
    Watch(#[from] notify::Error),

    /// Writing a conflict record failed.
    #[error("failed to write conflict report: {0}")]
    Report(#[from] std::io::Error),

    /// A background task panicked or was cancelled.
    #[error("task failed: {0}")]
    TaskFailed(String),
}

// ---------------------------------------------------------------------------
// Git errors
// ---------------------------------------------------------------------------

/// Errors from the git-backed diff provider.
#[derive(Debug, Error)]
pub enum GitError {
    /// The repository path does not exist or is not a git repo.
    #[error("git repository not found at '{0}'")]
    RepositoryNotFound(String),

    /// A `git2` library error.
    #[error("git2 error: {0}")]
    Git2Error(#[from] git2::Error),

    /// A ref (branch, tag, SHA) could not be resolved.
    #[error("git ref not found: {0}")]
    RefNotFound(String),

    /// Neither `user.email` nor `user.name` is configured.
    #[error("no participant identity configured and git user.email/user.name are unset")]
    NoIdentity,

    /// The blocking diff task panicked or was cancelled.
    #[error("diff task failed: {0}")]
    TaskFailed(String),
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue {
        field: String,
        detail: String,
    },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Transport errors
// ---------------------------------------------------------------------------

/// Errors from the shared store and its broadcast channel.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Underlying Redis client error.
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// The subscription stream ended.
    #[error("subscription to '{0}' closed")]
    SubscriptionClosed(String),

    /// The store was shut down or is otherwise unusable.
    #[error("shared store unavailable: {0}")]
    Unavailable(String),

    /// The liveness probe after a failed read did not succeed either.
    #[error("liveness probe failed: {0}")]
    ProbeFailed(#[source] Box<TransportError>),

    /// A snapshot could not be serialized for publishing.
    #[error("failed to encode snapshot: {0}")]
    Encode(#[from] serde_json::Error),
}

// ---------------------------------------------------------------------------
// Snapshot errors
// ---------------------------------------------------------------------------

/// Errors decoding a published edit-set.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// The stored value is not valid JSON in either supported shape.
    #[error("malformed snapshot for '{participant}': {detail}")]
    Malformed {
        participant: String,
        detail: String,
    },

    /// The snapshot carries an empty participant identity.
    #[error("snapshot stored under '{0}' has an empty participant")]
    EmptyParticipant(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_messages() {
        let err = GitError::RepositoryNotFound("/tmp/repo".into());
        assert_eq!(err.to_string(), "git repository not found at '/tmp/repo'");

        let err = TransportError::SubscriptionClosed("newChange".into());
        assert_eq!(err.to_string(), "subscription to 'newChange' closed");

        let err = SnapshotError::Malformed {
            participant: "bob".into(),
            detail: "expected value".into(),
        };
        assert!(err.to_string().contains("bob"));
    }

    #[test]
    fn test_core_error_from_subsystem() {
        let core_err: CoreError = GitError::NoIdentity.into();
        assert!(matches!(core_err, CoreError::Git(_)));

        let core_err: CoreError = TransportError::Unavailable("closed".into()).into();
        assert!(matches!(core_err, CoreError::Transport(_)));

        let probe = TransportError::ProbeFailed(Box::new(TransportError::Unavailable("down".into())));
        assert_eq!(probe.to_string(), "liveness probe failed: shared store unavailable: down");
    }
}
