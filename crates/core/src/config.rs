//! TOML-based configuration for the MergeWarn agent.
//!
//! Every section has serde defaults so an empty file (or no file at all, via
//! [`AppConfig::default`]) yields a usable single-machine setup. The store
//! password is referenced by an `_env` field naming an environment variable
//! and resolved at runtime via [`AppConfig::resolve_env_vars`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::ConfigError;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level application configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Identity and loop settings.
    #[serde(default)]
    pub agent: AgentConfig,

    /// Repository being tracked.
    #[serde(default)]
    pub repo: RepoConfig,

    /// Shared store / broadcast channel.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Conflict evaluation rules.
    #[serde(default)]
    pub conflicts: ConflictConfig,

    /// Output of conflict records.
    #[serde(default)]
    pub report: ReportConfig,
}

// ---------------------------------------------------------------------------
// Agent
// ---------------------------------------------------------------------------

/// What wakes the publish loop.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TriggerMode {
    /// Rebuild on a fixed interval.
    #[default]
    Poll,
    /// Rebuild when files under the repository change.
    Watch,
}

/// Agent identity and loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Participant identity used as the shared-store key. When unset, the
    /// repository's git `user.email` (then `user.name`) is used.
    #[serde(default)]
    pub participant: Option<String>,

    /// Seconds between publish cycles in poll mode (default 5).
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Publish loop trigger.
    #[serde(default)]
    pub trigger: TriggerMode,

    /// Compare the local edits against our own published row too. Lets a
    /// single operator exercise the whole pipeline without a second peer.
    #[serde(default)]
    pub self_compare: bool,

    /// Minimum tracing level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_poll_interval() -> u64 {
    5
}
fn default_log_level() -> String {
    "info".into()
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            participant: None,
            poll_interval_secs: default_poll_interval(),
            trigger: TriggerMode::default(),
            self_compare: false,
            log_level: default_log_level(),
        }
    }
}

impl AgentConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

// ---------------------------------------------------------------------------
// Repository
// ---------------------------------------------------------------------------

/// How the working state is compared against the base branch.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BranchMode {
    /// Always diff the base tree against the working directory and index.
    #[default]
    WorkingTree,
    /// Off the base branch, diff the base tree against the branch tip's tree
    /// (committed work only). On the base branch, behaves like `WorkingTree`.
    BranchTip,
}

/// Repository settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoConfig {
    /// Path to the repository (default `.`).
    #[serde(default = "default_repo_path")]
    pub path: PathBuf,

    /// Shared base branch every participant diffs against (default `master`).
    #[serde(default = "default_base_branch")]
    pub base_branch: String,

    /// Diff strategy.
    #[serde(default)]
    pub branch_mode: BranchMode,

    /// Treat untracked files as fully added.
    #[serde(default)]
    pub include_untracked: bool,

    /// Glob patterns of paths that are never published (e.g. `*.lock`).
    #[serde(default)]
    pub ignore_paths: Vec<String>,
}

fn default_repo_path() -> PathBuf {
    PathBuf::from(".")
}
fn default_base_branch() -> String {
    "master".into()
}

impl Default for RepoConfig {
    fn default() -> Self {
        Self {
            path: default_repo_path(),
            base_branch: default_base_branch(),
            branch_mode: BranchMode::default(),
            include_untracked: false,
            ignore_paths: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// Which shared store backs the agent.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Redis hash + pub/sub channel.
    #[default]
    Redis,
    /// In-process store; only useful together with `self_compare`.
    Memory,
}

/// Shared store connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    #[serde(default)]
    pub kind: TransportKind,

    /// `host:port` or a full `redis://` URL (default `localhost:6379`).
    #[serde(default = "default_transport_url")]
    pub url: String,

    /// Environment variable holding the store password.
    #[serde(default)]
    pub password_env: Option<String>,

    /// Hash holding one serialized edit-set per participant.
    #[serde(default = "default_hash_key")]
    pub hash_key: String,

    /// Broadcast channel for change notifications.
    #[serde(default = "default_channel")]
    pub channel: String,

    /// Resolved password (populated by `resolve_env_vars`).
    #[serde(skip)]
    pub password: Option<String>,
}

fn default_transport_url() -> String {
    "localhost:6379".into()
}
fn default_hash_key() -> String {
    "mergewarnDiffs".into()
}
fn default_channel() -> String {
    "newChange".into()
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            kind: TransportKind::default(),
            url: default_transport_url(),
            password_env: None,
            hash_key: default_hash_key(),
            channel: default_channel(),
            password: None,
        }
    }
}

impl TransportConfig {
    /// Normalized `redis://` address. The resolved password is never part
    /// of it; the store hands it to the client as a separate field.
    pub fn redis_url(&self) -> String {
        let host = self
            .url
            .strip_prefix("redis://")
            .unwrap_or(&self.url)
            .trim_end_matches('/');
        format!("redis://{}", host)
    }
}

// ---------------------------------------------------------------------------
// Conflicts
// ---------------------------------------------------------------------------

/// Which peers are compared against.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PeerBranches {
    /// Every peer, regardless of the branch they are on.
    #[default]
    Any,
    /// Only peers whose published branch equals ours.
    Same,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConflictConfig {
    #[serde(default)]
    pub peer_branches: PeerBranches,
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// Shape of the JSON array in each emitted record.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    /// One `{peer, file, line}` object per conflicting line.
    #[default]
    Lines,
    /// One `{peer, file, lines}` object per peer and file.
    Grouped,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReportConfig {
    #[serde(default)]
    pub format: ReportFormat,
}

// ---------------------------------------------------------------------------
// Loading & resolving
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Load an [`AppConfig`] from a TOML file at the given path.
    ///
    /// This does **not** resolve environment variables -- call
    /// [`resolve_env_vars`](Self::resolve_env_vars) afterwards.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        debug!("configuration parsed successfully");
        Ok(config)
    }

    /// Resolve `*_env` fields from environment variables.
    ///
    /// A missing variable logs a warning and leaves the resolved field unset.
    pub fn resolve_env_vars(&mut self) -> Result<(), ConfigError> {
        if let Some(ref env_name) = self.transport.password_env {
            self.transport.password = resolve_optional_env(env_name, "transport.password_env");
        }
        debug!("environment variable resolution complete");
        Ok(())
    }

    /// Validate that all required fields are present and sane.
    ///
    /// The participant may still be unset here; it is filled from the
    /// repository's git identity before the agent starts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(ref participant) = self.agent.participant {
            if participant.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "agent.participant".into(),
                    detail: "participant must not be empty".into(),
                });
            }
        }
        if self.agent.poll_interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "agent.poll_interval_secs".into(),
                detail: "poll interval must be > 0".into(),
            });
        }
        if self.repo.base_branch.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "repo.base_branch".into(),
                detail: "base branch must not be empty".into(),
            });
        }
        if self.transport.hash_key.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "transport.hash_key".into(),
                detail: "hash key must not be empty".into(),
            });
        }
        if self.transport.channel.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "transport.channel".into(),
                detail: "channel must not be empty".into(),
            });
        }
        if self.transport.kind == TransportKind::Redis && self.transport.url.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "transport.url".into(),
                detail: "redis transport requires a url".into(),
            });
        }
        if self.transport.kind == TransportKind::Memory && !self.agent.self_compare {
            warn!("memory transport without self_compare will never report conflicts");
        }

        Ok(())
    }

    /// Convenience: load, resolve, and validate in one call.
    pub fn load_and_resolve<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.resolve_env_vars()?;
        config.validate()?;
        Ok(config)
    }
}

/// Try to read an environment variable by name. Returns `Some(value)` on
/// success; logs a warning and returns `None` if the variable is unset.
fn resolve_optional_env(env_name: &str, field: &str) -> Option<String> {
    match std::env::var(env_name) {
        Ok(val) if !val.is_empty() => {
            debug!(field, env_name, "resolved env var");
            Some(val)
        }
        Ok(_) => {
            warn!(field, env_name, "env var is set but empty");
            None
        }
        Err(_) => {
            warn!(field, env_name, "env var not set");
            None
        }
    }
}
