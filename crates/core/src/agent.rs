//! One participant: a publish loop and a listen loop over a shared store.

use std::io::{self, Write};
use std::sync::Arc;

use tracing::{error, info, instrument};

use crate::config::{AppConfig, TriggerMode};
use crate::conflict::{ConflictEvaluator, ConflictReporter};
use crate::errors::{CoreError, GitError};
use crate::git::{self, DiffProvider, GitDiffProvider};
use crate::listener::{ChangeListener, ListenStats};
use crate::publisher::Publisher;
use crate::scheduler::{CycleStats, PublishLoop, Trigger};
use crate::shutdown::Shutdown;
use crate::snapshot::{SnapshotBuilder, SnapshotSource};
use crate::store::SharedStore;
use crate::watcher::FsWatcher;

/// Pick the participant identity: the configured one, else the repository's
/// git identity.
pub fn resolve_participant(config: &AppConfig) -> Result<String, GitError> {
    match config.agent.participant.as_deref().map(str::trim) {
        Some(p) if !p.is_empty() => Ok(p.to_string()),
        _ => git::resolve_identity(&config.repo.path),
    }
}

/// Final counters from both loops.
#[derive(Debug, Clone, Default)]
pub struct AgentStats {
    pub publish: CycleStats,
    pub listen: ListenStats,
}

pub struct Agent<W: Write + Send + 'static> {
    config: AppConfig,
    participant: String,
    store: Arc<dyn SharedStore>,
    provider: Arc<dyn DiffProvider>,
    out: W,
}

impl Agent<io::Stdout> {
    /// Agent that diffs the configured repository and reports to stdout.
    pub fn from_config(config: AppConfig, store: Arc<dyn SharedStore>) -> Result<Self, CoreError> {
        Self::with_writer(config, store, io::stdout())
    }
}

impl<W: Write + Send + 'static> Agent<W> {
    pub fn with_writer(
        config: AppConfig,
        store: Arc<dyn SharedStore>,
        out: W,
    ) -> Result<Self, CoreError> {
        let participant = resolve_participant(&config)?;
        let provider: Arc<dyn DiffProvider> = Arc::new(GitDiffProvider::from_config(&config.repo));
        Ok(Self {
            config,
            participant,
            store,
            provider,
            out,
        })
    }

    /// Replace the git-backed diff provider.
    pub fn with_provider(mut self, provider: Arc<dyn DiffProvider>) -> Self {
        self.provider = provider;
        self
    }

    pub fn participant(&self) -> &str {
        &self.participant
    }

    fn source(&self) -> SnapshotSource {
        SnapshotSource::new(self.provider.clone(), SnapshotBuilder::new(&self.participant))
    }

    /// Run both loops until `shutdown` fires or the listener hits a fatal
    /// error.
    ///
    /// The subscription is opened before the first publish so our own first
    /// notification (and any peer's) is not missed.
    #[instrument(skip_all, fields(participant = %self.participant))]
    pub async fn run(self, shutdown: Shutdown) -> Result<AgentStats, CoreError> {
        // Built before the reporter takes ownership of the output.
        let publish_source = self.source();
        let listener = ChangeListener::new(
            self.store.clone(),
            self.source(),
            ConflictEvaluator::from_config(&self.config),
            ConflictReporter::new(self.out, self.config.report.format),
        );
        let subscription = listener.subscribe().await?;

        let trigger = match self.config.agent.trigger {
            TriggerMode::Poll => Trigger::Poll(self.config.agent.poll_interval()),
            TriggerMode::Watch => Trigger::Watch {
                watcher: FsWatcher::watch(&self.config.repo.path)?,
                retry: self.config.agent.poll_interval(),
            },
        };
        let publish_loop = PublishLoop::new(publish_source, Publisher::new(self.store.clone()));
        let publish_handle = tokio::spawn(publish_loop.run(trigger, shutdown.clone()));
        info!("agent started");

        let listen = match listener.run(subscription, shutdown).await {
            Ok(stats) => stats,
            Err(e) => {
                error!(error = %e, "listen loop failed, stopping publish loop");
                publish_handle.abort();
                return Err(e);
            }
        };

        let publish = publish_handle
            .await
            .map_err(|e| CoreError::TaskFailed(format!("publish loop: {}", e)))?;
        info!("agent stopped");
        Ok(AgentStats { publish, listen })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configured_participant_wins() {
        let mut config = AppConfig::default();
        config.agent.participant = Some("  alice  ".into());
        config.repo.path = "/nonexistent/repo".into();
        assert_eq!(resolve_participant(&config).unwrap(), "alice");
    }

    #[test]
    fn test_blank_participant_falls_back_to_git() {
        let dir = tempfile::tempdir().unwrap();
        let repo = git2::Repository::init(dir.path()).unwrap();
        repo.config().unwrap().set_str("user.email", "carol@example.com").unwrap();

        let mut config = AppConfig::default();
        config.agent.participant = Some(String::new());
        config.repo.path = dir.path().to_path_buf();
        assert_eq!(resolve_participant(&config).unwrap(), "carol@example.com");
    }
}
