//! Publishing the local edit-set to the shared store.

use std::sync::Arc;

use tracing::{debug, info, instrument};

use crate::errors::TransportError;
use crate::snapshot::{has_changed, EditSet};
use crate::store::SharedStore;

/// Result of a gated publish attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// The snapshot differed and was written and broadcast.
    Published,
    /// Identical to the last published snapshot; nothing sent.
    Unchanged,
}

/// Writes snapshots under the participant's key and wakes every listener.
///
/// Remembers the last snapshot that went out successfully; only the publish
/// loop owns a `Publisher`, so no locking is involved.
pub struct Publisher {
    store: Arc<dyn SharedStore>,
    last_published: Option<EditSet>,
}

impl Publisher {
    pub fn new(store: Arc<dyn SharedStore>) -> Self {
        Self {
            store,
            last_published: None,
        }
    }

    pub fn last_published(&self) -> Option<&EditSet> {
        self.last_published.as_ref()
    }

    /// Publish `snapshot` unless it equals the last published one.
    ///
    /// On failure the last-published reference is left untouched so the
    /// next cycle retries the same snapshot.
    pub async fn publish_if_changed(
        &mut self,
        snapshot: EditSet,
    ) -> Result<PublishOutcome, TransportError> {
        if !has_changed(self.last_published.as_ref(), &snapshot) {
            debug!(participant = %snapshot.participant, "snapshot unchanged, skipping publish");
            return Ok(PublishOutcome::Unchanged);
        }
        publish(self.store.as_ref(), &snapshot).await?;
        self.last_published = Some(snapshot);
        Ok(PublishOutcome::Published)
    }
}

/// Write `snapshot` under its participant key (last write wins) and
/// broadcast a payload-free change notification.
#[instrument(skip_all, fields(participant = %snapshot.participant))]
pub async fn publish(store: &dyn SharedStore, snapshot: &EditSet) -> Result<(), TransportError> {
    let body = snapshot.to_json()?;
    store.put(&snapshot.participant, &body).await?;
    store.notify_change().await?;
    info!(
        files = snapshot.entries.len(),
        lines = snapshot.line_count(),
        branch = snapshot.branch.as_deref().unwrap_or("<detached>"),
        "published edit-set"
    );
    Ok(())
}
