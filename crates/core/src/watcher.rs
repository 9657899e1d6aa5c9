//! Filesystem change trigger for watch mode.
//!
//! Only used to wake the publish loop; the diff provider decides what
//! actually changed.

use std::path::{Component, Path};
use std::time::Duration;

use notify::event::ModifyKind;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Quiet period used to fold a burst of events (e.g. a checkout) into one.
const SETTLE: Duration = Duration::from_millis(250);

/// Recursive watcher over a repository working tree.
pub struct FsWatcher {
    // Dropping the watcher stops event delivery.
    _watcher: RecommendedWatcher,
    rx: mpsc::UnboundedReceiver<()>,
}

impl FsWatcher {
    pub fn watch(root: &Path) -> Result<Self, notify::Error> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) if is_relevant(&event) => {
                let _ = tx.send(());
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "filesystem watch error"),
        })?;
        watcher.watch(root, RecursiveMode::Recursive)?;
        info!(root = %root.display(), "watching for file changes");
        Ok(Self {
            _watcher: watcher,
            rx,
        })
    }

    /// Wait for the next relevant change. Returns `false` once the watcher
    /// has stopped delivering events.
    pub async fn changed(&mut self) -> bool {
        if self.rx.recv().await.is_none() {
            return false;
        }
        tokio::time::sleep(SETTLE).await;
        while self.rx.try_recv().is_ok() {}
        true
    }
}

/// Whether an event should trigger a rebuild.
///
/// Reads and permission/metadata-only changes never do, nor does churn
/// inside `.git` other than HEAD, the index and refs.
pub fn is_relevant(event: &Event) -> bool {
    match event.kind {
        EventKind::Access(_) | EventKind::Modify(ModifyKind::Metadata(_)) => false,
        _ => event.paths.is_empty() || event.paths.iter().any(|p| !is_git_noise(p)),
    }
}

fn is_git_noise(path: &Path) -> bool {
    let mut components = path.components();
    let inside_git = components
        .by_ref()
        .any(|c| matches!(c, Component::Normal(name) if name == ".git"));
    if !inside_git {
        return false;
    }
    let rest: Vec<_> = components.collect();
    !match rest.first() {
        Some(Component::Normal(name)) => *name == "HEAD" || *name == "index" || *name == "refs",
        _ => false,
    }
}
