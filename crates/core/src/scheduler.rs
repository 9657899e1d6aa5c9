//! Publish loop: rebuild the local snapshot and publish it when it changed.
//!
//! Runs on a fixed interval or on filesystem events. Cycles never overlap;
//! a slow diff simply delays the next one.

use std::time::Duration;

use tokio::time::{self, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::errors::CoreError;
use crate::publisher::{PublishOutcome, Publisher};
use crate::shutdown::Shutdown;
use crate::snapshot::SnapshotSource;
use crate::watcher::FsWatcher;

/// What wakes the publish loop.
pub enum Trigger {
    Poll(Duration),
    /// Filesystem events. After a failed cycle the loop also retries once
    /// `retry` has passed without a new event.
    Watch { watcher: FsWatcher, retry: Duration },
}

/// Aggregate statistics across publish cycles.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleStats {
    pub total_cycles: u64,
    pub published: u64,
    pub total_errors: u64,
    pub consecutive_errors: u64,
}

pub struct PublishLoop {
    source: SnapshotSource,
    publisher: Publisher,
    stats: CycleStats,
}

impl PublishLoop {
    pub fn new(source: SnapshotSource, publisher: Publisher) -> Self {
        Self {
            source,
            publisher,
            stats: CycleStats::default(),
        }
    }

    pub fn stats(&self) -> &CycleStats {
        &self.stats
    }

    /// Build the snapshot, compare, and publish if it changed.
    pub async fn run_cycle(&mut self) -> Result<PublishOutcome, CoreError> {
        let snapshot = self.source.capture().await?;
        let outcome = self.publisher.publish_if_changed(snapshot).await?;
        Ok(outcome)
    }

    /// Run one cycle and record the outcome. Errors end the cycle, not the loop.
    async fn tick(&mut self, trigger: &str) {
        self.stats.total_cycles += 1;
        match self.run_cycle().await {
            Ok(outcome) => {
                self.stats.consecutive_errors = 0;
                if outcome == PublishOutcome::Published {
                    self.stats.published += 1;
                }
            }
            Err(e) => {
                self.stats.total_errors += 1;
                self.stats.consecutive_errors += 1;
                error!(
                    cycle = self.stats.total_cycles,
                    trigger,
                    error = %e,
                    consecutive_errors = self.stats.consecutive_errors,
                    "publish cycle failed"
                );
            }
        }
    }

    /// Loop until `shutdown` fires. The first cycle runs immediately.
    pub async fn run(mut self, trigger: Trigger, mut shutdown: Shutdown) -> CycleStats {
        match trigger {
            Trigger::Poll(period) => {
                info!(interval_secs = period.as_secs_f64(), "publish loop started (poll)");
                let mut interval = time::interval(period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        biased;
                        _ = shutdown.wait() => break,
                        _ = interval.tick() => self.tick("interval").await,
                    }
                }
            }
            Trigger::Watch { mut watcher, retry } => {
                info!(retry_secs = retry.as_secs_f64(), "publish loop started (watch)");
                self.tick("startup").await;
                loop {
                    let retry_pending = self.stats.consecutive_errors > 0;
                    tokio::select! {
                        biased;
                        _ = shutdown.wait() => break,
                        changed = watcher.changed() => {
                            if !changed {
                                warn!("file watcher stopped delivering events, publish loop exiting");
                                break;
                            }
                            self.tick("filesystem").await;
                        }
                        _ = time::sleep(retry), if retry_pending => self.tick("retry").await,
                    }
                }
            }
        }

        info!(
            cycles = self.stats.total_cycles,
            published = self.stats.published,
            errors = self.stats.total_errors,
            "publish loop stopped"
        );
        self.stats
    }
}
