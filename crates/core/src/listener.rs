//! Listen loop: react to peer notifications by re-evaluating conflicts.
//!
//! Events are handled one at a time in arrival order. A broken subscription
//! is recovered once per failure after a liveness probe; a failed probe is
//! fatal.

use std::io::Write;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::conflict::{ConflictEvaluator, ConflictReporter};
use crate::errors::{CoreError, TransportError};
use crate::shutdown::Shutdown;
use crate::snapshot::SnapshotSource;
use crate::store::{ChangeSubscription, SharedStore, StoreEvent};

/// Counters kept by the listen loop.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListenStats {
    pub events: u64,
    pub evaluations: u64,
    pub reports: u64,
    pub skipped: u64,
    pub resubscribes: u64,
}

pub struct ChangeListener<W: Write + Send> {
    store: Arc<dyn SharedStore>,
    source: SnapshotSource,
    evaluator: ConflictEvaluator,
    reporter: ConflictReporter<W>,
    stats: ListenStats,
}

impl<W: Write + Send> ChangeListener<W> {
    pub fn new(
        store: Arc<dyn SharedStore>,
        source: SnapshotSource,
        evaluator: ConflictEvaluator,
        reporter: ConflictReporter<W>,
    ) -> Self {
        Self {
            store,
            source,
            evaluator,
            reporter,
            stats: ListenStats::default(),
        }
    }

    pub fn stats(&self) -> &ListenStats {
        &self.stats
    }

    /// Open a subscription on the change channel.
    pub async fn subscribe(&self) -> Result<Box<dyn ChangeSubscription>, TransportError> {
        self.store.subscribe().await
    }

    /// Receive events until `shutdown` fires or a fatal error occurs.
    ///
    /// Takes an already-open subscription so callers can subscribe before
    /// their first publish and not miss it.
    pub async fn run(
        mut self,
        mut subscription: Box<dyn ChangeSubscription>,
        mut shutdown: Shutdown,
    ) -> Result<ListenStats, CoreError> {
        info!(participant = self.source.participant(), "listen loop started");
        loop {
            let event = tokio::select! {
                biased;
                _ = shutdown.wait() => break,
                event = subscription.next_event() => event,
            };

            match event {
                Ok(StoreEvent::Subscribed { channel }) => {
                    debug!(channel = %channel, "subscription confirmed");
                }
                Ok(StoreEvent::Changed) => {
                    self.stats.events += 1;
                    self.evaluate_and_report().await?;
                }
                Err(e) => {
                    warn!(error = %e, "subscription read failed, probing store");
                    self.probe().await?;
                    subscription = self.subscribe().await.map_err(|e| {
                        error!(error = %e, "re-subscribe after successful probe failed");
                        TransportError::ProbeFailed(Box::new(e))
                    })?;
                    self.stats.resubscribes += 1;
                    info!("re-subscribed, running catch-up evaluation");
                    self.evaluate_and_report().await?;
                }
            }
        }

        info!(
            events = self.stats.events,
            reports = self.stats.reports,
            resubscribes = self.stats.resubscribes,
            "listen loop stopped"
        );
        Ok(self.stats)
    }

    /// Rebuild the local snapshot, intersect it with every peer, and report.
    ///
    /// Only a failed probe or a failed write to the report sink is an error.
    pub async fn evaluate_and_report(&mut self) -> Result<(), CoreError> {
        let local = match self.source.capture().await {
            Ok(local) => local,
            Err(e) => {
                warn!(error = %e, "local diff failed, skipping evaluation");
                self.stats.skipped += 1;
                return Ok(());
            }
        };

        let shared = match self.store.get_all().await {
            Ok(shared) => shared,
            Err(e) => {
                warn!(error = %e, "reading shared state failed, probing store");
                self.probe().await?;
                self.stats.skipped += 1;
                return Ok(());
            }
        };

        let records = self.evaluator.evaluate(&local, &shared);
        self.stats.evaluations += 1;
        debug!(peers = shared.len(), conflicts = records.len(), "evaluation finished");

        if self.reporter.report(&records)? {
            self.stats.reports += 1;
        }
        Ok(())
    }

    async fn probe(&self) -> Result<(), TransportError> {
        match self.store.ping().await {
            Ok(()) => {
                debug!("store answered liveness probe");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "store failed liveness probe");
                Err(TransportError::ProbeFailed(Box::new(e)))
            }
        }
    }
}
