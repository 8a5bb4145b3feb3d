//! Reconciliation Poller
//!
//! Repairs state the live monitors missed. Every tick:
//! - frameworks still `uploaded`/`processing` with no status write for `stale_after` are
//!   checked against the AI status endpoint; a terminal answer goes through the same
//!   idempotent transition the live stream uses
//! - comparisons still active past `stale_after` whose monitor is gone are marked `error`
//!
//! Safe to run alongside the live monitors: both paths converge on guarded writes.

use chrono::Utc;
use sqlx::SqlitePool;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::db::{comparisons, frameworks};
use crate::services::{ComparisonService, ProcessingService};

/// Counts from one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    /// Stale frameworks checked against the AI service
    pub checked: usize,
    /// Frameworks moved to a terminal state by this sweep
    pub repaired: usize,
    /// Comparisons failed because their monitor was lost
    pub comparisons_failed: usize,
}

pub struct ReconciliationPoller {
    db: SqlitePool,
    processing: ProcessingService,
    comparisons: ComparisonService,
    interval: Duration,
    stale_after: chrono::Duration,
}

impl ReconciliationPoller {
    pub fn new(
        db: SqlitePool,
        processing: ProcessingService,
        comparisons: ComparisonService,
        interval: Duration,
        stale_after: Duration,
    ) -> Self {
        let stale_after = chrono::Duration::from_std(stale_after)
            .unwrap_or_else(|_| chrono::Duration::seconds(i64::from(u32::MAX)));
        Self {
            db,
            processing,
            comparisons,
            interval,
            stale_after,
        }
    }

    /// Run on a fixed interval until `cancel` fires
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            info!(
                interval_secs = self.interval.as_secs(),
                stale_after_secs = self.stale_after.num_seconds(),
                "Reconciliation poller started"
            );

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        self.tick().await;
                    }
                }
            }

            info!("Reconciliation poller stopped");
        })
    }

    /// One sweep
    pub async fn tick(&self) -> TickSummary {
        let cutoff = Utc::now() - self.stale_after;
        let mut summary = TickSummary::default();

        match frameworks::find_stale(&self.db, cutoff).await {
            Ok(stale) => {
                for (framework_id, job_id) in stale {
                    summary.checked += 1;
                    match self.processing.reconcile(framework_id, &job_id).await {
                        Ok(check) if check.transition.is_terminal() => {
                            info!(
                                framework_id = %framework_id,
                                job_id = %job_id,
                                status = %check.job.status,
                                "Reconciled missed completion"
                            );
                            summary.repaired += 1;
                        }
                        Ok(check) => debug!(
                            framework_id = %framework_id,
                            job_id = %job_id,
                            ai_status = %check.ai_status,
                            "Job still running"
                        ),
                        Err(e) => warn!(
                            framework_id = %framework_id,
                            job_id = %job_id,
                            error = %e,
                            "Status check failed"
                        ),
                    }
                }
            }
            Err(e) => warn!(error = %e, "Failed to query stale frameworks"),
        }

        match comparisons::find_stale_active(&self.db, cutoff).await {
            Ok(stale) => {
                for comparison_id in stale {
                    match self.comparisons.fail_if_unmonitored(comparison_id).await {
                        Ok(true) => summary.comparisons_failed += 1,
                        Ok(false) => {}
                        Err(e) => warn!(
                            comparison_id = %comparison_id,
                            error = %e,
                            "Failed to reconcile comparison"
                        ),
                    }
                }
            }
            Err(e) => warn!(error = %e, "Failed to query stale comparisons"),
        }

        if summary != TickSummary::default() {
            info!(
                checked = summary.checked,
                repaired = summary.repaired,
                comparisons_failed = summary.comparisons_failed,
                "Reconciliation sweep finished"
            );
        }
        summary
    }
}
