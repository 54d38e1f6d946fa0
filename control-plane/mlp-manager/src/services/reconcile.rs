//! Periodic background jobs.
//!
//! Each job sweeps the store through the same services the API uses. A
//! resource that is busy with a request is skipped until the next tick, and
//! a failure on one resource never aborts the sweep.

use chrono::{DateTime, Utc};
use mlp_models::{DeploymentStatus, NotebookStatus};
use mlp_storage::{DeploymentFilter, NotebookFilter};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::SchedulerConfig;
use crate::errors::LifecycleError;
use crate::services::deployment::DeploymentService;
use crate::services::notebook::NotebookService;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Job {
    IdleReclaim,
    CostRefresh,
    StaleRepair,
    Drift,
}

impl Job {
    pub const ALL: [Job; 4] =
        [Job::IdleReclaim, Job::CostRefresh, Job::StaleRepair, Job::Drift];

    fn index(self) -> usize {
        match self {
            Job::IdleReclaim => 0,
            Job::CostRefresh => 1,
            Job::StaleRepair => 2,
            Job::Drift => 3,
        }
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Job::IdleReclaim => "idle-reclaim",
            Job::CostRefresh => "cost-refresh",
            Job::StaleRepair => "stale-repair",
            Job::Drift => "drift",
        })
    }
}

/// Counts from one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub examined: usize,
    pub changed: usize,
    pub failed: usize,
}

impl SweepReport {
    fn record(&mut self, job: Job, id: &str, outcome: Result<bool, LifecycleError>) {
        self.examined += 1;
        match outcome {
            Ok(true) => self.changed += 1,
            Ok(false) => {}
            Err(e) => {
                self.failed += 1;
                warn!(%job, resource = %id, error = %e, "reconciliation failed");
            }
        }
    }
}

pub struct ReconciliationScheduler {
    notebooks: Arc<NotebookService>,
    deployments: Arc<DeploymentService>,
    clock: Arc<dyn Clock>,
    config: SchedulerConfig,
    in_flight: [AtomicBool; 4],
}

impl ReconciliationScheduler {
    pub fn new(
        notebooks: Arc<NotebookService>,
        deployments: Arc<DeploymentService>,
        clock: Arc<dyn Clock>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            notebooks,
            deployments,
            clock,
            config,
            in_flight: Default::default(),
        }
    }

    fn period(&self, job: Job) -> Duration {
        match job {
            Job::IdleReclaim => self.config.reclaim_interval,
            Job::CostRefresh => self.config.cost_refresh_interval,
            Job::StaleRepair | Job::Drift => self.config.reconcile_interval,
        }
    }

    /// Spawn one task per job. The tasks exit when `token` is cancelled.
    pub fn spawn(self: &Arc<Self>, token: CancellationToken) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();
        for job in Job::ALL {
            let period = self.period(job);
            if period.is_zero() {
                warn!(%job, "reconciliation job disabled: zero interval");
                continue;
            }
            let this = Arc::clone(self);
            let token = token.clone();
            handles.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                // first tick completes immediately
                ticker.tick().await;
                loop {
                    tokio::select! {
                        _ = ticker.tick() => this.tick(job).await,
                        _ = token.cancelled() => {
                            debug!(%job, "reconciliation job cancelled");
                            break;
                        }
                    }
                }
            }));
        }
        info!(jobs = handles.len(), "reconciliation scheduler started");
        handles
    }

    async fn tick(&self, job: Job) {
        let flag = &self.in_flight[job.index()];
        if flag.swap(true, Ordering::AcqRel) {
            debug!(%job, "previous run still in flight; skipping tick");
            return;
        }
        match self.run_once(job).await {
            Ok(report) => info!(
                %job,
                examined = report.examined,
                changed = report.changed,
                failed = report.failed,
                "sweep finished"
            ),
            Err(e) => warn!(%job, error = %e, "sweep aborted"),
        }
        flag.store(false, Ordering::Release);
    }

    /// Run a single sweep of `job`.
    pub async fn run_once(&self, job: Job) -> Result<SweepReport, LifecycleError> {
        match job {
            Job::IdleReclaim => self.reclaim_idle().await,
            Job::CostRefresh => self.refresh_costs().await,
            Job::StaleRepair => self.repair_stale().await,
            Job::Drift => self.detect_drift().await,
        }
    }

    async fn reclaim_idle(&self) -> Result<SweepReport, LifecycleError> {
        let cutoff = cutoff(self.clock.now(), self.config.idle_retention);
        let idle = self
            .notebooks
            .find(NotebookFilter {
                status: Some(NotebookStatus::Stopped),
                last_accessed_before: Some(cutoff),
                ..Default::default()
            })
            .await?;
        let mut report = SweepReport::default();
        for nb in idle {
            let outcome = self.notebooks.reclaim_if_idle(&nb.id, cutoff).await;
            report.record(Job::IdleReclaim, &nb.id, outcome);
        }
        Ok(report)
    }

    async fn refresh_costs(&self) -> Result<SweepReport, LifecycleError> {
        let running = self
            .notebooks
            .find(NotebookFilter::with_status(NotebookStatus::Running))
            .await?;
        let mut report = SweepReport::default();
        for nb in running {
            let outcome = self.notebooks.refresh_cost(&nb.id).await;
            report.record(Job::CostRefresh, &nb.id, outcome);
        }
        Ok(report)
    }

    async fn repair_stale(&self) -> Result<SweepReport, LifecycleError> {
        let cutoff = cutoff(self.clock.now(), self.config.stale_grace_period);
        let mut report = SweepReport::default();
        for status in [NotebookStatus::Creating, NotebookStatus::Stopping] {
            let stale = self
                .notebooks
                .find(NotebookFilter {
                    status: Some(status),
                    status_changed_before: Some(cutoff),
                    ..Default::default()
                })
                .await?;
            for nb in stale {
                let outcome = self
                    .notebooks
                    .repair_stale(&nb.id, cutoff)
                    .await
                    .map(|next| next.is_some());
                report.record(Job::StaleRepair, &nb.id, outcome);
            }
        }
        let stuck = self
            .deployments
            .find(DeploymentFilter {
                status: Some(DeploymentStatus::Deploying),
                status_changed_before: Some(cutoff),
                ..Default::default()
            })
            .await?;
        for d in stuck {
            let outcome = self.deployments.repair_stale(&d.id, cutoff).await;
            report.record(Job::StaleRepair, &d.id, outcome);
        }
        Ok(report)
    }

    async fn detect_drift(&self) -> Result<SweepReport, LifecycleError> {
        let running = self
            .deployments
            .find(DeploymentFilter {
                status: Some(DeploymentStatus::Running),
                ..Default::default()
            })
            .await?;
        let mut report = SweepReport::default();
        for d in running {
            let outcome = self.deployments.detect_drift(&d.id).await;
            report.record(Job::Drift, &d.id, outcome);
        }
        Ok(report)
    }
}

/// Wait for spawned job tasks to finish. Returns how many ended abnormally.
pub async fn join_jobs(handles: Vec<JoinHandle<()>>) -> usize {
    let mut failed = 0;
    for handle in handles {
        if let Err(e) = handle.await {
            warn!(error = %e, panicked = e.is_panic(), "reconciliation job ended abnormally");
            failed += 1;
        }
    }
    failed
}

fn cutoff(now: DateTime<Utc>, age: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(age)
        .ok()
        .and_then(|age| now.checked_sub_signed(age))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cutoff_saturates() {
        let now = Utc::now();
        assert_eq!(cutoff(now, Duration::from_secs(60)), now - chrono::Duration::seconds(60));
        assert_eq!(cutoff(now, Duration::MAX), DateTime::<Utc>::MIN_UTC);
    }

    #[tokio::test]
    async fn join_counts_panicked_jobs() {
        let ok = tokio::spawn(async {});
        let crashed = tokio::spawn(async { panic!("sweep crashed") });
        assert_eq!(join_jobs(vec![ok, crashed]).await, 1);
        assert_eq!(join_jobs(Vec::new()).await, 0);
    }
}
