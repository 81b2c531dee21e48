//! Job coordinator
//!
//! The coordinator owns the life of a report job: start-or-join, per-unit
//! merge, finalize and abort. Any number of coordinators may run across the
//! cluster at once; safety comes from two named locks per job type, never
//! from in-process state:
//!
//! - **Coordination lock** (`<ns>:start:<type>`): guards only the
//!   create-vs-join decision in [`JobCoordinator::start`]
//! - **Merge lock** (`<ns>:merge:<type>`): guards every mutation of the
//!   pending report of that type
//!
//! # Job flow
//!
//! ```text
//! start(type) --lock--> pending? --yes--> return existing id (join)
//!                          |
//!                          no: list units, put Report{pending=N}
//!                          |
//!                      unlock, plan shards, submit to members
//!
//! mergeUnit(id, type, unit) --merge lock--> load report by id
//!     absent        -> discard (job was cancelled)
//!     present       -> cumulate, pending -= 1, write back
//!     pending == 0  -> finalize (exactly once)
//! ```
//!
//! A job whose worker dies mid-shard never reaches zero pending units and is
//! not recovered automatically; it must be aborted explicitly.

use crate::cluster::{ClusterPrimitives, DistributedLock, LockToken};
use crate::config::CoordinatorConfig;
use crate::dispatch::{RoundRobinScheduler, Scheduler};
use crate::error::{Error, Result};
use crate::model::{ErrorKind, JobId, Report, ReportError, ReportState, ShardTask, UnitId, UnitReport};
use crate::planner::ShardPlanner;
use crate::plugins::PluginSet;
use crate::registry::ReportRegistry;
use crate::source::{Colocation, UnitSource};
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// What happened to a unit report handed to [`JobCoordinator::merge_unit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Folded into the report; `remaining` units are still pending.
    Merged { remaining: u64 },
    /// This merge brought the job to zero pending units and finalized it.
    Finalized,
    /// The job is no longer pending (aborted or already finished).
    Discarded,
}

enum StartDecision {
    Joined(JobId),
    Created(Report, Vec<UnitId>),
}

/// Cluster-wide job coordinator.
///
/// Construct one per process and share it behind an `Arc`.
pub struct JobCoordinator {
    cluster: Arc<dyn ClusterPrimitives>,
    registry: ReportRegistry,
    source: Arc<dyn UnitSource>,
    planner: ShardPlanner,
    scheduler: Box<dyn Scheduler>,
    plugins: PluginSet,
    namespace: String,
    merge_lock_timeout: Duration,
}

impl JobCoordinator {
    pub fn new(
        cluster: Arc<dyn ClusterPrimitives>,
        source: Arc<dyn UnitSource>,
        colocation: Arc<dyn Colocation>,
        plugins: PluginSet,
        config: &CoordinatorConfig,
    ) -> Self {
        let registry = ReportRegistry::open(&*cluster, &config.namespace);
        Self {
            cluster,
            registry,
            source,
            planner: ShardPlanner::new(colocation),
            scheduler: Box::new(RoundRobinScheduler::new()),
            plugins,
            namespace: config.namespace.clone(),
            merge_lock_timeout: config.merge_lock_timeout(),
        }
    }

    /// Replace the member selection strategy.
    pub fn with_scheduler(mut self, scheduler: Box<dyn Scheduler>) -> Self {
        self.scheduler = scheduler;
        self
    }

    /// Override the bounded merge-lock wait.
    pub fn with_merge_lock_timeout(mut self, timeout: Duration) -> Self {
        self.merge_lock_timeout = timeout;
        self
    }

    pub fn plugins(&self) -> &PluginSet {
        &self.plugins
    }

    pub fn source(&self) -> &Arc<dyn UnitSource> {
        &self.source
    }

    pub(crate) fn coordination_lock_name(&self, job_type: &str) -> String {
        format!("{}:start:{}", self.namespace, job_type)
    }

    pub(crate) fn merge_lock_name(&self, job_type: &str) -> String {
        format!("{}:merge:{}", self.namespace, job_type)
    }

    /// Start a job of `job_type`, or join the one already pending.
    ///
    /// Returns as soon as the shards are submitted; the job runs
    /// asynchronously on the cluster members.
    pub async fn start(&self, job_type: &str) -> Result<JobId> {
        if job_type.trim().is_empty() {
            return Err(Error::InvalidJobType {
                job_type: job_type.to_string(),
            });
        }

        let lock = self.cluster.lock(&self.coordination_lock_name(job_type));
        let token = lock.acquire().await?;
        let decision = self.create_or_join(job_type).await;
        let released = lock.release(token).await;
        let decision = decision?;
        released?;

        let (report, units) = match decision {
            StartDecision::Joined(id) => {
                tracing::info!(job_id = %id, job_type, "Joined pending job");
                return Ok(id);
            }
            StartDecision::Created(report, units) => (report, units),
        };

        tracing::info!(
            job_id = %report.id,
            job_type,
            units = report.total_units,
            "Started job"
        );

        let id = report.id.clone();
        if report.total_units == 0 {
            self.finalize_empty(&id, job_type).await?;
            return Ok(id);
        }

        self.dispatch(&id, job_type, &units).await?;
        Ok(id)
    }

    async fn create_or_join(&self, job_type: &str) -> Result<StartDecision> {
        if let Some(existing) = self.registry.get_pending(job_type).await? {
            return Ok(StartDecision::Joined(existing.id));
        }

        // Each distinct unit is merged exactly once, so count distinct ids
        let mut seen = HashSet::new();
        let units: Vec<UnitId> = self
            .source
            .list_all_unit_ids()
            .await?
            .into_iter()
            .filter(|unit| seen.insert(unit.clone()))
            .collect();
        let report = Report::new(job_type, units.len() as u64);
        self.registry.put_pending(&report).await?;

        Ok(StartDecision::Created(report, units))
    }

    /// Finalize a job that has no units, under its merge lock.
    async fn finalize_empty(&self, job_id: &JobId, job_type: &str) -> Result<()> {
        let (lock, token) = self.acquire_merge_lock(job_type).await?;
        let report = match self.registry.get_pending_job(job_type, job_id).await {
            Ok(Some(report)) => report,
            // Aborted before we got the lock
            Ok(None) => return lock.release(token).await,
            Err(e) => {
                lock.release(token).await?;
                return Err(e);
            }
        };
        self.finalize(report).await
    }

    /// Plan shards and hand each one to a member.
    ///
    /// A job that cannot be fully dispatched is aborted, since its pending
    /// count could never reach zero.
    async fn dispatch(&self, job_id: &JobId, job_type: &str, units: &[UnitId]) -> Result<()> {
        let shards = self.planner.plan(units);
        let shard_count = shards.len();

        for shard in shards {
            let members = self.cluster.members();
            let Some(member) = self.scheduler.select(&members) else {
                self.abort(job_id, "no cluster members available for dispatch")
                    .await?;
                return Err(Error::NoMembers);
            };

            let task = ShardTask {
                job_id: job_id.clone(),
                job_type: job_type.to_string(),
                shard,
            };
            if let Err(e) = self.cluster.submit(&member, task) {
                self.abort(job_id, &format!("failed to submit shard to {}: {}", member, e))
                    .await?;
                return Err(e);
            }
        }

        tracing::info!(%job_id, job_type, shards = shard_count, "Dispatched shards");
        Ok(())
    }

    /// Acquire the merge lock for `job_type` within the configured bound.
    ///
    /// A destroyed lock means the previous holder finished or aborted a job;
    /// the wait continues on the fresh lock under the same name.
    async fn acquire_merge_lock(
        &self,
        job_type: &str,
    ) -> Result<(Arc<dyn DistributedLock>, LockToken)> {
        let name = self.merge_lock_name(job_type);
        let deadline = Instant::now() + self.merge_lock_timeout;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let lock = self.cluster.lock(&name);
            match lock.try_acquire(remaining).await {
                Ok(Some(token)) => return Ok((lock, token)),
                Ok(None) => {
                    return Err(Error::LockTimeout {
                        lock: name,
                        waited: self.merge_lock_timeout,
                    })
                }
                Err(Error::LockDestroyed { .. }) if !remaining.is_zero() => continue,
                Err(Error::LockDestroyed { .. }) => {
                    return Err(Error::LockTimeout {
                        lock: name,
                        waited: self.merge_lock_timeout,
                    })
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Fold one unit report into its job.
    ///
    /// Merges for one job type are strictly serialized. The merge that takes
    /// the pending count to zero finalizes the job before returning. A lock
    /// timeout abandons the job: it is logged and left for the operator.
    pub async fn merge_unit(
        &self,
        job_id: &JobId,
        job_type: &str,
        unit: UnitReport,
    ) -> Result<MergeOutcome> {
        let (lock, token) = match self.acquire_merge_lock(job_type).await {
            Ok(held) => held,
            Err(e @ Error::LockTimeout { .. }) => {
                tracing::error!(
                    %job_id,
                    job_type,
                    unit = %unit.unit,
                    "Merge lock timed out, abandoning job: {}",
                    e
                );
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        let outcome = self.merge_locked(job_id, job_type, unit).await;

        // Finalize destroyed the lock along with our hold on it
        if !matches!(outcome, Ok(MergeOutcome::Finalized)) {
            lock.release(token).await?;
        }
        outcome
    }

    async fn merge_locked(
        &self,
        job_id: &JobId,
        job_type: &str,
        unit: UnitReport,
    ) -> Result<MergeOutcome> {
        let Some(mut report) = self.registry.get_pending_job(job_type, job_id).await? else {
            tracing::debug!(%job_id, job_type, unit = %unit.unit, "Job gone, discarding unit");
            return Ok(MergeOutcome::Discarded);
        };

        if !unit.is_error_only() {
            for cumulator in self.plugins.cumulators_for(job_type) {
                if let Err(e) = cumulator.cumulate(&unit, &mut report) {
                    tracing::warn!(%job_id, unit = %unit.unit, cumulator = cumulator.name(), "Cumulator failed: {:#}", e);
                    report.errors.push(ReportError::new(
                        ErrorKind::Cumulator,
                        Some(unit.unit.clone()),
                        cumulator.name(),
                        format!("{:#}", e),
                    ));
                }
            }
        }
        report.errors.extend(unit.errors);

        let remaining = report.complete_unit();
        tracing::debug!(%job_id, job_type, unit = %unit.unit, remaining, "Merged unit");

        if remaining == 0 {
            self.finalize(report).await?;
            return Ok(MergeOutcome::Finalized);
        }

        self.registry.put_pending(&report).await?;
        Ok(MergeOutcome::Merged { remaining })
    }

    /// Finish a report: run system handlers and finishing touches, publish it
    /// to the completed registry, drop the pending entry and destroy the
    /// merge lock.
    ///
    /// The caller must hold the merge lock for the report's job type. The
    /// lock is consumed: it is destroyed, not released.
    pub async fn finalize(&self, mut report: Report) -> Result<()> {
        let job_type = report.job_type.clone();

        for handler in self.plugins.system_handlers_for(&job_type) {
            if let Err(e) = handler.handle(&mut report) {
                tracing::warn!(job_id = %report.id, handler = handler.name(), "System handler failed: {:#}", e);
                report.errors.push(ReportError::new(
                    ErrorKind::Handler,
                    None,
                    handler.name(),
                    format!("{:#}", e),
                ));
            }
        }
        for touch in self.plugins.finishing_touches_for(&job_type) {
            if let Err(e) = touch.apply(&mut report) {
                tracing::warn!(job_id = %report.id, handler = touch.name(), "Finishing touch failed: {:#}", e);
                report.errors.push(ReportError::new(
                    ErrorKind::Handler,
                    None,
                    touch.name(),
                    format!("{:#}", e),
                ));
            }
        }

        report.stopped_at = Some(Utc::now());
        report.state = ReportState::Done;

        self.registry.put_completed(&report).await?;
        self.registry
            .remove_pending_job(&job_type, &report.id)
            .await?;
        self.cluster
            .lock(&self.merge_lock_name(&job_type))
            .destroy()
            .await?;

        tracing::info!(
            job_id = %report.id,
            job_type = %job_type,
            units = report.total_units,
            errors = report.errors.len(),
            "Finalized job"
        );
        Ok(())
    }

    /// Cancel a pending job.
    ///
    /// Later merges for this id become no-ops. Returns false when no pending
    /// job has this id.
    pub async fn abort(&self, job_id: &JobId, reason: &str) -> Result<bool> {
        let Some(job_type) = self
            .registry
            .list_pending()
            .await?
            .into_iter()
            .find(|report| &report.id == job_id)
            .map(|report| report.job_type)
        else {
            return Ok(false);
        };

        let (lock, token) = self.acquire_merge_lock(&job_type).await?;
        let removed = match self.registry.remove_pending_job(&job_type, job_id).await {
            Ok(removed) => removed,
            Err(e) => {
                lock.release(token).await?;
                return Err(e);
            }
        };
        lock.destroy().await?;

        match removed {
            Some(report) => {
                tracing::warn!(
                    %job_id,
                    job_type = %job_type,
                    merged = report.merged_units(),
                    total = report.total_units,
                    "Aborted job: {}",
                    reason
                );
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub async fn get_pending(&self, job_type: &str) -> Result<Option<Report>> {
        self.registry.get_pending(job_type).await
    }

    pub async fn get_completed(&self, job_type: &str) -> Result<Option<Report>> {
        self.registry.get_completed(job_type).await
    }

    pub async fn list_pending(&self) -> Result<Vec<Report>> {
        self.registry.list_pending().await
    }

    pub async fn list_completed(&self) -> Result<Vec<Report>> {
        self.registry.list_completed().await
    }

    /// True when no job of any type is pending.
    pub async fn is_idle(&self) -> Result<bool> {
        Ok(!self.registry.has_pending().await?)
    }

    /// Poll until job `job_id` completes.
    ///
    /// Returns None if the job left the pending registry without completing
    /// (aborted) or `timeout` elapsed.
    pub async fn wait_for_completion(
        &self,
        job_type: &str,
        job_id: &JobId,
        poll: Duration,
        timeout: Duration,
    ) -> Result<Option<Report>> {
        let deadline = Instant::now() + timeout;
        loop {
            // Pending first: finalize publishes before it unpublishes
            let pending = self.registry.get_pending_job(job_type, job_id).await?;
            if pending.is_none() {
                return Ok(self
                    .registry
                    .get_completed(job_type)
                    .await?
                    .filter(|report| &report.id == job_id));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(poll).await;
        }
    }
}
