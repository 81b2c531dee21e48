//! Batch worker
//!
//! Runs on a cluster member and processes one shard: load each unit, run the
//! analyzers for the job type, let cumulators prepare the unit report, then
//! merge it through the coordinator.
//!
//! # Failure handling
//!
//! | Failure                       | Effect                                     |
//! |-------------------------------|--------------------------------------------|
//! | unit load error (non-fatal)   | error-only unit report, merged as usual    |
//! | unit load error (fatal)       | job aborted, shard stops                   |
//! | analyzer error                | error-only unit report, merged as usual    |
//! | cumulator prepare error       | error-only unit report, merged as usual    |
//! | merge discarded (job gone)    | shard stops quietly                        |
//! | merge lock timeout            | shard stops with an error                  |
//!
//! A unit always counts toward completion unless the job itself is gone.

use crate::cluster::TaskHandler;
use crate::coordinator::{JobCoordinator, MergeOutcome};
use crate::error::Result;
use crate::model::{ErrorKind, JobId, ReportError, ShardTask, UnitId, UnitReport};
use async_trait::async_trait;
use std::sync::Arc;

/// Processes shards for one member.
pub struct BatchWorker {
    coordinator: Arc<JobCoordinator>,
}

impl BatchWorker {
    pub fn new(coordinator: Arc<JobCoordinator>) -> Self {
        Self { coordinator }
    }

    /// Load and analyze one unit.
    ///
    /// Returns None when the unit hit a fatal load error and the job was
    /// aborted.
    async fn build_unit_report(
        &self,
        job_id: &JobId,
        job_type: &str,
        unit: &UnitId,
    ) -> Result<Option<UnitReport>> {
        let data = match self.coordinator.source().load_unit(unit).await {
            Ok(data) => data,
            Err(e) if e.is_fatal() => {
                tracing::error!(%job_id, %unit, "Fatal unit load error, aborting job: {}", e);
                self.coordinator.abort(job_id, &e.to_string()).await?;
                return Ok(None);
            }
            Err(e) => {
                tracing::warn!(%job_id, %unit, "Unit load failed: {}", e);
                let error = ReportError::new(
                    ErrorKind::UnitLoad,
                    Some(unit.clone()),
                    "unit-source",
                    e.to_string(),
                );
                return Ok(Some(UnitReport::error_only(job_id.clone(), unit.clone(), error)));
            }
        };

        let plugins = self.coordinator.plugins();
        let mut report = UnitReport::new(job_id.clone(), unit.clone());

        for analyzer in plugins.analyzers_for(job_type) {
            if let Err(e) = analyzer.analyze(&data, &mut report) {
                tracing::warn!(%job_id, %unit, analyzer = analyzer.name(), "Analysis failed: {:#}", e);
                let error = ReportError::new(
                    ErrorKind::Analyzer,
                    Some(unit.clone()),
                    analyzer.name(),
                    format!("{:#}", e),
                );
                return Ok(Some(UnitReport::error_only(job_id.clone(), unit.clone(), error)));
            }
        }

        for cumulator in plugins.cumulators_for(job_type) {
            if let Err(e) = cumulator.prepare(&mut report) {
                tracing::warn!(%job_id, %unit, cumulator = cumulator.name(), "Prepare failed: {:#}", e);
                let error = ReportError::new(
                    ErrorKind::Cumulator,
                    Some(unit.clone()),
                    cumulator.name(),
                    format!("{:#}", e),
                );
                return Ok(Some(UnitReport::error_only(job_id.clone(), unit.clone(), error)));
            }
        }

        Ok(Some(report))
    }
}

#[async_trait]
impl TaskHandler for BatchWorker {
    async fn run_shard(&self, task: ShardTask) -> Result<usize> {
        let ShardTask {
            job_id,
            job_type,
            shard,
        } = task;
        tracing::debug!(%job_id, job_type = %job_type, units = shard.len(), "Running shard");

        let mut processed = 0;
        for unit in &shard.units {
            let Some(report) = self.build_unit_report(&job_id, &job_type, unit).await? else {
                return Ok(processed);
            };

            match self.coordinator.merge_unit(&job_id, &job_type, report).await? {
                MergeOutcome::Merged { .. } | MergeOutcome::Finalized => processed += 1,
                MergeOutcome::Discarded => {
                    tracing::debug!(%job_id, %unit, "Job cancelled, stopping shard");
                    return Ok(processed);
                }
            }
        }

        Ok(processed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::local::LocalCluster;
    use crate::cluster::{ClusterPrimitives, DistributedLock};
    use crate::config::CoordinatorConfig;
    use crate::model::Shard;
    use crate::plugins::{PluginSet, UnitCounter};
    use crate::synthetic::{tenant_id, RowCountAnalyzer, SyntheticConfig, SyntheticTenants};
    use std::sync::Weak;
    use std::time::Duration;

    struct Harness {
        cluster: Arc<LocalCluster>,
        coordinator: Arc<JobCoordinator>,
        worker: Arc<BatchWorker>,
    }

    /// Worker with no cluster members of its own; tests hand it shards
    /// directly.
    fn harness(config: SyntheticConfig) -> Harness {
        let cluster = LocalCluster::new();
        let tenants = Arc::new(SyntheticTenants::new(&config));
        let plugins = PluginSet::new()
            .with_analyzer(Arc::new(RowCountAnalyzer::new(&config.failing_units)))
            .with_cumulator(Arc::new(UnitCounter));
        let coordinator = Arc::new(JobCoordinator::new(
            cluster.clone(),
            tenants.clone(),
            tenants,
            plugins,
            &CoordinatorConfig::default(),
        ));
        let worker = Arc::new(BatchWorker::new(coordinator.clone()));
        Harness {
            cluster,
            coordinator,
            worker,
        }
    }

    /// Create a pending job without dispatching it.
    async fn pending_job(h: &Harness, job_type: &str) -> JobId {
        // A member that never runs anything keeps the job pending
        struct Idle;
        #[async_trait]
        impl TaskHandler for Idle {
            async fn run_shard(&self, _task: ShardTask) -> Result<usize> {
                Ok(0)
            }
        }
        let idle: Arc<dyn TaskHandler> = Arc::new(Idle);
        let weak: Weak<dyn TaskHandler> = Arc::downgrade(&idle);
        h.cluster.add_member(h.cluster.next_member_id(), weak).unwrap();

        let id = h.coordinator.start(job_type).await.unwrap();
        h.cluster.wait_idle().await;
        drop(idle);
        id
    }

    fn task(job_id: &JobId, job_type: &str, units: std::ops::Range<usize>) -> ShardTask {
        ShardTask {
            job_id: job_id.clone(),
            job_type: job_type.to_string(),
            shard: Shard::new(units.map(tenant_id).collect()),
        }
    }

    #[tokio::test]
    async fn test_one_failing_analysis_out_of_ten() {
        let h = harness(SyntheticConfig {
            units: 10,
            group_size: 10,
            failing_units: vec![3],
            ..Default::default()
        });
        let id = pending_job(&h, "daily").await;

        let processed = h.worker.run_shard(task(&id, "daily", 0..10)).await.unwrap();
        assert_eq!(processed, 10);

        let report = h.coordinator.get_completed("daily").await.unwrap().unwrap();
        assert_eq!(report.id, id);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].kind, ErrorKind::Analyzer);
        assert_eq!(report.errors[0].unit, Some(tenant_id(3)));
        // Failed unit counted toward completion, not toward the aggregate
        assert_eq!(report.result["units"], 9);
        let tenants = SyntheticTenants::new(&SyntheticConfig {
            units: 10,
            ..Default::default()
        });
        assert_eq!(report.result["rows"], tenants.expected_rows(&[3]));
    }

    #[tokio::test]
    async fn test_non_fatal_load_errors_are_recorded() {
        let h = harness(SyntheticConfig {
            units: 4,
            group_size: 4,
            missing_units: vec![0],
            unavailable_units: vec![2],
            ..Default::default()
        });
        let id = pending_job(&h, "daily").await;

        assert_eq!(h.worker.run_shard(task(&id, "daily", 0..4)).await.unwrap(), 4);

        let report = h.coordinator.get_completed("daily").await.unwrap().unwrap();
        assert_eq!(report.errors.len(), 2);
        assert!(report.errors.iter().all(|e| e.kind == ErrorKind::UnitLoad));
        assert_eq!(report.result["units"], 2);
    }

    #[tokio::test]
    async fn test_fatal_load_error_aborts_job() {
        let h = harness(SyntheticConfig {
            units: 4,
            group_size: 4,
            stale_schema_units: vec![1],
            ..Default::default()
        });
        let id = pending_job(&h, "daily").await;

        let processed = h.worker.run_shard(task(&id, "daily", 0..4)).await.unwrap();
        assert_eq!(processed, 1);

        assert!(h.coordinator.get_pending("daily").await.unwrap().is_none());
        assert!(h.coordinator.get_completed("daily").await.unwrap().is_none());
        assert!(h.coordinator.is_idle().await.unwrap());
    }

    #[tokio::test]
    async fn test_cancelled_job_stops_shard() {
        let h = harness(SyntheticConfig {
            units: 4,
            group_size: 4,
            ..Default::default()
        });
        let id = pending_job(&h, "daily").await;
        h.coordinator.abort(&id, "operator request").await.unwrap();

        let processed = h.worker.run_shard(task(&id, "daily", 0..4)).await.unwrap();
        assert_eq!(processed, 0);
        assert!(h.coordinator.get_completed("daily").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_merge_lock_timeout_fails_shard() {
        let cluster = LocalCluster::new();
        let tenants = Arc::new(SyntheticTenants::new(&SyntheticConfig {
            units: 2,
            group_size: 2,
            ..Default::default()
        }));
        let coordinator = Arc::new(
            JobCoordinator::new(
                cluster.clone(),
                tenants.clone(),
                tenants,
                PluginSet::new(),
                &CoordinatorConfig::default(),
            )
            .with_merge_lock_timeout(Duration::from_millis(20)),
        );
        let h = Harness {
            cluster,
            worker: Arc::new(BatchWorker::new(coordinator.clone())),
            coordinator,
        };
        let id = pending_job(&h, "daily").await;

        let lock = h.cluster.lock(&h.coordinator.merge_lock_name("daily"));
        let _held = lock.acquire().await.unwrap();

        let err = h.worker.run_shard(task(&id, "daily", 0..2)).await.unwrap_err();
        assert!(matches!(err, crate::error::Error::LockTimeout { .. }));
    }

    struct RejectingPrepare;

    impl crate::plugins::Cumulator for RejectingPrepare {
        fn name(&self) -> &str {
            "rejecting-prepare"
        }

        fn applies_to(&self, _job_type: &str) -> bool {
            true
        }

        fn prepare(&self, unit: &mut UnitReport) -> anyhow::Result<()> {
            if unit.unit == tenant_id(1) {
                anyhow::bail!("unit result missing totals");
            }
            Ok(())
        }

        fn cumulate(&self, _unit: &UnitReport, _report: &mut crate::model::Report) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_prepare_failure_recorded_as_cumulator_error() {
        let cluster = LocalCluster::new();
        let tenants = Arc::new(SyntheticTenants::new(&SyntheticConfig {
            units: 3,
            group_size: 3,
            ..Default::default()
        }));
        let plugins = PluginSet::new()
            .with_cumulator(Arc::new(UnitCounter))
            .with_cumulator(Arc::new(RejectingPrepare));
        let coordinator = Arc::new(JobCoordinator::new(
            cluster.clone(),
            tenants.clone(),
            tenants,
            plugins,
            &CoordinatorConfig::default(),
        ));
        let h = Harness {
            cluster,
            worker: Arc::new(BatchWorker::new(coordinator.clone())),
            coordinator,
        };
        let id = pending_job(&h, "daily").await;

        assert_eq!(h.worker.run_shard(task(&id, "daily", 0..3)).await.unwrap(), 3);

        let report = h.coordinator.get_completed("daily").await.unwrap().unwrap();
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].kind, ErrorKind::Cumulator);
        assert_eq!(report.errors[0].origin, "rejecting-prepare");
        assert_eq!(report.errors[0].unit, Some(tenant_id(1)));
        assert_eq!(report.result["units"], 2);
    }
}
