//! Report registry
//!
//! Two named cluster maps hold every report the orchestrator knows about:
//!
//! - **pending**: at most one in-flight report per job type, keyed by job type
//! - **completed**: the latest finalized report per job type, keyed by job type
//!
//! Reports are MessagePack-encoded on the way in and decoded on the way out,
//! so callers always work on private copies.

use crate::cluster::{ClusterPrimitives, DistributedMap};
use crate::error::Result;
use crate::model::{JobId, Report};
use std::sync::Arc;

/// Typed view over the pending and completed report maps.
#[derive(Clone)]
pub struct ReportRegistry {
    pending: Arc<dyn DistributedMap>,
    completed: Arc<dyn DistributedMap>,
}

impl ReportRegistry {
    /// Open the registry maps under `namespace`.
    pub fn open(cluster: &dyn ClusterPrimitives, namespace: &str) -> Self {
        Self {
            pending: cluster.map(&format!("{}:pending", namespace)),
            completed: cluster.map(&format!("{}:completed", namespace)),
        }
    }

    pub async fn get_pending(&self, job_type: &str) -> Result<Option<Report>> {
        decode_opt(self.pending.get(job_type).await?)
    }

    /// Pending report for `job_type`, only if it belongs to `job_id`.
    pub async fn get_pending_job(&self, job_type: &str, job_id: &JobId) -> Result<Option<Report>> {
        Ok(self
            .get_pending(job_type)
            .await?
            .filter(|report| &report.id == job_id))
    }

    pub async fn put_pending(&self, report: &Report) -> Result<()> {
        self.pending
            .put(&report.job_type, rmp_serde::to_vec_named(report)?)
            .await?;
        Ok(())
    }

    /// Remove the pending entry for `job_type` if it belongs to `job_id`.
    ///
    /// Returns the removed report.
    pub async fn remove_pending_job(&self, job_type: &str, job_id: &JobId) -> Result<Option<Report>> {
        if self.get_pending_job(job_type, job_id).await?.is_none() {
            return Ok(None);
        }
        decode_opt(self.pending.remove(job_type).await?)
    }

    pub async fn list_pending(&self) -> Result<Vec<Report>> {
        decode_all(self.pending.values().await?)
    }

    pub async fn has_pending(&self) -> Result<bool> {
        Ok(!self.pending.is_empty().await?)
    }

    pub async fn get_completed(&self, job_type: &str) -> Result<Option<Report>> {
        decode_opt(self.completed.get(job_type).await?)
    }

    /// Store a finalized report, replacing any earlier one of the same type.
    pub async fn put_completed(&self, report: &Report) -> Result<()> {
        self.completed
            .put(&report.job_type, rmp_serde::to_vec_named(report)?)
            .await?;
        Ok(())
    }

    pub async fn list_completed(&self) -> Result<Vec<Report>> {
        decode_all(self.completed.values().await?)
    }
}

fn decode_opt(bytes: Option<Vec<u8>>) -> Result<Option<Report>> {
    match bytes {
        Some(bytes) => Ok(Some(rmp_serde::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

fn decode_all(values: Vec<Vec<u8>>) -> Result<Vec<Report>> {
    values
        .iter()
        .map(|bytes| rmp_serde::from_slice(bytes).map_err(Into::into))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::local::LocalCluster;
    use crate::model::{ErrorKind, ReportError};

    #[tokio::test]
    async fn test_pending_round_trip_preserves_report() {
        let cluster = LocalCluster::new();
        let registry = ReportRegistry::open(&*cluster, "reports");

        let mut report = Report::new("daily", 5);
        report.errors.push(ReportError::new(
            ErrorKind::Analyzer,
            Some("t-1".into()),
            "usage",
            "boom",
        ));
        report.result = serde_json::json!({"units": 4, "rows": [1, 2, 3]});
        registry.put_pending(&report).await.unwrap();

        let loaded = registry.get_pending("daily").await.unwrap().unwrap();
        assert_eq!(loaded, report);
        assert!(registry.has_pending().await.unwrap());
    }

    #[tokio::test]
    async fn test_job_scoped_lookup_and_remove() {
        let cluster = LocalCluster::new();
        let registry = ReportRegistry::open(&*cluster, "reports");
        let report = Report::new("daily", 1);
        registry.put_pending(&report).await.unwrap();

        let stranger = JobId::new();
        assert!(registry
            .get_pending_job("daily", &stranger)
            .await
            .unwrap()
            .is_none());
        assert!(registry
            .remove_pending_job("daily", &stranger)
            .await
            .unwrap()
            .is_none());
        assert!(registry.get_pending("daily").await.unwrap().is_some());

        let removed = registry
            .remove_pending_job("daily", &report.id)
            .await
            .unwrap();
        assert_eq!(removed.map(|r| r.id), Some(report.id));
        assert!(!registry.has_pending().await.unwrap());
    }

    #[tokio::test]
    async fn test_completed_overwrites_by_type() {
        let cluster = LocalCluster::new();
        let registry = ReportRegistry::open(&*cluster, "reports");

        let first = Report::new("daily", 0);
        let second = Report::new("daily", 0);
        registry.put_completed(&first).await.unwrap();
        registry.put_completed(&second).await.unwrap();
        registry.put_completed(&Report::new("weekly", 0)).await.unwrap();

        let latest = registry.get_completed("daily").await.unwrap().unwrap();
        assert_eq!(latest.id, second.id);
        assert_eq!(registry.list_completed().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_namespaces_are_isolated() {
        let cluster = LocalCluster::new();
        let a = ReportRegistry::open(&*cluster, "a");
        let b = ReportRegistry::open(&*cluster, "b");

        a.put_pending(&Report::new("daily", 1)).await.unwrap();
        assert!(b.get_pending("daily").await.unwrap().is_none());
        assert!(b.list_pending().await.unwrap().is_empty());
    }
}
