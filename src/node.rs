//! Report node
//!
//! One cluster member: a coordinator plus the batch worker that runs shards
//! submitted to this member. Every node of a cluster shares the same
//! primitives, so any node may start, join, merge into or abort any job.

use crate::cluster::local::LocalCluster;
use crate::cluster::{MemberId, TaskHandler};
use crate::config::CoordinatorConfig;
use crate::coordinator::JobCoordinator;
use crate::dispatch::Scheduler;
use crate::error::Result;
use crate::plugins::PluginSet;
use crate::source::{Colocation, UnitSource};
use crate::worker::BatchWorker;
use std::sync::{Arc, Weak};

/// A coordinator and worker registered as one member of a [`LocalCluster`].
///
/// The cluster holds only a weak reference to the worker; dropping the node
/// takes the member out of dispatch.
pub struct ReportNode {
    member: MemberId,
    coordinator: Arc<JobCoordinator>,
    worker: Arc<BatchWorker>,
}

impl ReportNode {
    /// Build a node and register it with `cluster`.
    pub fn join(
        cluster: &Arc<LocalCluster>,
        source: Arc<dyn UnitSource>,
        colocation: Arc<dyn Colocation>,
        plugins: PluginSet,
        scheduler: Box<dyn Scheduler>,
        config: &CoordinatorConfig,
    ) -> Result<Self> {
        let coordinator = Arc::new(
            JobCoordinator::new(cluster.clone(), source, colocation, plugins, config)
                .with_scheduler(scheduler),
        );
        let worker = Arc::new(BatchWorker::new(coordinator.clone()));

        let member = cluster.next_member_id();
        let handler: Arc<dyn TaskHandler> = worker.clone();
        let weak: Weak<dyn TaskHandler> = Arc::downgrade(&handler);
        cluster.add_member(member.clone(), weak)?;

        Ok(Self {
            member,
            coordinator,
            worker,
        })
    }

    pub fn member(&self) -> &MemberId {
        &self.member
    }

    pub fn coordinator(&self) -> &Arc<JobCoordinator> {
        &self.coordinator
    }

    pub fn worker(&self) -> &Arc<BatchWorker> {
        &self.worker
    }
}
