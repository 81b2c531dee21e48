//! fleetreport - distributed report generation over a tenant fleet
//!
//! A report job walks every unit (tenant) of the system, analyzes each one on
//! some cluster member, and folds the per-unit results into one aggregate
//! report. Any number of nodes may start, join and merge into jobs at once;
//! cluster-wide named locks and maps keep them consistent.
//!
//! # Architecture
//!
//! - **Coordinator**: start-or-join, merge, finalize and abort of jobs
//! - **Planner**: groups co-located units into shards
//! - **Worker**: loads, analyzes and merges the units of one shard
//! - **Registry**: pending and completed reports, keyed by job type
//! - **Cluster**: named locks, named maps, membership and task submission
//! - **Plugins**: analyzers, cumulators, system handlers, finishing touches

pub mod cluster;
pub mod config;
pub mod coordinator;
pub mod dispatch;
pub mod error;
pub mod model;
pub mod node;
pub mod planner;
pub mod plugins;
pub mod registry;
pub mod source;
pub mod synthetic;
pub mod worker;

// Re-export commonly used types
pub use config::Config;
pub use coordinator::{JobCoordinator, MergeOutcome};
pub use error::{Error, Result};
pub use model::{JobId, Report, UnitId, UnitReport};
pub use node::ReportNode;
pub use worker::BatchWorker;
