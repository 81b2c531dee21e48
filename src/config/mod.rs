//! Configuration module
//!
//! Handles CLI argument parsing, TOML configuration files, and validation.

pub mod cli;
pub mod toml;
pub mod validator;

use crate::dispatch::SchedulerKind;
use crate::synthetic::SyntheticConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Complete run configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Job type to start
    #[serde(default = "default_job_type")]
    pub job_type: String,
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
    #[serde(default)]
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub synthetic: SyntheticConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_job_type() -> String {
    "default".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            job_type: default_job_type(),
            coordinator: CoordinatorConfig::default(),
            cluster: ClusterConfig::default(),
            synthetic: SyntheticConfig::default(),
            output: OutputConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Coordinator settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CoordinatorConfig {
    /// Bounded wait for a merge lock before the job is abandoned
    #[serde(default = "default_merge_lock_timeout_secs")]
    pub merge_lock_timeout_secs: u64,
    /// Prefix for every lock and map name
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

fn default_merge_lock_timeout_secs() -> u64 {
    30 * 60
}

fn default_namespace() -> String {
    "reports".to_string()
}

impl CoordinatorConfig {
    pub fn merge_lock_timeout(&self) -> Duration {
        Duration::from_secs(self.merge_lock_timeout_secs)
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            merge_lock_timeout_secs: default_merge_lock_timeout_secs(),
            namespace: default_namespace(),
        }
    }
}

/// Local cluster settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClusterConfig {
    /// Number of simulated members
    #[serde(default = "default_members")]
    pub members: usize,
    /// Member selection strategy
    #[serde(default)]
    pub scheduler: SchedulerKind,
    /// Seed for the random scheduler
    #[serde(default)]
    pub seed: u64,
}

fn default_members() -> usize {
    num_cpus::get()
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            members: default_members(),
            scheduler: SchedulerKind::default(),
            seed: 0,
        }
    }
}

/// Output settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutputConfig {
    /// Write the completed report here as JSON
    pub json_output: Option<PathBuf>,
    /// Give up waiting for the job after this long
    #[serde(default = "default_wait_timeout_secs")]
    pub wait_timeout_secs: u64,
}

fn default_wait_timeout_secs() -> u64 {
    600
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            json_output: None,
            wait_timeout_secs: default_wait_timeout_secs(),
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct LoggingConfig {
    #[serde(default)]
    pub debug: bool,
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Job type: {}", self.job_type)?;
        writeln!(f, "Coordinator:")?;
        writeln!(f, "  Namespace: {}", self.coordinator.namespace)?;
        writeln!(
            f,
            "  Merge lock timeout: {}s",
            self.coordinator.merge_lock_timeout_secs
        )?;
        writeln!(f, "Cluster:")?;
        writeln!(f, "  Members: {}", self.cluster.members)?;
        writeln!(f, "  Scheduler: {:?}", self.cluster.scheduler)?;
        if self.cluster.scheduler == SchedulerKind::Random {
            writeln!(f, "  Seed: {}", self.cluster.seed)?;
        }
        writeln!(f, "Tenants:")?;
        writeln!(f, "  Units: {}", self.synthetic.units)?;
        writeln!(f, "  Group size: {}", self.synthetic.group_size)?;
        if !self.synthetic.failing_units.is_empty() {
            writeln!(f, "  Failing analysis: {:?}", self.synthetic.failing_units)?;
        }
        if !self.synthetic.missing_units.is_empty() {
            writeln!(f, "  Missing: {:?}", self.synthetic.missing_units)?;
        }
        if !self.synthetic.unavailable_units.is_empty() {
            writeln!(f, "  Unavailable: {:?}", self.synthetic.unavailable_units)?;
        }
        if !self.synthetic.stale_schema_units.is_empty() {
            writeln!(f, "  Stale schema: {:?}", self.synthetic.stale_schema_units)?;
        }
        if let Some(ref path) = self.output.json_output {
            writeln!(f, "JSON output: {}", path.display())?;
        }
        Ok(())
    }
}
