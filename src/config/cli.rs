//! CLI argument parsing using clap

use crate::dispatch::SchedulerKind;
use clap::Parser;
use std::path::PathBuf;

/// fleetreport - distributed report generation over a tenant fleet
///
/// Runs an in-process cluster of report nodes against a synthetic tenant
/// population, starts (or joins) one report job and waits for it to finish.
#[derive(Parser, Debug)]
#[command(name = "fleetreport")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// TOML configuration file (CLI arguments override file settings)
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Job type to start or join
    #[arg(short = 'j', long)]
    pub job_type: Option<String>,

    // === Cluster ===
    /// Number of cluster members (default: number of CPUs)
    #[arg(short = 'm', long)]
    pub members: Option<usize>,

    /// Member selection strategy for shard dispatch
    #[arg(long, value_enum)]
    pub scheduler: Option<SchedulerKind>,

    /// Seed for the random scheduler
    #[arg(long)]
    pub seed: Option<u64>,

    // === Coordinator ===
    /// Bounded wait for a merge lock (e.g., 30m, 90s, 1h)
    #[arg(long)]
    pub merge_lock_timeout: Option<String>,

    /// Prefix for every lock and map name
    #[arg(long)]
    pub namespace: Option<String>,

    // === Tenants ===
    /// Number of synthetic tenants
    #[arg(short = 'u', long)]
    pub units: Option<usize>,

    /// Tenants per simulated database
    #[arg(short = 'g', long)]
    pub group_size: Option<usize>,

    /// Tenant index whose analysis fails (repeatable)
    #[arg(long = "fail-unit", value_name = "INDEX")]
    pub fail_units: Vec<usize>,

    /// Tenant index that no longer exists (repeatable)
    #[arg(long = "missing-unit", value_name = "INDEX")]
    pub missing_units: Vec<usize>,

    /// Tenant index whose store is unreachable (repeatable)
    #[arg(long = "unavailable-unit", value_name = "INDEX")]
    pub unavailable_units: Vec<usize>,

    /// Tenant index with an out-of-date schema; aborts the job (repeatable)
    #[arg(long = "stale-unit", value_name = "INDEX")]
    pub stale_units: Vec<usize>,

    // === Output ===
    /// Write the completed report as JSON
    #[arg(long)]
    pub json_output: Option<PathBuf>,

    /// Give up waiting for the job after this long (e.g., 10m)
    #[arg(long)]
    pub wait_timeout: Option<String>,

    /// Enable debug logging
    #[arg(long, env = "FLEETREPORT_DEBUG")]
    pub debug: bool,

    /// Print the resolved configuration and shard plan, then exit
    #[arg(long)]
    pub dry_run: bool,
}
