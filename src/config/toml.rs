//! TOML configuration file parsing

use super::*;
use crate::config::cli::Cli;
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

/// Parse TOML configuration file
pub fn parse_toml_file(path: &Path) -> Result<Config> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_toml_string(&contents)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Parse TOML configuration from string
pub fn parse_toml_string(contents: &str) -> Result<Config> {
    let config: Config = ::toml::from_str(contents)
        .context("Failed to parse TOML configuration")?;

    Ok(config)
}

/// Merge CLI arguments with TOML configuration (CLI takes precedence)
pub fn merge_cli_with_config(cli: &Cli, mut config: Config) -> Result<Config> {
    if let Some(ref job_type) = cli.job_type {
        config.job_type = job_type.clone();
    }

    // Cluster
    if let Some(members) = cli.members {
        config.cluster.members = members;
    }
    if let Some(scheduler) = cli.scheduler {
        config.cluster.scheduler = scheduler;
    }
    if let Some(seed) = cli.seed {
        config.cluster.seed = seed;
    }

    // Coordinator
    if let Some(ref timeout) = cli.merge_lock_timeout {
        config.coordinator.merge_lock_timeout_secs = parse_duration(timeout)
            .context("Invalid --merge-lock-timeout")?;
    }
    if let Some(ref namespace) = cli.namespace {
        config.coordinator.namespace = namespace.clone();
    }

    // Tenants; unit lists on the command line extend the file's lists
    if let Some(units) = cli.units {
        config.synthetic.units = units;
    }
    if let Some(group_size) = cli.group_size {
        config.synthetic.group_size = group_size;
    }
    config.synthetic.failing_units.extend(&cli.fail_units);
    config.synthetic.missing_units.extend(&cli.missing_units);
    config.synthetic.unavailable_units.extend(&cli.unavailable_units);
    config.synthetic.stale_schema_units.extend(&cli.stale_units);

    // Output
    if let Some(ref path) = cli.json_output {
        config.output.json_output = Some(path.clone());
    }
    if let Some(ref timeout) = cli.wait_timeout {
        config.output.wait_timeout_secs = parse_duration(timeout)
            .context("Invalid --wait-timeout")?;
    }
    if cli.debug {
        config.logging.debug = true;
    }

    Ok(config)
}

/// Parse duration string (e.g., "60s", "5m", "1h") to seconds
///
/// A bare number is taken as seconds.
fn parse_duration(s: &str) -> Result<u64> {
    let s = s.trim();
    if s.is_empty() {
        anyhow::bail!("Empty duration string");
    }

    if let Ok(seconds) = s.parse::<u64>() {
        return Ok(seconds);
    }

    let unit_start = s.char_indices().last().map(|(i, _)| i).unwrap_or(0);
    let (num_str, unit) = s.split_at(unit_start);

    let num: u64 = num_str.parse()
        .with_context(|| format!("Invalid number in duration: {}", num_str))?;

    let multiplier = match unit {
        "s" => 1,
        "m" => 60,
        "h" => 3600,
        _ => anyhow::bail!("Invalid duration unit: {}. Use s, m, or h", unit),
    };

    match num.checked_mul(multiplier) {
        Some(seconds) => Ok(seconds),
        None => anyhow::bail!("Duration too large: {}", s),
    }
}
