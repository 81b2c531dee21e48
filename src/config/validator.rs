//! Configuration validation

use super::*;
use anyhow::Result;

/// Validate complete configuration
pub fn validate_config(config: &Config) -> Result<()> {
    if config.job_type.trim().is_empty() {
        anyhow::bail!("job_type must not be empty");
    }

    validate_coordinator(&config.coordinator)?;
    validate_cluster(&config.cluster)?;
    validate_synthetic(&config.synthetic)?;
    validate_output(&config.output)?;

    Ok(())
}

/// Validate coordinator configuration
pub fn validate_coordinator(coordinator: &CoordinatorConfig) -> Result<()> {
    if coordinator.merge_lock_timeout_secs == 0 {
        anyhow::bail!("merge_lock_timeout_secs must be at least 1");
    }

    if coordinator.namespace.trim().is_empty() {
        anyhow::bail!("namespace must not be empty");
    }

    if coordinator.namespace.contains(':') {
        anyhow::bail!(
            "namespace must not contain ':' (got '{}')",
            coordinator.namespace
        );
    }

    Ok(())
}

/// Validate cluster configuration
pub fn validate_cluster(cluster: &ClusterConfig) -> Result<()> {
    if cluster.members == 0 {
        anyhow::bail!("cluster must have at least 1 member");
    }

    Ok(())
}

/// Validate synthetic tenant configuration
pub fn validate_synthetic(synthetic: &SyntheticConfig) -> Result<()> {
    if synthetic.group_size == 0 {
        anyhow::bail!("group_size must be at least 1");
    }

    let lists = [
        ("failing_units", &synthetic.failing_units),
        ("missing_units", &synthetic.missing_units),
        ("unavailable_units", &synthetic.unavailable_units),
        ("stale_schema_units", &synthetic.stale_schema_units),
    ];
    for (name, indices) in lists {
        if let Some(index) = indices.iter().find(|i| **i >= synthetic.units) {
            anyhow::bail!(
                "{} contains tenant index {} but only {} tenants exist",
                name,
                index,
                synthetic.units
            );
        }
    }

    Ok(())
}

/// Validate output configuration
pub fn validate_output(output: &OutputConfig) -> Result<()> {
    if output.wait_timeout_secs == 0 {
        anyhow::bail!("wait_timeout_secs must be at least 1");
    }

    if let Some(ref path) = output.json_output {
        if path.as_os_str().is_empty() {
            anyhow::bail!("json_output path must not be empty");
        }
    }

    Ok(())
}
