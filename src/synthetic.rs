//! Synthetic tenants
//!
//! A deterministic stand-in for a real tenant store, used by the `fleetreport`
//! binary and by tests. Tenants are named `tenant-00000`, `tenant-00001`, ...
//! and are co-located in consecutive groups of `group_size` (tenants sharing
//! one simulated database).
//!
//! Individual tenants can be told to fail loading (missing, storage down,
//! stale schema) or to fail analysis, to exercise every error path.

use crate::model::{UnitId, UnitReport};
use crate::plugins::Analyzer;
use crate::source::{Colocation, UnitData, UnitLoadError, UnitSource};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Shape of the synthetic tenant population.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyntheticConfig {
    #[serde(default = "default_units")]
    pub units: usize,
    /// Tenants per simulated database
    #[serde(default = "default_group_size")]
    pub group_size: usize,
    /// Tenant indices whose analysis fails
    #[serde(default)]
    pub failing_units: Vec<usize>,
    /// Tenant indices that report NotFound on load
    #[serde(default)]
    pub missing_units: Vec<usize>,
    /// Tenant indices whose store is unreachable
    #[serde(default)]
    pub unavailable_units: Vec<usize>,
    /// Tenant indices that report an out-of-date schema
    #[serde(default)]
    pub stale_schema_units: Vec<usize>,
}

fn default_units() -> usize {
    100
}

fn default_group_size() -> usize {
    4
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            units: default_units(),
            group_size: default_group_size(),
            failing_units: Vec::new(),
            missing_units: Vec::new(),
            unavailable_units: Vec::new(),
            stale_schema_units: Vec::new(),
        }
    }
}

/// Name of the tenant at `index`.
pub fn tenant_id(index: usize) -> UnitId {
    UnitId(format!("tenant-{:05}", index))
}

fn tenant_index(id: &UnitId) -> Option<usize> {
    id.as_str().strip_prefix("tenant-")?.parse().ok()
}

/// Row count reported by the tenant at `index`.
pub fn tenant_rows(index: usize) -> u64 {
    (index % 97) as u64 + 1
}

/// Synthetic unit source and co-location lookup.
#[derive(Debug, Clone)]
pub struct SyntheticTenants {
    units: usize,
    group_size: usize,
    missing: HashSet<usize>,
    unavailable: HashSet<usize>,
    stale: HashSet<usize>,
}

impl SyntheticTenants {
    pub fn new(config: &SyntheticConfig) -> Self {
        Self {
            units: config.units,
            group_size: config.group_size.max(1),
            missing: config.missing_units.iter().copied().collect(),
            unavailable: config.unavailable_units.iter().copied().collect(),
            stale: config.stale_schema_units.iter().copied().collect(),
        }
    }

    /// Expected sum of rows over tenants that load and analyze cleanly.
    pub fn expected_rows(&self, failing: &[usize]) -> u64 {
        (0..self.units)
            .filter(|i| !self.missing.contains(i) && !self.unavailable.contains(i))
            .filter(|i| !failing.contains(i))
            .map(tenant_rows)
            .sum()
    }
}

#[async_trait]
impl UnitSource for SyntheticTenants {
    async fn list_all_unit_ids(&self) -> Result<Vec<UnitId>, UnitLoadError> {
        Ok((0..self.units).map(tenant_id).collect())
    }

    async fn load_unit(&self, id: &UnitId) -> Result<UnitData, UnitLoadError> {
        let index = match tenant_index(id) {
            Some(index) if index < self.units => index,
            _ => return Err(UnitLoadError::NotFound { unit: id.clone() }),
        };

        if self.missing.contains(&index) {
            return Err(UnitLoadError::NotFound { unit: id.clone() });
        }
        if self.unavailable.contains(&index) {
            return Err(UnitLoadError::StorageUnavailable {
                unit: id.clone(),
                message: format!("database db-{} unreachable", index / self.group_size),
            });
        }
        if self.stale.contains(&index) {
            return Err(UnitLoadError::SchemaOutOfDate {
                unit: id.clone(),
                message: "schema version 3 is older than required version 4".to_string(),
            });
        }

        Ok(UnitData {
            id: id.clone(),
            payload: serde_json::json!({
                "database": format!("db-{}", index / self.group_size),
                "rows": tenant_rows(index),
            }),
        })
    }
}

impl Colocation for SyntheticTenants {
    fn colocated_with(&self, id: &UnitId) -> Vec<UnitId> {
        let Some(index) = tenant_index(id) else {
            return vec![id.clone()];
        };
        let first = (index / self.group_size) * self.group_size;
        let last = (first + self.group_size).min(self.units);
        (first..last).map(tenant_id).collect()
    }
}

/// Copies each tenant's row count into its unit result.
///
/// Fails for the configured tenant indices.
#[derive(Debug, Clone, Default)]
pub struct RowCountAnalyzer {
    failing: HashSet<UnitId>,
}

impl RowCountAnalyzer {
    pub fn new(failing_units: &[usize]) -> Self {
        Self {
            failing: failing_units.iter().map(|i| tenant_id(*i)).collect(),
        }
    }
}

impl Analyzer for RowCountAnalyzer {
    fn name(&self) -> &str {
        "row-count"
    }

    fn applies_to(&self, _job_type: &str) -> bool {
        true
    }

    fn analyze(&self, unit: &UnitData, report: &mut UnitReport) -> anyhow::Result<()> {
        if self.failing.contains(&unit.id) {
            anyhow::bail!("row count query failed for {}", unit.id);
        }

        let rows = unit
            .payload
            .get("rows")
            .and_then(|rows| rows.as_u64())
            .ok_or_else(|| anyhow::anyhow!("unit {} has no row count", unit.id))?;

        let result = report
            .result
            .get_or_insert_with(|| serde_json::Value::Object(serde_json::Map::new()));
        if let Some(object) = result.as_object_mut() {
            object.insert("rows".to_string(), rows.into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::JobId;

    fn tenants(units: usize, group_size: usize) -> SyntheticTenants {
        SyntheticTenants::new(&SyntheticConfig {
            units,
            group_size,
            ..Default::default()
        })
    }

    #[test]
    fn test_groups_are_consecutive() {
        let source = tenants(10, 4);
        assert_eq!(
            source.colocated_with(&tenant_id(5)),
            vec![tenant_id(4), tenant_id(5), tenant_id(6), tenant_id(7)]
        );
        // Last group is truncated
        assert_eq!(
            source.colocated_with(&tenant_id(9)),
            vec![tenant_id(8), tenant_id(9)]
        );
        // Unknown ids stand alone
        let stranger = UnitId::from("elsewhere");
        assert_eq!(source.colocated_with(&stranger), vec![stranger.clone()]);
    }

    #[tokio::test]
    async fn test_load_errors() {
        let source = SyntheticTenants::new(&SyntheticConfig {
            units: 4,
            group_size: 2,
            missing_units: vec![1],
            unavailable_units: vec![2],
            stale_schema_units: vec![3],
            ..Default::default()
        });

        assert_eq!(source.list_all_unit_ids().await.unwrap().len(), 4);
        assert!(source.load_unit(&tenant_id(0)).await.is_ok());
        assert!(matches!(
            source.load_unit(&tenant_id(1)).await,
            Err(UnitLoadError::NotFound { .. })
        ));
        assert!(matches!(
            source.load_unit(&tenant_id(2)).await,
            Err(UnitLoadError::StorageUnavailable { .. })
        ));
        assert!(source.load_unit(&tenant_id(3)).await.unwrap_err().is_fatal());
        assert!(matches!(
            source.load_unit(&tenant_id(99)).await,
            Err(UnitLoadError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_row_count_analyzer() {
        let source = tenants(3, 1);
        let analyzer = RowCountAnalyzer::new(&[2]);

        let data = source.load_unit(&tenant_id(1)).await.unwrap();
        let mut unit = UnitReport::new(JobId::new(), tenant_id(1));
        analyzer.analyze(&data, &mut unit).unwrap();
        assert_eq!(unit.result, Some(serde_json::json!({"rows": 2})));

        let data = source.load_unit(&tenant_id(2)).await.unwrap();
        let mut unit = UnitReport::new(JobId::new(), tenant_id(2));
        assert!(analyzer.analyze(&data, &mut unit).is_err());
    }

    #[test]
    fn test_expected_rows() {
        let source = SyntheticTenants::new(&SyntheticConfig {
            units: 3,
            group_size: 1,
            missing_units: vec![0],
            ..Default::default()
        });
        assert_eq!(source.expected_rows(&[]), 2 + 3);
        assert_eq!(source.expected_rows(&[2]), 2);
    }
}
