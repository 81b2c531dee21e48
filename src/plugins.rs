//! Pluggable report logic
//!
//! Business content of a report comes from four kinds of plugins, all scoped
//! by job type through `applies_to`:
//!
//! - **Analyzer**: inspects one loaded unit and fills its [`UnitReport`]
//! - **Cumulator**: folds unit reports into the aggregate [`Report`]
//! - **SystemHandler**: runs once at finalize, before finishing touches
//! - **FinishingTouch**: runs last at finalize
//!
//! The orchestrator iterates every registered instance, whatever the count.
//! Plugin failures are returned as `anyhow` errors and recorded on the report;
//! they never end a job.

use crate::model::{Report, UnitReport};
use crate::source::UnitData;
use std::sync::Arc;

/// Per-unit analysis.
pub trait Analyzer: Send + Sync {
    /// Name recorded on errors raised by this analyzer
    fn name(&self) -> &str;

    fn applies_to(&self, job_type: &str) -> bool;

    fn analyze(&self, unit: &UnitData, report: &mut UnitReport) -> anyhow::Result<()>;
}

/// Folds unit results into the aggregate.
pub trait Cumulator: Send + Sync {
    fn name(&self) -> &str;

    fn applies_to(&self, job_type: &str) -> bool;

    /// Worker-side pass over a finished unit report, before it is merged.
    fn prepare(&self, _unit: &mut UnitReport) -> anyhow::Result<()> {
        Ok(())
    }

    /// Fold one unit report into the aggregate, under the merge lock.
    fn cumulate(&self, unit: &UnitReport, report: &mut Report) -> anyhow::Result<()>;
}

/// System-level work done once per finalized report.
pub trait SystemHandler: Send + Sync {
    fn name(&self) -> &str;

    fn applies_to(&self, job_type: &str) -> bool;

    fn handle(&self, report: &mut Report) -> anyhow::Result<()>;
}

/// Last adjustments to a finalized report.
pub trait FinishingTouch: Send + Sync {
    fn name(&self) -> &str;

    fn applies_to(&self, job_type: &str) -> bool;

    fn apply(&self, report: &mut Report) -> anyhow::Result<()>;
}

/// Every plugin registered with one process.
///
/// Cheap to clone; plugins are shared behind `Arc`.
#[derive(Clone, Default)]
pub struct PluginSet {
    analyzers: Vec<Arc<dyn Analyzer>>,
    cumulators: Vec<Arc<dyn Cumulator>>,
    system_handlers: Vec<Arc<dyn SystemHandler>>,
    finishing_touches: Vec<Arc<dyn FinishingTouch>>,
}

impl PluginSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_analyzer(mut self, analyzer: Arc<dyn Analyzer>) -> Self {
        self.analyzers.push(analyzer);
        self
    }

    pub fn with_cumulator(mut self, cumulator: Arc<dyn Cumulator>) -> Self {
        self.cumulators.push(cumulator);
        self
    }

    pub fn with_system_handler(mut self, handler: Arc<dyn SystemHandler>) -> Self {
        self.system_handlers.push(handler);
        self
    }

    pub fn with_finishing_touch(mut self, touch: Arc<dyn FinishingTouch>) -> Self {
        self.finishing_touches.push(touch);
        self
    }

    pub fn analyzers_for<'a>(&'a self, job_type: &'a str) -> impl Iterator<Item = &'a Arc<dyn Analyzer>> + 'a {
        self.analyzers.iter().filter(move |a| a.applies_to(job_type))
    }

    pub fn cumulators_for<'a>(&'a self, job_type: &'a str) -> impl Iterator<Item = &'a Arc<dyn Cumulator>> + 'a {
        self.cumulators.iter().filter(move |c| c.applies_to(job_type))
    }

    pub fn system_handlers_for<'a>(
        &'a self,
        job_type: &'a str,
    ) -> impl Iterator<Item = &'a Arc<dyn SystemHandler>> + 'a {
        self.system_handlers
            .iter()
            .filter(move |h| h.applies_to(job_type))
    }

    pub fn finishing_touches_for<'a>(
        &'a self,
        job_type: &'a str,
    ) -> impl Iterator<Item = &'a Arc<dyn FinishingTouch>> + 'a {
        self.finishing_touches
            .iter()
            .filter(move |t| t.applies_to(job_type))
    }
}

/// Counts merged units and sums the numeric `rows` field of unit results.
///
/// Aggregate shape: `{"units": <n>, "rows": <sum>}`.
#[derive(Debug, Default)]
pub struct UnitCounter;

impl Cumulator for UnitCounter {
    fn name(&self) -> &str {
        "unit-counter"
    }

    fn applies_to(&self, _job_type: &str) -> bool {
        true
    }

    fn cumulate(&self, unit: &UnitReport, report: &mut Report) -> anyhow::Result<()> {
        let rows = unit
            .result
            .as_ref()
            .and_then(|result| result.get("rows"))
            .and_then(|rows| rows.as_u64())
            .unwrap_or(0);

        let aggregate = report
            .result
            .as_object_mut()
            .ok_or_else(|| anyhow::anyhow!("aggregate result is not an object"))?;

        let units = aggregate.get("units").and_then(|v| v.as_u64()).unwrap_or(0);
        let total_rows = aggregate.get("rows").and_then(|v| v.as_u64()).unwrap_or(0);
        aggregate.insert("units".to_string(), (units + 1).into());
        aggregate.insert("rows".to_string(), (total_rows + rows).into());

        Ok(())
    }
}
