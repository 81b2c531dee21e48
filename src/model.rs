//! Job and report data model
//!
//! Every value in this module is plain data: it is copied (encoded) whenever it
//! crosses a member or registry boundary and is never shared by reference
//! between cluster members.
//!
//! # Lifecycle
//!
//! ```text
//! start()            mergeUnit() x N                 finalize()
//!   |                      |                              |
//!   v                      v                              v
//! Report{Pending} --> pending_units decrements --> Report{Done} in completed registry
//!                          ^
//!                          |
//!                   UnitReport (one per unit, merged exactly once)
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for one report job.
///
/// Wrapper around a UUID v4 string so ids stay unique across members.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct JobId(pub String);

impl JobId {
    /// Generates a new random job id.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of one unit of work (a tenant).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UnitId(pub String);

impl UnitId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UnitId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for UnitId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Lifecycle state of a report.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ReportState {
    /// Units are still being merged.
    Pending,
    /// Finalized and stored in the completed registry.
    Done,
}

/// Classification of a non-fatal error recorded on a report.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorKind {
    /// The unit could not be loaded from the unit source.
    UnitLoad,
    /// An analyzer failed for one unit.
    Analyzer,
    /// A cumulator failed while folding one unit.
    Cumulator,
    /// A system-level or finishing-touch handler failed during finalize.
    Handler,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::UnitLoad => "unit-load",
            ErrorKind::Analyzer => "analyzer",
            ErrorKind::Cumulator => "cumulator",
            ErrorKind::Handler => "handler",
        };
        f.write_str(name)
    }
}

/// One recorded error, kept on the report for post-hoc inspection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReportError {
    pub kind: ErrorKind,
    /// Unit the error belongs to (None for finalize-time errors)
    pub unit: Option<UnitId>,
    /// Name of the plugin or component that failed
    pub origin: String,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl ReportError {
    pub fn new(
        kind: ErrorKind,
        unit: Option<UnitId>,
        origin: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            unit,
            origin: origin.into(),
            message: message.into(),
            at: Utc::now(),
        }
    }
}

/// Aggregate report for one job.
///
/// Mutated only inside the merge-lock critical section for its job type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Report {
    pub id: JobId,
    pub job_type: String,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub stopped_at: Option<DateTime<Utc>>,
    pub total_units: u64,
    pub pending_units: u64,
    /// Non-fatal errors in the order they were merged
    pub errors: Vec<ReportError>,
    /// Opaque aggregate payload owned by the cumulators
    pub result: serde_json::Value,
    pub state: ReportState,
}

impl Report {
    /// Create a pending report covering `total_units` units.
    pub fn new(job_type: impl Into<String>, total_units: u64) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            job_type: job_type.into(),
            created_at: now,
            started_at: Some(now),
            stopped_at: None,
            total_units,
            pending_units: total_units,
            errors: Vec::new(),
            result: serde_json::Value::Object(serde_json::Map::new()),
            state: ReportState::Pending,
        }
    }

    /// Count one unit as merged.
    ///
    /// Saturates at zero; returns the remaining pending count.
    pub fn complete_unit(&mut self) -> u64 {
        self.pending_units = self.pending_units.saturating_sub(1);
        self.pending_units
    }

    /// Number of units merged so far.
    pub fn merged_units(&self) -> u64 {
        self.total_units - self.pending_units
    }

    /// Fraction of units merged, in [0.0, 1.0].
    pub fn progress(&self) -> f64 {
        if self.total_units == 0 {
            return 1.0;
        }
        self.merged_units() as f64 / self.total_units as f64
    }

    pub fn is_done(&self) -> bool {
        self.state == ReportState::Done
    }
}

/// Per-unit result produced by a batch worker.
///
/// Consumed by exactly one merge, never persisted on its own.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UnitReport {
    pub job_id: JobId,
    pub unit: UnitId,
    /// Opaque per-unit payload; None marks an error-only report
    pub result: Option<serde_json::Value>,
    pub errors: Vec<ReportError>,
}

impl UnitReport {
    /// Create an empty unit report ready for analyzers.
    pub fn new(job_id: JobId, unit: UnitId) -> Self {
        Self {
            job_id,
            unit,
            result: Some(serde_json::Value::Object(serde_json::Map::new())),
            errors: Vec::new(),
        }
    }

    /// Create a report that carries only an error for its unit.
    pub fn error_only(job_id: JobId, unit: UnitId, error: ReportError) -> Self {
        Self {
            job_id,
            unit,
            result: None,
            errors: vec![error],
        }
    }

    /// Error-only reports skip cumulation but still count as merged.
    pub fn is_error_only(&self) -> bool {
        self.result.is_none()
    }
}

/// Ordered set of co-located unit ids handed to one worker invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Shard {
    pub units: Vec<UnitId>,
}

impl Shard {
    pub fn new(units: Vec<UnitId>) -> Self {
        Self { units }
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

/// A shard bound to its job, as submitted to a cluster member.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ShardTask {
    pub job_id: JobId,
    pub job_type: String,
    pub shard: Shard,
}
