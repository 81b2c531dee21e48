//! Unit source and co-location collaborators
//!
//! The physical store behind each tenant is owned by the surrounding system.
//! The orchestrator only needs to enumerate unit ids, load one unit at a time,
//! and ask which units live together.

use crate::model::UnitId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Full data of one unit, as handed to analyzers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UnitData {
    pub id: UnitId,
    /// Opaque unit content
    pub payload: serde_json::Value,
}

/// Errors a unit source can report for a single unit.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum UnitLoadError {
    /// The unit no longer exists.
    #[error("unit {unit} not found")]
    NotFound {
        /// The missing unit.
        unit: UnitId,
    },

    /// The store backing the unit could not be reached.
    #[error("storage unavailable for unit {unit}: {message}")]
    StorageUnavailable {
        /// The affected unit.
        unit: UnitId,
        /// Description of the failure.
        message: String,
    },

    /// The unit's storage schema is older than this code understands.
    #[error("schema out of date for unit {unit}: {message}")]
    SchemaOutOfDate {
        /// The affected unit.
        unit: UnitId,
        /// Description of the mismatch.
        message: String,
    },
}

impl UnitLoadError {
    /// Fatal errors abort the entire job instead of being recorded.
    pub fn is_fatal(&self) -> bool {
        matches!(self, UnitLoadError::SchemaOutOfDate { .. })
    }
}

/// Enumerates and loads units.
#[async_trait]
pub trait UnitSource: Send + Sync {
    /// List every unit id known to the system.
    async fn list_all_unit_ids(&self) -> Result<Vec<UnitId>, UnitLoadError>;

    /// Load the full data of one unit.
    async fn load_unit(&self, id: &UnitId) -> Result<UnitData, UnitLoadError>;
}

/// Co-location lookup.
///
/// `colocated_with(id)` must include `id` itself.
pub trait Colocation: Send + Sync {
    fn colocated_with(&self, id: &UnitId) -> Vec<UnitId>;
}
