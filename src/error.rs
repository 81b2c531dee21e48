//! Error types for report orchestration.

use std::time::Duration;

use crate::source::UnitLoadError;

/// The result type used throughout fleetreport.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while coordinating a report job.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A job type was empty or otherwise unusable as a registry key.
    #[error("invalid job type: {job_type:?}")]
    InvalidJobType {
        /// The rejected job type.
        job_type: String,
    },

    /// A bounded lock acquisition gave up.
    #[error("timed out after {waited:?} waiting for lock {lock}")]
    LockTimeout {
        /// Name of the lock.
        lock: String,
        /// How long the caller waited.
        waited: Duration,
    },

    /// The lock was destroyed while the caller was waiting for it.
    #[error("lock {lock} was destroyed")]
    LockDestroyed {
        /// Name of the lock.
        lock: String,
    },

    /// A release was attempted with a token that does not hold the lock.
    #[error("caller does not hold lock {lock}")]
    NotLockHolder {
        /// Name of the lock.
        lock: String,
    },

    /// A registry (distributed map) operation failed.
    #[error("registry error: {message}")]
    Registry {
        /// Description of the failure.
        message: String,
    },

    /// A registry value could not be encoded.
    #[error("encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// A registry value could not be decoded.
    #[error("decode error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// The unit source failed outside of per-unit loading.
    #[error("unit source error: {0}")]
    Source(#[from] UnitLoadError),

    /// A shard could not be handed to a cluster member.
    #[error("dispatch failed: {message}")]
    Dispatch {
        /// Description of the failure.
        message: String,
    },

    /// The cluster reported no members to dispatch to.
    #[error("no cluster members available")]
    NoMembers,
}

impl Error {
    /// Creates a new registry error.
    #[must_use]
    pub fn registry(message: impl Into<String>) -> Self {
        Self::Registry {
            message: message.into(),
        }
    }

    /// Creates a new dispatch error.
    #[must_use]
    pub fn dispatch(message: impl Into<String>) -> Self {
        Self::Dispatch {
            message: message.into(),
        }
    }
}
