//! Cluster primitives
//!
//! The orchestrator never talks to a clustering product directly. Everything it
//! needs from the cluster is expressed by the traits in this module:
//!
//! - **Named locks** ([`DistributedLock`]): blocking acquire, bounded acquire,
//!   token-checked release, force release and destroy
//! - **Named maps** ([`DistributedMap`]): byte-valued get/put/remove/values
//! - **Membership + task submission** ([`ClusterPrimitives`]): list members and
//!   hand a [`ShardTask`] to one of them for asynchronous execution
//!
//! # Modules
//!
//! - `local`: single-process implementation for embedding and tests
//! - `protocol`: envelope codec used to copy tasks across member boundaries
//!
//! Any real coordination service can back these traits; correctness of the
//! coordinator depends only on the lock and map semantics documented here.

pub mod local;
pub mod protocol;

use crate::error::Result;
use crate::model::ShardTask;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Proof of lock ownership, returned by a successful acquire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken(pub String);

/// A cluster-wide named mutual-exclusion lock.
///
/// # Semantics
///
/// - At most one token holds the lock at a time.
/// - `destroy` wakes every waiter with [`crate::error::Error::LockDestroyed`];
///   asking the cluster for the same name afterwards yields a fresh lock.
#[async_trait]
pub trait DistributedLock: Send + Sync {
    /// Name the lock was created under.
    fn name(&self) -> &str;

    /// Wait until the lock is acquired.
    async fn acquire(&self) -> Result<LockToken>;

    /// Wait at most `timeout` for the lock.
    ///
    /// Returns `Ok(None)` when the timeout elapses.
    async fn try_acquire(&self, timeout: Duration) -> Result<Option<LockToken>>;

    /// Release a lock held by `token`.
    async fn release(&self, token: LockToken) -> Result<()>;

    /// Release the lock regardless of who holds it.
    async fn force_release(&self) -> Result<()>;

    /// Tear the lock down and fail all current waiters.
    async fn destroy(&self) -> Result<()>;

    /// Whether some token currently holds the lock.
    fn is_locked(&self) -> bool;
}

/// A cluster-wide named map from string keys to opaque byte values.
///
/// Values are copied in and out; callers own their encoding.
#[async_trait]
pub trait DistributedMap: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store a value, returning the previous one.
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<Option<Vec<u8>>>;

    /// Remove a value, returning it if present.
    async fn remove(&self, key: &str) -> Result<Option<Vec<u8>>>;

    async fn values(&self) -> Result<Vec<Vec<u8>>>;

    async fn is_empty(&self) -> Result<bool>;
}

/// Identifier of a cluster member.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct MemberId(pub String);

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Snapshot of one cluster member as seen by the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub id: MemberId,
    /// Shard tasks submitted to this member that have not finished yet
    pub in_flight: usize,
}

/// Executes shard tasks on a member.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Process one shard, returning the number of units processed.
    async fn run_shard(&self, task: ShardTask) -> Result<usize>;
}

/// Everything the coordinator needs from the cluster.
pub trait ClusterPrimitives: Send + Sync {
    /// Get (or lazily create) the named lock.
    fn lock(&self, name: &str) -> Arc<dyn DistributedLock>;

    /// Get (or lazily create) the named map.
    fn map(&self, name: &str) -> Arc<dyn DistributedMap>;

    /// Current members, in a stable order.
    fn members(&self) -> Vec<Member>;

    /// Submit a task to `member` for asynchronous execution.
    ///
    /// Returns once the task is accepted, not when it finishes.
    fn submit(&self, member: &MemberId, task: ShardTask) -> Result<()>;
}
