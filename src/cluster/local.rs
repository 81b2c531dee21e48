//! Single-process cluster
//!
//! [`LocalCluster`] implements [`ClusterPrimitives`] inside one process:
//!
//! - Named locks are single-permit tokio semaphores; `destroy` closes the
//!   semaphore so every waiter fails with `LockDestroyed`.
//! - Named maps store opaque bytes in a `DashMap`, so every read hands back a
//!   fresh copy exactly as a remote map would.
//! - Members are registered task handlers. Submitted tasks are encoded into a
//!   [`TaskEnvelope`], decoded again on the member side, and run on tokio.
//!
//! ## Limitations
//!
//! - No cross-process coordination: all members live in this process
//! - No persistence: all state is lost when the process exits

use super::protocol::{decode_envelope, encode_envelope, TaskEnvelope};
use super::{
    ClusterPrimitives, DistributedLock, DistributedMap, LockToken, Member, MemberId, TaskHandler,
};
use crate::error::{Error, Result};
use crate::model::ShardTask;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;

/// Converts a poisoned std lock into a registry error.
fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::registry("local cluster state poisoned")
}

type LockTable = DashMap<String, Arc<LocalLock>>;

/// Named lock backed by a single-permit semaphore.
pub struct LocalLock {
    name: String,
    semaphore: Arc<Semaphore>,
    holder: Mutex<Option<(String, OwnedSemaphorePermit)>>,
    table: Weak<LockTable>,
}

impl LocalLock {
    fn new(name: &str, table: Weak<LockTable>) -> Self {
        Self {
            name: name.to_string(),
            semaphore: Arc::new(Semaphore::new(1)),
            holder: Mutex::new(None),
            table,
        }
    }

    fn hold(&self, permit: OwnedSemaphorePermit) -> Result<LockToken> {
        let token = uuid::Uuid::new_v4().to_string();
        *self.holder.lock().map_err(poison_err)? = Some((token.clone(), permit));
        Ok(LockToken(token))
    }

    fn destroyed(&self) -> Error {
        Error::LockDestroyed {
            lock: self.name.clone(),
        }
    }
}

#[async_trait]
impl DistributedLock for LocalLock {
    fn name(&self) -> &str {
        &self.name
    }

    async fn acquire(&self) -> Result<LockToken> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| self.destroyed())?;
        self.hold(permit)
    }

    async fn try_acquire(&self, timeout: Duration) -> Result<Option<LockToken>> {
        match tokio::time::timeout(timeout, self.semaphore.clone().acquire_owned()).await {
            Ok(Ok(permit)) => self.hold(permit).map(Some),
            Ok(Err(_)) => Err(self.destroyed()),
            Err(_) => Ok(None),
        }
    }

    async fn release(&self, token: LockToken) -> Result<()> {
        let mut holder = self.holder.lock().map_err(poison_err)?;
        match holder.as_ref() {
            Some((held, _)) if *held == token.0 => {
                // Dropping the permit hands the lock to the next waiter
                holder.take();
                Ok(())
            }
            _ => Err(Error::NotLockHolder {
                lock: self.name.clone(),
            }),
        }
    }

    async fn force_release(&self) -> Result<()> {
        self.holder.lock().map_err(poison_err)?.take();
        Ok(())
    }

    async fn destroy(&self) -> Result<()> {
        self.semaphore.close();
        self.holder.lock().map_err(poison_err)?.take();

        if let Some(table) = self.table.upgrade() {
            table.remove_if(&self.name, |_, lock| std::ptr::eq(Arc::as_ptr(lock), self));
        }

        tracing::debug!(lock = %self.name, "Lock destroyed");
        Ok(())
    }

    fn is_locked(&self) -> bool {
        self.holder
            .lock()
            .map(|holder| holder.is_some())
            .unwrap_or(false)
    }
}

/// Named map holding encoded values.
#[derive(Default)]
pub struct LocalMap {
    entries: DashMap<String, Vec<u8>>,
}

#[async_trait]
impl DistributedMap for LocalMap {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.insert(key.to_string(), value))
    }

    async fn remove(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.remove(key).map(|(_, value)| value))
    }

    async fn values(&self) -> Result<Vec<Vec<u8>>> {
        Ok(self
            .entries
            .iter()
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn is_empty(&self) -> Result<bool> {
        Ok(self.entries.is_empty())
    }
}

struct LocalMember {
    id: MemberId,
    handler: Weak<dyn TaskHandler>,
    in_flight: Arc<AtomicUsize>,
}

/// In-process cluster with simulated members.
pub struct LocalCluster {
    locks: Arc<LockTable>,
    maps: DashMap<String, Arc<LocalMap>>,
    members: RwLock<Vec<LocalMember>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    host: String,
}

impl LocalCluster {
    /// Create an empty cluster with no members.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            locks: Arc::new(DashMap::new()),
            maps: DashMap::new(),
            members: RwLock::new(Vec::new()),
            tasks: Mutex::new(Vec::new()),
            host: local_host_name(),
        })
    }

    /// Id the next registered member will receive.
    pub fn next_member_id(&self) -> MemberId {
        let index = self.members.read().map(|m| m.len()).unwrap_or(0);
        MemberId(format!("{}-{}", self.host, index))
    }

    /// Register a member that runs shard tasks with `handler`.
    ///
    /// The cluster keeps only a weak reference; the caller owns the handler.
    pub fn add_member(&self, id: MemberId, handler: Weak<dyn TaskHandler>) -> Result<()> {
        let mut members = self.members.write().map_err(poison_err)?;
        if members.iter().any(|m| m.id == id) {
            return Err(Error::dispatch(format!("member {} already registered", id)));
        }
        tracing::info!(member = %id, "Member joined local cluster");
        members.push(LocalMember {
            id,
            handler,
            in_flight: Arc::new(AtomicUsize::new(0)),
        });
        Ok(())
    }

    #[cfg(test)]
    fn tracked_tasks(&self) -> usize {
        self.tasks.lock().map(|tasks| tasks.len()).unwrap_or(0)
    }

    /// Wait for every submitted task, including ones submitted while waiting.
    pub async fn wait_idle(&self) {
        loop {
            let handles: Vec<JoinHandle<()>> = match self.tasks.lock() {
                Ok(mut tasks) => tasks.drain(..).collect(),
                Err(_) => return,
            };
            if handles.is_empty() {
                return;
            }
            for handle in handles {
                if let Err(e) = handle.await {
                    tracing::error!("Shard task panicked: {}", e);
                }
            }
        }
    }
}

impl ClusterPrimitives for LocalCluster {
    fn lock(&self, name: &str) -> Arc<dyn DistributedLock> {
        let weak = Arc::downgrade(&self.locks);
        let lock = self
            .locks
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(LocalLock::new(name, weak)))
            .value()
            .clone();
        lock
    }

    fn map(&self, name: &str) -> Arc<dyn DistributedMap> {
        let map = self
            .maps
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(LocalMap::default()))
            .value()
            .clone();
        map
    }

    fn members(&self) -> Vec<Member> {
        self.members
            .read()
            .map(|members| {
                members
                    .iter()
                    .filter(|m| m.handler.strong_count() > 0)
                    .map(|m| Member {
                        id: m.id.clone(),
                        in_flight: m.in_flight.load(Ordering::SeqCst),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    fn submit(&self, member: &MemberId, task: ShardTask) -> Result<()> {
        let (handler, in_flight) = {
            let members = self.members.read().map_err(poison_err)?;
            let target = members
                .iter()
                .find(|m| &m.id == member)
                .ok_or_else(|| Error::dispatch(format!("unknown member {}", member)))?;
            (target.handler.clone(), target.in_flight.clone())
        };

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::dispatch(format!("no async runtime for member task: {}", e)))?;

        let framed = encode_envelope(&TaskEnvelope::new(member.clone(), task))?;
        in_flight.fetch_add(1, Ordering::SeqCst);

        let handle = runtime.spawn(async move {
            run_envelope(framed, handler).await;
            in_flight.fetch_sub(1, Ordering::SeqCst);
        });
        let mut tasks = self.tasks.lock().map_err(poison_err)?;
        tasks.retain(|task| !task.is_finished());
        tasks.push(handle);

        Ok(())
    }
}

/// Member side of a submission: decode the copy and run it.
async fn run_envelope(framed: Vec<u8>, handler: Weak<dyn TaskHandler>) {
    let envelope = match decode_envelope(&framed) {
        Ok((envelope, _)) => envelope,
        Err(e) => {
            tracing::error!("Dropping undecodable shard task: {}", e);
            return;
        }
    };

    let Some(handler) = handler.upgrade() else {
        tracing::warn!(member = %envelope.member, "Member left before running shard task");
        return;
    };

    let job_id = envelope.task.job_id.clone();
    match handler.run_shard(envelope.task).await {
        Ok(processed) => {
            tracing::debug!(member = %envelope.member, %job_id, processed, "Shard task finished");
        }
        Err(e) => {
            tracing::error!(member = %envelope.member, %job_id, "Shard task failed: {}", e);
        }
    }
}

fn local_host_name() -> String {
    hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .unwrap_or_else(|| "local".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{JobId, Shard, UnitId};

    #[tokio::test]
    async fn test_lock_acquire_release() {
        let cluster = LocalCluster::new();
        let lock = cluster.lock("reports:merge:daily");

        let token = lock.acquire().await.unwrap();
        assert!(lock.is_locked());
        assert!(lock
            .try_acquire(Duration::from_millis(20))
            .await
            .unwrap()
            .is_none());

        lock.release(token).await.unwrap();
        assert!(!lock.is_locked());
        assert!(lock
            .try_acquire(Duration::from_millis(20))
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_release_requires_holder() {
        let cluster = LocalCluster::new();
        let lock = cluster.lock("a");
        let _token = lock.acquire().await.unwrap();

        let err = lock.release(LockToken("bogus".into())).await.unwrap_err();
        assert!(matches!(err, Error::NotLockHolder { .. }));

        lock.force_release().await.unwrap();
        assert!(!lock.is_locked());
    }

    #[tokio::test]
    async fn test_same_name_same_lock() {
        let cluster = LocalCluster::new();
        let first = cluster.lock("a");
        let _token = first.acquire().await.unwrap();

        let second = cluster.lock("a");
        assert!(second.is_locked());
        assert!(!cluster.lock("b").is_locked());
    }

    #[tokio::test]
    async fn test_destroy_fails_waiters_and_resets_name() {
        let cluster = LocalCluster::new();
        let lock = cluster.lock("a");
        let _token = lock.acquire().await.unwrap();

        let waiter = {
            let lock = lock.clone();
            tokio::spawn(async move { lock.acquire().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        lock.destroy().await.unwrap();
        let result = waiter.await.unwrap();
        assert!(matches!(result, Err(Error::LockDestroyed { .. })));

        let fresh = cluster.lock("a");
        assert!(!fresh.is_locked());
        assert!(fresh.acquire().await.is_ok());
    }

    #[tokio::test]
    async fn test_map_operations() {
        let cluster = LocalCluster::new();
        let map = cluster.map("reports:pending");
        assert!(map.is_empty().await.unwrap());

        assert!(map.put("daily", vec![1, 2]).await.unwrap().is_none());
        assert_eq!(map.put("daily", vec![3]).await.unwrap(), Some(vec![1, 2]));
        assert_eq!(map.get("daily").await.unwrap(), Some(vec![3]));
        assert_eq!(map.values().await.unwrap(), vec![vec![3]]);

        // Same name resolves to the same map
        assert!(!cluster.map("reports:pending").is_empty().await.unwrap());

        assert_eq!(map.remove("daily").await.unwrap(), Some(vec![3]));
        assert!(map.get("daily").await.unwrap().is_none());
        assert!(map.is_empty().await.unwrap());
    }

    struct CountingHandler {
        units: AtomicUsize,
    }

    #[async_trait]
    impl TaskHandler for CountingHandler {
        async fn run_shard(&self, task: ShardTask) -> Result<usize> {
            self.units.fetch_add(task.shard.len(), Ordering::SeqCst);
            Ok(task.shard.len())
        }
    }

    #[tokio::test]
    async fn test_submit_runs_on_member() {
        let cluster = LocalCluster::new();
        let handler = Arc::new(CountingHandler {
            units: AtomicUsize::new(0),
        });
        let id = cluster.next_member_id();
        let weak: Weak<dyn TaskHandler> = Arc::downgrade(&(handler.clone() as Arc<dyn TaskHandler>));
        cluster.add_member(id.clone(), weak).unwrap();
        assert_eq!(cluster.members().len(), 1);

        let task = ShardTask {
            job_id: JobId::new(),
            job_type: "daily".into(),
            shard: Shard::new(vec![UnitId::from("t-1"), UnitId::from("t-2")]),
        };
        cluster.submit(&id, task.clone()).unwrap();
        cluster.submit(&id, task).unwrap();
        cluster.wait_idle().await;

        assert_eq!(handler.units.load(Ordering::SeqCst), 4);
        assert_eq!(cluster.members()[0].in_flight, 0);
    }

    #[tokio::test]
    async fn test_finished_tasks_are_pruned_on_submit() {
        let cluster = LocalCluster::new();
        let handler = Arc::new(CountingHandler {
            units: AtomicUsize::new(0),
        });
        let id = cluster.next_member_id();
        let weak: Weak<dyn TaskHandler> = Arc::downgrade(&(handler.clone() as Arc<dyn TaskHandler>));
        cluster.add_member(id.clone(), weak).unwrap();

        let task = ShardTask {
            job_id: JobId::new(),
            job_type: "daily".into(),
            shard: Shard::new(vec![UnitId::from("t-1")]),
        };
        for _ in 0..5 {
            cluster.submit(&id, task.clone()).unwrap();
        }
        while handler.units.load(Ordering::SeqCst) < 5 || cluster.members()[0].in_flight > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;

        cluster.submit(&id, task).unwrap();
        assert!(cluster.tracked_tasks() <= 2);
        cluster.wait_idle().await;
        assert_eq!(cluster.tracked_tasks(), 0);
    }

    #[tokio::test]
    async fn test_submit_to_unknown_member_fails() {
        let cluster = LocalCluster::new();
        let task = ShardTask {
            job_id: JobId::new(),
            job_type: "daily".into(),
            shard: Shard::new(vec![]),
        };
        assert!(cluster.submit(&MemberId("ghost".into()), task).is_err());
    }

    #[tokio::test]
    async fn test_duplicate_member_rejected() {
        let cluster = LocalCluster::new();
        let handler: Arc<dyn TaskHandler> = Arc::new(CountingHandler {
            units: AtomicUsize::new(0),
        });
        let id = cluster.next_member_id();
        cluster.add_member(id.clone(), Arc::downgrade(&handler)).unwrap();
        assert!(cluster.add_member(id, Arc::downgrade(&handler)).is_err());
    }
}
