//! Member selection strategies
//!
//! The coordinator asks a [`Scheduler`] which member should run each shard.
//!
//! # Strategies
//!
//! - **RoundRobin**: cycles through members in listing order (default)
//! - **Random**: uniform choice from a seeded xoshiro RNG, reproducible per seed
//! - **LeastLoaded**: member with the fewest in-flight shard tasks

use crate::cluster::{Member, MemberId};
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Picks the member that receives the next shard.
pub trait Scheduler: Send + Sync {
    /// Returns None only when `members` is empty.
    fn select(&self, members: &[Member]) -> Option<MemberId>;
}

/// Strategy names accepted in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum SchedulerKind {
    #[default]
    RoundRobin,
    Random,
    LeastLoaded,
}

impl SchedulerKind {
    /// Build the strategy; `seed` only affects `Random`.
    pub fn build(self, seed: u64) -> Box<dyn Scheduler> {
        match self {
            SchedulerKind::RoundRobin => Box::new(RoundRobinScheduler::new()),
            SchedulerKind::Random => Box::new(RandomScheduler::new(seed)),
            SchedulerKind::LeastLoaded => Box::new(LeastLoadedScheduler),
        }
    }
}

/// Round-robin selection
#[derive(Debug, Default)]
pub struct RoundRobinScheduler {
    next: AtomicUsize,
}

impl RoundRobinScheduler {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Scheduler for RoundRobinScheduler {
    fn select(&self, members: &[Member]) -> Option<MemberId> {
        if members.is_empty() {
            return None;
        }
        let index = self.next.fetch_add(1, Ordering::Relaxed) % members.len();
        Some(members[index].id.clone())
    }
}

/// Seeded random selection
#[derive(Debug)]
pub struct RandomScheduler {
    rng: Mutex<Xoshiro256PlusPlus>,
}

impl RandomScheduler {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(Xoshiro256PlusPlus::seed_from_u64(seed)),
        }
    }
}

impl Scheduler for RandomScheduler {
    fn select(&self, members: &[Member]) -> Option<MemberId> {
        if members.is_empty() {
            return None;
        }
        let index = match self.rng.lock() {
            Ok(mut rng) => rng.gen_range(0..members.len()),
            Err(poisoned) => poisoned.into_inner().gen_range(0..members.len()),
        };
        Some(members[index].id.clone())
    }
}

/// Fewest in-flight tasks wins; ties go to the first listed member.
#[derive(Debug, Default)]
pub struct LeastLoadedScheduler;

impl Scheduler for LeastLoadedScheduler {
    fn select(&self, members: &[Member]) -> Option<MemberId> {
        members
            .iter()
            .enumerate()
            .min_by_key(|(index, member)| (member.in_flight, *index))
            .map(|(_, member)| member.id.clone())
    }
}
