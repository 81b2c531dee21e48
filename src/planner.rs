//! Shard planning
//!
//! Groups unit ids into shards of co-located units, so that one worker visits
//! each physical store once per job.
//!
//! # Algorithm
//!
//! 1. Take the first remaining unit (input order)
//! 2. Ask the co-location lookup for its peers
//! 3. Keep only peers that are still remaining; that set, in input order, is a shard
//! 4. Remove the shard from the remaining set and repeat until empty
//!
//! The output is deterministic for a stable input order and a stable lookup.
//! Every input unit appears in exactly one shard; duplicate input ids are
//! collapsed.

use crate::model::{Shard, UnitId};
use crate::source::Colocation;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Partitions units into co-located shards.
#[derive(Clone)]
pub struct ShardPlanner {
    colocation: Arc<dyn Colocation>,
}

impl ShardPlanner {
    pub fn new(colocation: Arc<dyn Colocation>) -> Self {
        Self { colocation }
    }

    /// Partition `units` into shards.
    pub fn plan(&self, units: &[UnitId]) -> Vec<Shard> {
        let mut position: HashMap<&UnitId, usize> = HashMap::with_capacity(units.len());
        for (index, unit) in units.iter().enumerate() {
            position.entry(unit).or_insert(index);
        }
        let mut remaining: HashSet<&UnitId> = units.iter().collect();
        let mut shards = Vec::new();

        for unit in units {
            if !remaining.remove(unit) {
                continue;
            }

            // The seed unit always belongs, even if the lookup omits it
            let mut members = vec![unit.clone()];
            for peer in self.colocation.colocated_with(unit) {
                if remaining.remove(&peer) {
                    members.push(peer);
                }
            }
            members.sort_by_key(|member| position.get(member).copied().unwrap_or(usize::MAX));

            shards.push(Shard::new(members));
        }

        shards
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Explicit co-location table; unlisted units stand alone.
    struct Table(HashMap<UnitId, Vec<UnitId>>);

    impl Table {
        fn new(groups: &[&[&str]]) -> Self {
            let mut map = HashMap::new();
            for group in groups {
                let ids: Vec<UnitId> = group.iter().map(|id| UnitId::from(*id)).collect();
                for id in &ids {
                    map.insert(id.clone(), ids.clone());
                }
            }
            Self(map)
        }
    }

    impl Colocation for Table {
        fn colocated_with(&self, id: &UnitId) -> Vec<UnitId> {
            self.0.get(id).cloned().unwrap_or_else(|| vec![id.clone()])
        }
    }

    fn ids(raw: &[&str]) -> Vec<UnitId> {
        raw.iter().map(|id| UnitId::from(*id)).collect()
    }

    #[test]
    fn test_colocated_units_share_a_shard() {
        let planner = ShardPlanner::new(Arc::new(Table::new(&[&["1", "2"]])));
        let shards = planner.plan(&ids(&["1", "2", "3", "4"]));

        assert_eq!(shards.len(), 3);
        assert!(shards.contains(&Shard::new(ids(&["1", "2"]))));
        assert!(shards.contains(&Shard::new(ids(&["3"]))));
        assert!(shards.contains(&Shard::new(ids(&["4"]))));
    }

    #[test]
    fn test_union_is_exact() {
        let planner = ShardPlanner::new(Arc::new(Table::new(&[
            &["a", "c", "e"],
            &["b", "f"],
        ])));
        let input = ids(&["a", "b", "c", "d", "e", "f", "g"]);
        let shards = planner.plan(&input);

        let mut seen: Vec<UnitId> = shards.iter().flat_map(|s| s.units.clone()).collect();
        seen.sort();
        let mut expected = input.clone();
        expected.sort();
        assert_eq!(seen, expected);
    }

    #[test]
    fn test_peers_outside_request_are_ignored() {
        // "2" is co-located with "1" but was not requested
        let planner = ShardPlanner::new(Arc::new(Table::new(&[&["1", "2", "9"]])));
        let shards = planner.plan(&ids(&["1", "9"]));
        assert_eq!(shards, vec![Shard::new(ids(&["1", "9"]))]);
    }

    #[test]
    fn test_lookup_missing_self_still_places_unit() {
        struct Forgetful;
        impl Colocation for Forgetful {
            fn colocated_with(&self, _id: &UnitId) -> Vec<UnitId> {
                Vec::new()
            }
        }

        let planner = ShardPlanner::new(Arc::new(Forgetful));
        let shards = planner.plan(&ids(&["x", "y"]));
        assert_eq!(shards, vec![Shard::new(ids(&["x"])), Shard::new(ids(&["y"]))]);
    }

    #[test]
    fn test_duplicates_collapsed() {
        let planner = ShardPlanner::new(Arc::new(Table::new(&[])));
        let shards = planner.plan(&ids(&["x", "x", "y"]));
        assert_eq!(shards, vec![Shard::new(ids(&["x"])), Shard::new(ids(&["y"]))]);
    }

    #[test]
    fn test_deterministic() {
        let planner = ShardPlanner::new(Arc::new(Table::new(&[&["3", "1"], &["2", "5"]])));
        let input = ids(&["1", "2", "3", "4", "5"]);
        assert_eq!(planner.plan(&input), planner.plan(&input));
        assert_eq!(
            planner.plan(&input),
            vec![
                Shard::new(ids(&["1", "3"])),
                Shard::new(ids(&["2", "5"])),
                Shard::new(ids(&["4"])),
            ]
        );
    }

    #[test]
    fn test_empty_input() {
        let planner = ShardPlanner::new(Arc::new(Table::new(&[])));
        assert!(planner.plan(&[]).is_empty());
    }
}
