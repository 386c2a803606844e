use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Picks which replica of a partition serves a read.
///
/// Called only when the partition has at least one replica; must return an
/// index in `[0, replica_count)`.
pub trait ReplicaSelector: Send + Sync + fmt::Debug {
    fn select(&self, partition_id: usize, replica_count: usize) -> usize;
}

/// Uniform random choice, independent per call.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomSelector;

impl ReplicaSelector for RandomSelector {
    fn select(&self, _partition_id: usize, replica_count: usize) -> usize {
        rand::thread_rng().gen_range(0..replica_count)
    }
}

/// Cycles through replicas with one counter per partition.
#[derive(Debug)]
pub struct RoundRobinSelector {
    counters: Vec<AtomicUsize>,
}

impl RoundRobinSelector {
    pub fn new(partition_count: usize) -> Self {
        Self {
            counters: (0..partition_count).map(|_| AtomicUsize::new(0)).collect(),
        }
    }
}

impl ReplicaSelector for RoundRobinSelector {
    fn select(&self, partition_id: usize, replica_count: usize) -> usize {
        let ticket = self
            .counters
            .get(partition_id)
            .map(|counter| counter.fetch_add(1, Ordering::Relaxed))
            .unwrap_or(0);
        ticket % replica_count
    }
}

/// Replica selection strategy named in the topology description.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReplicaSelection {
    #[default]
    Random,
    RoundRobin,
}

impl ReplicaSelection {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "random" => Some(Self::Random),
            "round_robin" | "round-robin" | "roundrobin" => Some(Self::RoundRobin),
            _ => None,
        }
    }

    pub fn build(self, partition_count: usize) -> Box<dyn ReplicaSelector> {
        match self {
            Self::Random => Box::new(RandomSelector),
            Self::RoundRobin => Box::new(RoundRobinSelector::new(partition_count)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_selector_is_roughly_uniform() {
        let selector = RandomSelector;
        let mut counts = [0usize; 4];
        for _ in 0..8000 {
            counts[selector.select(0, 4)] += 1;
        }
        // Expected 2000 each; the bound is loose enough to never flake.
        for count in counts {
            assert!(count > 1500 && count < 2500, "skewed counts: {:?}", counts);
        }
    }

    #[test]
    fn test_round_robin_counters_are_per_partition() {
        let selector = RoundRobinSelector::new(2);
        assert_eq!(selector.select(0, 3), 0);
        assert_eq!(selector.select(0, 3), 1);
        assert_eq!(selector.select(1, 3), 0);
        assert_eq!(selector.select(0, 3), 2);
        assert_eq!(selector.select(0, 3), 0);
    }

    #[test]
    fn test_parse_selection() {
        assert_eq!(ReplicaSelection::parse("Random"), Some(ReplicaSelection::Random));
        assert_eq!(
            ReplicaSelection::parse("round-robin"),
            Some(ReplicaSelection::RoundRobin)
        );
        assert_eq!(ReplicaSelection::parse("sticky"), None);
    }
}
