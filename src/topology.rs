//! Static topology description: partitions, their endpoints and the replica
//! selection strategy.

use std::collections::HashSet;
use std::env;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::connection::config::EndpointConfig;
use crate::core::{Result, ShardError};
use crate::routing::ReplicaSelection;

pub const TOPOLOGY_PATH_ENV: &str = "REPLISHARD_TOPOLOGY";
pub const REPLICA_SELECTION_ENV: &str = "REPLISHARD_REPLICA_SELECTION";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionConfig {
    pub partition_id: usize,
    pub primary: EndpointConfig,
    #[serde(default)]
    pub replicas: Vec<EndpointConfig>,
}

impl PartitionConfig {
    pub fn new(partition_id: usize, primary: EndpointConfig) -> Self {
        Self {
            partition_id,
            primary,
            replicas: Vec::new(),
        }
    }

    pub fn replica(mut self, replica: EndpointConfig) -> Self {
        self.replicas.push(replica);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologyConfig {
    pub partitions: Vec<PartitionConfig>,
    #[serde(default)]
    pub replica_selection: ReplicaSelection,
}

impl TopologyConfig {
    pub fn new(partitions: Vec<PartitionConfig>) -> Self {
        Self {
            partitions,
            replica_selection: ReplicaSelection::default(),
        }
    }

    pub fn replica_selection(mut self, selection: ReplicaSelection) -> Self {
        self.replica_selection = selection;
        self
    }

    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    /// Three local partitions, one replica each, on ports 5440..=5445.
    pub fn local_default() -> Self {
        let partitions = (0..3u16)
            .map(|id| {
                let endpoint = |port: u16| {
                    EndpointConfig::new("postgres", "postgres")
                        .port(port)
                        .database(&format!("shard{}", id))
                };
                PartitionConfig::new(id as usize, endpoint(5440 + id * 2))
                    .replica(endpoint(5441 + id * 2))
            })
            .collect();
        Self::new(partitions)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw)
            .map_err(|e| ShardError::configuration(format!("invalid topology description: {}", e)))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|e| {
            ShardError::configuration(format!("cannot read topology '{}': {}", path.display(), e))
        })?;
        Self::from_json(&raw)
    }

    /// Loads `.env`, then the file named by `REPLISHARD_TOPOLOGY` (or the
    /// local default layout), applying `REPLISHARD_REPLICA_SELECTION` on top.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut config = match env::var(TOPOLOGY_PATH_ENV) {
            Ok(path) => Self::from_file(path)?,
            Err(_) => Self::local_default(),
        };

        if let Ok(raw) = env::var(REPLICA_SELECTION_ENV) {
            config.replica_selection = ReplicaSelection::parse(&raw).ok_or_else(|| {
                ShardError::configuration(format!(
                    "{} must be one of: random, round_robin",
                    REPLICA_SELECTION_ENV
                ))
            })?;
        }

        Ok(config)
    }

    /// Checks that partition ids are exactly `0..N-1` and every endpoint is
    /// usable. An endpoint may appear only once in the whole topology.
    pub fn validate(&self) -> Result<()> {
        let count = self.partitions.len();
        if count == 0 {
            return Err(ShardError::configuration(
                "topology must contain at least one partition",
            ));
        }

        let mut seen = vec![false; count];
        let mut addresses = HashSet::new();
        for partition in &self.partitions {
            let id = partition.partition_id;
            if id >= count {
                return Err(ShardError::configuration(format!(
                    "partition id {} is out of range: ids must be 0..{} without gaps",
                    id,
                    count - 1
                )));
            }
            if seen[id] {
                return Err(ShardError::configuration(format!(
                    "partition id {} appears more than once",
                    id
                )));
            }
            seen[id] = true;

            partition.primary.validate().map_err(|e| {
                ShardError::configuration(format!("partition {} primary: {}", id, e))
            })?;
            if !addresses.insert(partition.primary.address()) {
                return Err(ShardError::configuration(format!(
                    "partition {} primary duplicates endpoint {}",
                    id,
                    partition.primary.address()
                )));
            }

            for (index, replica) in partition.replicas.iter().enumerate() {
                replica.validate().map_err(|e| {
                    ShardError::configuration(format!("partition {} replica {}: {}", id, index, e))
                })?;
                if !addresses.insert(replica.address()) {
                    return Err(ShardError::configuration(format!(
                        "partition {} replica {} duplicates endpoint {}",
                        id,
                        index,
                        replica.address()
                    )));
                }
            }
        }

        Ok(())
    }

    /// Partitions ordered by id.
    pub fn ordered_partitions(&self) -> Vec<&PartitionConfig> {
        let mut ordered = self.partitions.iter().collect::<Vec<_>>();
        ordered.sort_by_key(|partition| partition.partition_id);
        ordered
    }

    /// Every endpoint of the topology, primaries first within each partition.
    pub fn endpoints(&self) -> impl Iterator<Item = &EndpointConfig> {
        self.partitions
            .iter()
            .flat_map(|partition| std::iter::once(&partition.primary).chain(&partition.replicas))
    }
}
