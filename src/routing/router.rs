use std::sync::{Arc, RwLock};

use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::hash::partition_for_key;
use super::partition::Partition;
use super::selector::ReplicaSelector;
use crate::connection::config::EndpointConfig;
use crate::connection::{ConnectionHandle, Connector};
use crate::core::{CloseFailure, Result, Role, ShardError, StorageError};
use crate::topology::TopologyConfig;

/// What the caller intends to do with a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Intent {
    Write,
    Read,
}

/// A resolved connection for one key.
#[derive(Clone)]
pub struct Route {
    pub partition: usize,
    pub role: Role,
    pub handle: ConnectionHandle,
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("partition", &self.partition)
            .field("role", &self.role)
            .finish()
    }
}

struct Opened {
    partition: usize,
    role: Role,
    handle: ConnectionHandle,
}

/// Maps shard keys to partitions and hands out primary or replica handles.
///
/// The partition list is an immutable snapshot taken at construction. The
/// lock around it only separates readers from [`TopologyRouter::shutdown`];
/// hashing a key never takes it.
pub struct TopologyRouter {
    partition_count: usize,
    partitions: RwLock<Option<Arc<[Partition]>>>,
    selector: Box<dyn ReplicaSelector>,
}

impl TopologyRouter {
    /// Opens and probes every endpoint of `config`, using the replica
    /// selection strategy the description names.
    pub async fn connect(config: &TopologyConfig, connector: &dyn Connector) -> Result<Self> {
        let selector = config.replica_selection.build(config.partition_count());
        Self::connect_with_selector(config, connector, selector).await
    }

    /// Opens and probes every endpoint of `config` with a caller-supplied selector.
    ///
    /// Any failure closes the handles already opened by this attempt and
    /// returns a connectivity error naming the partition and role.
    pub async fn connect_with_selector(
        config: &TopologyConfig,
        connector: &dyn Connector,
        selector: Box<dyn ReplicaSelector>,
    ) -> Result<Self> {
        config.validate()?;

        let mut opened = Vec::new();
        let mut partitions = Vec::with_capacity(config.partition_count());

        for partition_config in config.ordered_partitions() {
            let id = partition_config.partition_id;

            let primary =
                match open_endpoint(connector, id, Role::Primary, &partition_config.primary, &mut opened)
                    .await
                {
                    Ok(handle) => handle,
                    Err(err) => {
                        release(opened).await;
                        return Err(err);
                    }
                };

            let mut replicas = Vec::with_capacity(partition_config.replicas.len());
            for (index, endpoint) in partition_config.replicas.iter().enumerate() {
                match open_endpoint(connector, id, Role::Replica(index), endpoint, &mut opened).await {
                    Ok(handle) => replicas.push(handle),
                    Err(err) => {
                        release(opened).await;
                        return Err(err);
                    }
                }
            }

            partitions.push(Partition::new(id, primary, replicas));
        }

        info!(
            partitions = partitions.len(),
            connections = opened.len(),
            "connected to all partitions"
        );

        Self::from_partitions(partitions, selector)
    }

    /// Builds a router over already opened partitions.
    ///
    /// Partition ids must be exactly `0..N-1`; the declared order is irrelevant.
    pub fn from_partitions(
        mut partitions: Vec<Partition>,
        selector: Box<dyn ReplicaSelector>,
    ) -> Result<Self> {
        if partitions.is_empty() {
            return Err(ShardError::configuration(
                "topology must contain at least one partition",
            ));
        }

        partitions.sort_by_key(Partition::id);
        for (expected, partition) in partitions.iter().enumerate() {
            if partition.id() != expected {
                return Err(ShardError::configuration(format!(
                    "partition ids must be 0..{} without gaps or duplicates, found {} at position {}",
                    partitions.len() - 1,
                    partition.id(),
                    expected
                )));
            }
        }

        Ok(Self {
            partition_count: partitions.len(),
            partitions: RwLock::new(Some(partitions.into())),
            selector,
        })
    }

    pub fn partition_count(&self) -> usize {
        self.partition_count
    }

    /// Partition index for `key`. Pure and lock-free.
    pub fn partition_for(&self, key: &str) -> usize {
        partition_for_key(key, self.partition_count)
    }

    /// Resolves the connection serving `intent` for `key`.
    ///
    /// Writes go to the primary. Reads go to a replica chosen by the selector,
    /// or to the primary when the partition has no replicas.
    pub fn route(&self, key: &str, intent: Intent) -> Result<Route> {
        let partition_id = self.partition_for(key);
        let partitions = self.snapshot()?;
        let partition = &partitions[partition_id];

        let route = match intent {
            Intent::Write => primary_route(partition),
            Intent::Read if partition.replica_count() == 0 => primary_route(partition),
            Intent::Read => {
                let index = self
                    .selector
                    .select(partition_id, partition.replica_count())
                    .min(partition.replica_count() - 1);
                Route {
                    partition: partition_id,
                    role: Role::Replica(index),
                    handle: partition.replicas()[index].clone(),
                }
            }
        };

        debug!(key, partition = route.partition, role = %route.role, "routed");
        Ok(route)
    }

    pub fn connection_for(&self, key: &str, intent: Intent) -> Result<ConnectionHandle> {
        self.route(key, intent).map(|route| route.handle)
    }

    pub fn primary(&self, key: &str) -> Result<ConnectionHandle> {
        self.connection_for(key, Intent::Write)
    }

    pub fn replica(&self, key: &str) -> Result<ConnectionHandle> {
        self.connection_for(key, Intent::Read)
    }

    /// Direct lookup, failing with out-of-range unless `0 <= id < N`.
    pub fn partition_by_id(&self, id: i64) -> Result<Partition> {
        let index = usize::try_from(id)
            .ok()
            .filter(|index| *index < self.partition_count)
            .ok_or(ShardError::OutOfRange {
                id,
                count: self.partition_count,
            })?;
        Ok(self.snapshot()?[index].clone())
    }

    /// Copy of every partition ordered by id, for fan-out operations.
    pub fn all_partitions(&self) -> Result<Vec<Partition>> {
        Ok(self.snapshot()?.to_vec())
    }

    pub fn is_shut_down(&self) -> bool {
        self.partitions
            .read()
            .map(|partitions| partitions.is_none())
            .unwrap_or(true)
    }

    /// Closes every primary and replica handle, reporting all close failures.
    ///
    /// Must not be called while operations are still in flight. Calling it
    /// again after it has run is a no-op.
    pub async fn shutdown(&self) -> Result<()> {
        let detached = {
            let mut partitions = self.partitions.write()?;
            partitions.take()
        };

        let Some(partitions) = detached else {
            debug!("topology already shut down");
            return Ok(());
        };

        let mut failures = Vec::new();
        for partition in partitions.iter() {
            if let Err(error) = partition.primary().close().await {
                failures.push(CloseFailure {
                    partition: partition.id(),
                    role: Role::Primary,
                    error,
                });
            }
            for (index, replica) in partition.replicas().iter().enumerate() {
                if let Err(error) = replica.close().await {
                    failures.push(CloseFailure {
                        partition: partition.id(),
                        role: Role::Replica(index),
                        error,
                    });
                }
            }
        }

        if failures.is_empty() {
            info!(partitions = partitions.len(), "topology shut down");
            Ok(())
        } else {
            for failure in &failures {
                warn!(partition = failure.partition, role = %failure.role, error = %failure.error, "close failed");
            }
            Err(ShardError::Shutdown { failures })
        }
    }

    fn snapshot(&self) -> Result<Arc<[Partition]>> {
        self.partitions.read()?.clone().ok_or(ShardError::Closed)
    }
}

fn primary_route(partition: &Partition) -> Route {
    Route {
        partition: partition.id(),
        role: Role::Primary,
        handle: partition.primary().clone(),
    }
}

async fn open_endpoint(
    connector: &dyn Connector,
    partition: usize,
    role: Role,
    endpoint: &EndpointConfig,
    opened: &mut Vec<Opened>,
) -> Result<ConnectionHandle> {
    let limit = endpoint.connect_timeout;
    let connectivity = |source: StorageError| ShardError::Connectivity {
        partition,
        role,
        source,
    };

    let handle = match timeout(limit, connector.connect(endpoint)).await {
        Ok(Ok(handle)) => handle,
        Ok(Err(source)) => return Err(connectivity(source)),
        Err(_) => return Err(connectivity(StorageError::Timeout(limit))),
    };
    opened.push(Opened {
        partition,
        role,
        handle: handle.clone(),
    });

    match timeout(limit, handle.ping()).await {
        Ok(Ok(())) => {}
        Ok(Err(source)) => return Err(connectivity(source)),
        Err(_) => return Err(connectivity(StorageError::Timeout(limit))),
    }

    debug!(partition, role = %role, endpoint = %endpoint.to_url(), "connection opened");
    Ok(handle)
}

async fn release(opened: Vec<Opened>) {
    for Opened {
        partition,
        role,
        handle,
    } in opened
    {
        if let Err(error) = handle.close().await {
            warn!(partition, role = %role, error = %error, "failed to release connection after aborted construction");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::RoundRobinSelector;
    use crate::storage::memory::MemoryNode;

    fn partition(id: usize, replicas: usize) -> Partition {
        let primary: ConnectionHandle = MemoryNode::new(format!("p{}", id)).executor();
        let replicas = (0..replicas)
            .map(|r| MemoryNode::new(format!("p{}-r{}", id, r)).executor() as ConnectionHandle)
            .collect();
        Partition::new(id, primary, replicas)
    }

    fn router(replicas: usize) -> TopologyRouter {
        TopologyRouter::from_partitions(
            (0..3).map(|id| partition(id, replicas)).collect(),
            Box::new(RoundRobinSelector::new(3)),
        )
        .unwrap()
    }

    #[test]
    fn test_from_partitions_sorts_and_validates_ids() {
        let router = TopologyRouter::from_partitions(
            vec![partition(2, 0), partition(0, 0), partition(1, 0)],
            Box::new(RoundRobinSelector::new(3)),
        )
        .unwrap();
        let ids = router
            .all_partitions()
            .unwrap()
            .iter()
            .map(Partition::id)
            .collect::<Vec<_>>();
        assert_eq!(ids, vec![0, 1, 2]);

        let gap = TopologyRouter::from_partitions(
            vec![partition(0, 0), partition(2, 0)],
            Box::new(RoundRobinSelector::new(3)),
        );
        assert!(matches!(gap, Err(ShardError::Configuration(_))));
    }

    #[test]
    fn test_write_routes_to_primary() {
        let router = router(2);
        let route = router.route("user_100", Intent::Write).unwrap();
        assert_eq!(route.partition, 0);
        assert_eq!(route.role, Role::Primary);
    }

    #[test]
    fn test_read_rotates_through_replicas() {
        let router = router(2);
        let roles = (0..4)
            .map(|_| router.route("user_100", Intent::Read).unwrap().role)
            .collect::<Vec<_>>();
        assert_eq!(
            roles,
            vec![
                Role::Replica(0),
                Role::Replica(1),
                Role::Replica(0),
                Role::Replica(1)
            ]
        );
    }

    #[test]
    fn test_read_without_replicas_falls_back_to_primary() {
        let router = router(0);
        let route = router.route("user_100", Intent::Read).unwrap();
        assert_eq!(route.role, Role::Primary);
    }

    #[test]
    fn test_partition_by_id_bounds() {
        let router = router(0);
        assert!(matches!(
            router.partition_by_id(-1),
            Err(ShardError::OutOfRange { id: -1, count: 3 })
        ));
        assert!(matches!(
            router.partition_by_id(3),
            Err(ShardError::OutOfRange { id: 3, count: 3 })
        ));
        for id in 0..3 {
            assert_eq!(router.partition_by_id(id).unwrap().id(), id as usize);
        }
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent_and_closes_access() {
        let router = router(1);
        router.shutdown().await.unwrap();
        assert!(router.is_shut_down());
        assert!(matches!(router.primary("k"), Err(ShardError::Closed)));
        assert!(matches!(router.all_partitions(), Err(ShardError::Closed)));
        // Hashing does not depend on the partition list.
        assert_eq!(router.partition_for("user_100"), 0);

        router.shutdown().await.unwrap();
    }
}
