// ============================================================================
// replishard Library
// ============================================================================

pub mod connection;
pub mod context;
pub mod core;
pub mod repository;
pub mod routing;
pub mod storage;
pub mod topology;

// Re-export main types for convenience
pub use connection::{ConnectionHandle, Connector, Executor, config::EndpointConfig};
pub use context::{CancelHandle, CancelToken, OpContext, cancel_pair};
pub use core::{CloseFailure, Result, Role, Row, Rows, ShardError, StorageError, Value};
pub use repository::{NewUser, User, UserRepository};
pub use routing::{
    Intent, Partition, RandomSelector, ReplicaSelection, ReplicaSelector, RoundRobinSelector,
    Route, TopologyRouter, partition_for_key,
};
pub use topology::{PartitionConfig, TopologyConfig};

// ============================================================================
// Quick start
// ============================================================================

/// Connects a router and a user repository over `config`.
///
/// The router owns every connection; call [`TopologyRouter::shutdown`] on
/// `repository.router()` once no operation is in flight.
///
/// # Examples
///
/// ```
/// use replishard::storage::{MemoryConnector, ReplicationMode};
/// use replishard::{NewUser, OpContext, TopologyConfig};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = TopologyConfig::local_default();
/// let connector = MemoryConnector::for_topology(&config, ReplicationMode::Immediate);
/// let users = replishard::connect(&config, &connector).await?;
///
/// let ctx = OpContext::background();
/// users.ensure_schema(&ctx).await?;
/// users.create(&ctx, &NewUser::new("user_100", "Ada", "ada@example.com")).await?;
///
/// let user = users.get(&ctx, "user_100").await?;
/// assert_eq!(users.router().partition_for("user_100"), 0);
/// println!("{} lives on partition 0", user.name);
///
/// users.router().shutdown().await?;
/// # Ok(())
/// # }
/// ```
pub async fn connect(config: &TopologyConfig, connector: &dyn Connector) -> Result<UserRepository> {
    let router = TopologyRouter::connect(config, connector).await?;
    Ok(UserRepository::new(std::sync::Arc::new(router)))
}
