pub mod config;

use std::sync::Arc;

use async_trait::async_trait;

use crate::core::{Row, Rows, StorageError, Value};
use config::EndpointConfig;

pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// An executable connection to one database endpoint.
///
/// Implementations must be safe for concurrent use by many logical operations
/// (pooled), since the router hands the same handle to every caller routed to
/// a given partition and role.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Lightweight reachability probe.
    async fn ping(&self) -> StorageResult<()>;

    /// Runs a statement and returns the number of affected rows.
    async fn execute(&self, sql: &str, args: &[Value]) -> StorageResult<u64>;

    /// Runs a query expected to produce at most one row.
    async fn query_row(&self, sql: &str, args: &[Value]) -> StorageResult<Option<Row>>;

    /// Runs a query and returns its rows in storage order.
    async fn query_rows(&self, sql: &str, args: &[Value]) -> StorageResult<Rows>;

    /// Releases the underlying connection resources.
    async fn close(&self) -> StorageResult<()>;
}

/// Shared connection handle owned by the topology.
pub type ConnectionHandle = Arc<dyn Executor>;

/// Opens connection handles for endpoints named in a topology description.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, endpoint: &EndpointConfig) -> StorageResult<ConnectionHandle>;
}
