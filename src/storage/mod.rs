pub mod memory;
pub mod postgres;

pub use memory::{MemoryConnector, MemoryExecutor, MemoryNode, ReplicationMode};
pub use postgres::{PgConnector, PgExecutor};
