//! Key-to-partition routing and role-aware connection selection.

pub mod hash;
pub mod partition;
pub mod router;
pub mod selector;

pub use hash::{fnv1a_32, partition_for_key};
pub use partition::Partition;
pub use router::{Intent, Route, TopologyRouter};
pub use selector::{RandomSelector, ReplicaSelection, ReplicaSelector, RoundRobinSelector};
