use std::fmt;

use crate::connection::ConnectionHandle;

/// One independently operated cluster: a writable primary and its read replicas.
///
/// Cloning shares the underlying handles; the topology remains their owner.
#[derive(Clone)]
pub struct Partition {
    id: usize,
    primary: ConnectionHandle,
    replicas: Vec<ConnectionHandle>,
}

impl Partition {
    pub fn new(id: usize, primary: ConnectionHandle, replicas: Vec<ConnectionHandle>) -> Self {
        Self {
            id,
            primary,
            replicas,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn primary(&self) -> &ConnectionHandle {
        &self.primary
    }

    pub fn replicas(&self) -> &[ConnectionHandle] {
        &self.replicas
    }

    pub fn replica_count(&self) -> usize {
        self.replicas.len()
    }

    /// First replica in declaration order, or the primary when there are none.
    pub fn first_replica_or_primary(&self) -> &ConnectionHandle {
        self.replicas.first().unwrap_or(&self.primary)
    }
}

impl fmt::Debug for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Partition")
            .field("id", &self.id)
            .field("replicas", &self.replicas.len())
            .finish()
    }
}
