//! In-process storage nodes speaking the `users` statements of the repository.
//!
//! Each endpoint of a topology maps to one [`MemoryNode`]. Primaries forward
//! their table to follower nodes either after every write or on
//! [`MemoryNode::flush_replication`], which is how replica lag is modelled.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex as AsyncMutex, RwLock};
use tracing::{debug, trace};

use crate::connection::config::EndpointConfig;
use crate::connection::{ConnectionHandle, Connector, Executor, StorageResult};
use crate::core::{Row, Rows, StorageError, Value};
use crate::repository::statements;
use crate::topology::TopologyConfig;

/// When a primary ships its writes to followers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplicationMode {
    /// After every successful write.
    #[default]
    Immediate,
    /// Only on an explicit [`MemoryNode::flush_replication`].
    Manual,
}

#[derive(Debug, Clone)]
struct StoredUser {
    id: i64,
    user_id: String,
    name: String,
    email: String,
    created_at: DateTime<Utc>,
}

impl StoredUser {
    fn to_row(&self) -> Row {
        vec![
            Value::Integer(self.id),
            Value::Text(self.user_id.clone()),
            Value::Text(self.name.clone()),
            Value::Text(self.email.clone()),
            Value::Timestamp(self.created_at),
        ]
    }
}

#[derive(Debug, Clone, Default)]
struct UserTable {
    rows: BTreeMap<i64, StoredUser>,
    by_key: HashMap<String, i64>,
    last_id: i64,
}

impl UserTable {
    fn insert(&mut self, user_id: String, name: String, email: String) -> StorageResult<Row> {
        if self.by_key.contains_key(&user_id) {
            return Err(StorageError::Query(format!(
                "duplicate key value violates unique constraint \"users_user_id_key\": {}",
                user_id
            )));
        }

        self.last_id += 1;
        let user = StoredUser {
            id: self.last_id,
            user_id: user_id.clone(),
            name,
            email,
            created_at: Utc::now(),
        };
        let returning = vec![Value::Integer(user.id), Value::Timestamp(user.created_at)];

        self.by_key.insert(user_id, user.id);
        self.rows.insert(user.id, user);
        Ok(returning)
    }

    fn get(&self, user_id: &str) -> Option<&StoredUser> {
        self.by_key.get(user_id).and_then(|id| self.rows.get(id))
    }

    fn update(&mut self, user_id: &str, name: String, email: String) -> u64 {
        let Some(id) = self.by_key.get(user_id) else {
            return 0;
        };
        match self.rows.get_mut(id) {
            Some(user) => {
                user.name = name;
                user.email = email;
                1
            }
            None => 0,
        }
    }

    fn delete(&mut self, user_id: &str) -> u64 {
        match self.by_key.remove(user_id) {
            Some(id) => self.rows.remove(&id).map_or(0, |_| 1),
            None => 0,
        }
    }

    /// Newest first; ties on the timestamp break by id.
    fn newest_first(&self) -> Vec<Row> {
        let mut users = self.rows.values().collect::<Vec<_>>();
        users.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        users.into_iter().map(StoredUser::to_row).collect()
    }
}

/// One simulated database server.
#[derive(Debug)]
pub struct MemoryNode {
    name: String,
    table: RwLock<UserTable>,
    mode: ReplicationMode,
    followers: Mutex<Vec<Arc<MemoryNode>>>,
    /// Held for a whole flush so followers receive snapshots in the order taken.
    replication: AsyncMutex<()>,

    unreachable: AtomicBool,
    fail_statements: AtomicBool,
    fail_close: AtomicBool,
    latency_ms: AtomicU64,

    open_handles: AtomicUsize,
    statements: AtomicU64,
}

impl MemoryNode {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Self::with_mode(name, ReplicationMode::Immediate)
    }

    pub fn with_mode(name: impl Into<String>, mode: ReplicationMode) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            table: RwLock::new(UserTable::default()),
            mode,
            followers: Mutex::new(Vec::new()),
            replication: AsyncMutex::new(()),
            unreachable: AtomicBool::new(false),
            fail_statements: AtomicBool::new(false),
            fail_close: AtomicBool::new(false),
            latency_ms: AtomicU64::new(0),
            open_handles: AtomicUsize::new(0),
            statements: AtomicU64::new(0),
        })
    }

    /// Opens a new handle onto this node.
    pub fn executor(self: &Arc<Self>) -> ConnectionHandle {
        self.open_handles.fetch_add(1, Ordering::SeqCst);
        Arc::new(MemoryExecutor {
            node: Arc::clone(self),
            closed: AtomicBool::new(false),
        })
    }

    /// Registers `follower` to receive this node's writes.
    pub fn add_follower(&self, follower: Arc<MemoryNode>) {
        if let Ok(mut followers) = self.followers.lock() {
            followers.push(follower);
        }
    }

    /// Copies this node's table onto every follower.
    pub async fn flush_replication(&self) {
        let followers = match self.followers.lock() {
            Ok(followers) => followers.clone(),
            Err(_) => return,
        };
        if followers.is_empty() {
            return;
        }

        let _flush = self.replication.lock().await;
        let snapshot = self.table.read().await.clone();
        for follower in &followers {
            *follower.table.write().await = snapshot.clone();
        }
        trace!(node = %self.name, followers = followers.len(), "replicated");
    }

    pub fn set_unreachable(&self, on: bool) {
        self.unreachable.store(on, Ordering::SeqCst);
    }

    pub fn set_fail_statements(&self, on: bool) {
        self.fail_statements.store(on, Ordering::SeqCst);
    }

    pub fn set_fail_close(&self, on: bool) {
        self.fail_close.store(on, Ordering::SeqCst);
    }

    /// Delay applied before every ping and statement.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Handles opened on this node and not yet closed.
    pub fn open_handles(&self) -> usize {
        self.open_handles.load(Ordering::SeqCst)
    }

    /// Statements executed successfully or not, pings excluded.
    pub fn statement_count(&self) -> u64 {
        self.statements.load(Ordering::SeqCst)
    }

    pub async fn user_count(&self) -> usize {
        self.table.read().await.rows.len()
    }

    pub async fn contains(&self, user_id: &str) -> bool {
        self.table.read().await.by_key.contains_key(user_id)
    }

    async fn enter(&self) -> StorageResult<()> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(StorageError::Unreachable(format!(
                "connection refused by {}",
                self.name
            )));
        }
        Ok(())
    }

    async fn after_write(&self) {
        if self.mode == ReplicationMode::Immediate {
            self.flush_replication().await;
        }
    }

    async fn execute(&self, sql: &str, args: &[Value]) -> StorageResult<u64> {
        let affected = match sql {
            statements::CREATE_USERS_TABLE => 0,
            statements::UPDATE_USER => {
                let (user_id, name, email) =
                    (text_arg(args, 0)?, text_arg(args, 1)?, text_arg(args, 2)?);
                self.table.write().await.update(&user_id, name, email)
            }
            statements::DELETE_USER => {
                let user_id = text_arg(args, 0)?;
                self.table.write().await.delete(&user_id)
            }
            other => return Err(unsupported(other)),
        };
        if affected > 0 {
            self.after_write().await;
        }
        Ok(affected)
    }

    async fn query_row(&self, sql: &str, args: &[Value]) -> StorageResult<Option<Row>> {
        match sql {
            statements::INSERT_USER => {
                let (user_id, name, email) =
                    (text_arg(args, 0)?, text_arg(args, 1)?, text_arg(args, 2)?);
                let row = self.table.write().await.insert(user_id, name, email)?;
                self.after_write().await;
                Ok(Some(row))
            }
            statements::SELECT_USER => {
                let user_id = text_arg(args, 0)?;
                Ok(self.table.read().await.get(&user_id).map(StoredUser::to_row))
            }
            statements::COUNT_USERS => {
                let count = self.table.read().await.rows.len() as i64;
                Ok(Some(vec![Value::Integer(count)]))
            }
            other => Err(unsupported(other)),
        }
    }

    async fn query_rows(&self, sql: &str, _args: &[Value]) -> StorageResult<Rows> {
        match sql {
            statements::SELECT_ALL_USERS => Ok(self.table.read().await.newest_first().into()),
            other => Err(unsupported(other)),
        }
    }
}

fn text_arg(args: &[Value], index: usize) -> StorageResult<String> {
    match args.get(index) {
        Some(Value::Text(s)) => Ok(s.clone()),
        Some(other) => Err(StorageError::Query(format!(
            "argument ${} must be TEXT, got {}",
            index + 1,
            other.type_name()
        ))),
        None => Err(StorageError::Query(format!(
            "missing argument ${}",
            index + 1
        ))),
    }
}

fn unsupported(sql: &str) -> StorageError {
    StorageError::Query(format!("unsupported statement: {}", sql))
}

/// A handle onto a [`MemoryNode`].
#[derive(Debug)]
pub struct MemoryExecutor {
    node: Arc<MemoryNode>,
    closed: AtomicBool,
}

impl MemoryExecutor {
    pub fn node(&self) -> &Arc<MemoryNode> {
        &self.node
    }

    async fn statement(&self) -> StorageResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StorageError::Closed);
        }
        self.node.statements.fetch_add(1, Ordering::SeqCst);
        self.node.enter().await?;
        if self.node.fail_statements.load(Ordering::SeqCst) {
            return Err(StorageError::Query(format!(
                "statement rejected by {}",
                self.node.name
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Executor for MemoryExecutor {
    async fn ping(&self) -> StorageResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StorageError::Closed);
        }
        self.node.enter().await
    }

    async fn execute(&self, sql: &str, args: &[Value]) -> StorageResult<u64> {
        self.statement().await?;
        self.node.execute(sql, args).await
    }

    async fn query_row(&self, sql: &str, args: &[Value]) -> StorageResult<Option<Row>> {
        self.statement().await?;
        self.node.query_row(sql, args).await
    }

    async fn query_rows(&self, sql: &str, args: &[Value]) -> StorageResult<Rows> {
        self.statement().await?;
        self.node.query_rows(sql, args).await
    }

    async fn close(&self) -> StorageResult<()> {
        if self.node.fail_close.load(Ordering::SeqCst) {
            return Err(StorageError::Query(format!(
                "close rejected by {}",
                self.node.name
            )));
        }
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.node.open_handles.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// Resolves endpoints to memory nodes by `host:port/database`.
#[derive(Debug, Default)]
pub struct MemoryConnector {
    nodes: HashMap<String, Arc<MemoryNode>>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// One node per endpoint of `config`; each primary replicates to its
    /// partition's replicas according to `mode`.
    pub fn for_topology(config: &TopologyConfig, mode: ReplicationMode) -> Self {
        let mut connector = Self::new();
        for partition in config.ordered_partitions() {
            let primary = connector.register(&partition.primary, mode);
            for replica in &partition.replicas {
                let follower = connector.register(replica, mode);
                primary.add_follower(follower);
            }
        }
        debug!(nodes = connector.nodes.len(), ?mode, "memory topology ready");
        connector
    }

    /// Adds a node serving `endpoint`, replacing any previous one.
    pub fn register(&mut self, endpoint: &EndpointConfig, mode: ReplicationMode) -> Arc<MemoryNode> {
        let node = MemoryNode::with_mode(endpoint.address(), mode);
        self.nodes.insert(endpoint.address(), Arc::clone(&node));
        node
    }

    pub fn node(&self, endpoint: &EndpointConfig) -> Option<Arc<MemoryNode>> {
        self.nodes.get(&endpoint.address()).cloned()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Arc<MemoryNode>> {
        self.nodes.values()
    }

    /// Replicates every node that has followers.
    pub async fn flush_replication(&self) {
        for node in self.nodes.values() {
            node.flush_replication().await;
        }
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, endpoint: &EndpointConfig) -> StorageResult<ConnectionHandle> {
        let node = self.nodes.get(&endpoint.address()).ok_or_else(|| {
            StorageError::Unreachable(format!("no server listening at {}", endpoint.address()))
        })?;
        Ok(node.executor())
    }
}
