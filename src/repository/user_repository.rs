use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info};

use super::models::{NewUser, User, integer, timestamp};
use super::statements;
use crate::context::OpContext;
use crate::core::{Result, ShardError, StorageError, Value};
use crate::routing::{Intent, Route, TopologyRouter};

/// CRUD over users sharded by `user_id`.
///
/// Single-key operations touch exactly one partition. [`get_all`] and
/// [`count_per_partition`] fan out over every partition in id order and
/// stop at the first failure.
///
/// [`get_all`]: UserRepository::get_all
/// [`count_per_partition`]: UserRepository::count_per_partition
#[derive(Clone)]
pub struct UserRepository {
    router: Arc<TopologyRouter>,
}

impl UserRepository {
    pub fn new(router: Arc<TopologyRouter>) -> Self {
        Self { router }
    }

    pub fn router(&self) -> &Arc<TopologyRouter> {
        &self.router
    }

    /// Creates the `users` table on every primary if it is missing.
    pub async fn ensure_schema(&self, ctx: &OpContext) -> Result<()> {
        for partition in self.router.all_partitions()? {
            ctx.check()?;
            let id = partition.id();
            ctx.run(async {
                partition
                    .primary()
                    .execute(statements::CREATE_USERS_TABLE, &[])
                    .await
                    .map_err(|source| write_failed(id, source))
            })
            .await?;
        }
        info!(
            partitions = self.router.partition_count(),
            "users schema ready"
        );
        Ok(())
    }

    /// Inserts `user` on the primary of its partition and returns the stored record.
    pub async fn create(&self, ctx: &OpContext, user: &NewUser) -> Result<User> {
        let route = self.route(&user.user_id, Intent::Write)?;
        let partition = route.partition;
        let args = [
            Value::from(user.user_id.as_str()),
            Value::from(user.name.as_str()),
            Value::from(user.email.as_str()),
        ];

        let row = ctx
            .run(async {
                route
                    .handle
                    .query_row(statements::INSERT_USER, &args)
                    .await
                    .map_err(|source| write_failed(partition, source))
            })
            .await?
            .ok_or_else(|| {
                write_failed(
                    partition,
                    StorageError::Decode("insert returned no row".to_string()),
                )
            })?;

        let (id, created_at) = match row.as_slice() {
            [id, created_at] => (
                integer(id, "id").map_err(|source| write_failed(partition, source))?,
                timestamp(created_at, "created_at")
                    .map_err(|source| write_failed(partition, source))?,
            ),
            _ => {
                return Err(write_failed(
                    partition,
                    StorageError::Decode(format!("insert returned {} columns", row.len())),
                ));
            }
        };

        Ok(User {
            id,
            user_id: user.user_id.clone(),
            name: user.name.clone(),
            email: user.email.clone(),
            created_at,
        })
    }

    /// Reads from a replica of the key's partition. May lag behind recent writes.
    pub async fn get(&self, ctx: &OpContext, user_id: &str) -> Result<User> {
        self.fetch(ctx, user_id, Intent::Read).await
    }

    /// Reads from the primary of the key's partition.
    pub async fn get_strong(&self, ctx: &OpContext, user_id: &str) -> Result<User> {
        self.fetch(ctx, user_id, Intent::Write).await
    }

    /// Replaces `name` and `email` of the user keyed by `user.user_id`.
    pub async fn update(&self, ctx: &OpContext, user: &NewUser) -> Result<()> {
        let args = [
            Value::from(user.user_id.as_str()),
            Value::from(user.name.as_str()),
            Value::from(user.email.as_str()),
        ];
        self.write(ctx, &user.user_id, statements::UPDATE_USER, &args)
            .await
    }

    pub async fn delete(&self, ctx: &OpContext, user_id: &str) -> Result<()> {
        self.write(ctx, user_id, statements::DELETE_USER, &[Value::from(user_id)])
            .await
    }

    /// Every user, partition by partition, newest first within each partition.
    ///
    /// Reads go to the first replica of each partition, or its primary when
    /// it has none. A failing partition discards everything read so far.
    pub async fn get_all(&self, ctx: &OpContext) -> Result<Vec<User>> {
        let mut users = Vec::new();
        for partition in self.router.all_partitions()? {
            ctx.check()?;
            let id = partition.id();
            let rows = ctx
                .run(async {
                    partition
                        .first_replica_or_primary()
                        .query_rows(statements::SELECT_ALL_USERS, &[])
                        .await
                        .map_err(|source| read_failed(id, source))
                })
                .await?;

            for row in rows {
                users.push(User::from_row(row).map_err(|source| read_failed(id, source))?);
            }
        }
        Ok(users)
    }

    /// Number of users stored on each partition's primary, keyed by partition id.
    pub async fn count_per_partition(&self, ctx: &OpContext) -> Result<BTreeMap<usize, u64>> {
        let mut counts = BTreeMap::new();
        for partition in self.router.all_partitions()? {
            ctx.check()?;
            let id = partition.id();
            let row = ctx
                .run(async {
                    partition
                        .primary()
                        .query_row(statements::COUNT_USERS, &[])
                        .await
                        .map_err(|source| read_failed(id, source))
                })
                .await?;

            let count = row
                .as_ref()
                .and_then(|row| row.first())
                .and_then(|value| value.as_i64())
                .and_then(|count| u64::try_from(count).ok())
                .ok_or_else(|| {
                    read_failed(
                        id,
                        StorageError::Decode("count returned no integer".to_string()),
                    )
                })?;
            counts.insert(id, count);
        }
        Ok(counts)
    }

    fn route(&self, user_id: &str, intent: Intent) -> Result<Route> {
        let route = self.router.route(user_id, intent)?;
        debug!(user_id, partition = route.partition, role = %route.role, ?intent, "user routed");
        Ok(route)
    }

    async fn fetch(&self, ctx: &OpContext, user_id: &str, intent: Intent) -> Result<User> {
        let route = self.route(user_id, intent)?;
        let partition = route.partition;
        let args = [Value::from(user_id)];

        let row = ctx
            .run(async {
                route
                    .handle
                    .query_row(statements::SELECT_USER, &args)
                    .await
                    .map_err(|source| read_failed(partition, source))
            })
            .await?
            .ok_or_else(|| ShardError::not_found(user_id))?;

        User::from_row(row).map_err(|source| read_failed(partition, source))
    }

    async fn write(&self, ctx: &OpContext, user_id: &str, sql: &str, args: &[Value]) -> Result<()> {
        let route = self.route(user_id, Intent::Write)?;
        let partition = route.partition;

        let affected = ctx
            .run(async {
                route
                    .handle
                    .execute(sql, args)
                    .await
                    .map_err(|source| write_failed(partition, source))
            })
            .await?;

        if affected == 0 {
            return Err(ShardError::not_found(user_id));
        }
        Ok(())
    }
}

fn write_failed(partition: usize, source: StorageError) -> ShardError {
    ShardError::WriteFailed { partition, source }
}

fn read_failed(partition: usize, source: StorageError) -> ShardError {
    ShardError::ReadFailed { partition, source }
}
