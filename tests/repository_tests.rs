use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use replishard::storage::{MemoryConnector, MemoryNode, ReplicationMode};
use replishard::{
    NewUser, OpContext, RoundRobinSelector, ShardError, TopologyConfig, TopologyRouter,
    UserRepository, cancel_pair,
};

struct Fixture {
    config: TopologyConfig,
    connector: MemoryConnector,
    users: UserRepository,
}

impl Fixture {
    async fn new(mode: ReplicationMode) -> Self {
        let config = TopologyConfig::local_default();
        let connector = MemoryConnector::for_topology(&config, mode);
        let router = TopologyRouter::connect_with_selector(
            &config,
            &connector,
            Box::new(RoundRobinSelector::new(config.partition_count())),
        )
        .await
        .unwrap();
        let users = UserRepository::new(Arc::new(router));
        users
            .ensure_schema(&OpContext::background())
            .await
            .unwrap();
        Self {
            config,
            connector,
            users,
        }
    }

    fn primary(&self, partition: usize) -> Arc<MemoryNode> {
        self.connector
            .node(&self.config.partitions[partition].primary)
            .unwrap()
    }

    fn replica(&self, partition: usize) -> Arc<MemoryNode> {
        self.connector
            .node(&self.config.partitions[partition].replicas[0])
            .unwrap()
    }
}

fn user(key: &str) -> NewUser {
    NewUser::new(key, format!("name of {}", key), format!("{}@example.com", key))
}

#[tokio::test]
async fn test_strong_read_sees_own_write_immediately() {
    let fx = Fixture::new(ReplicationMode::Manual).await;
    let ctx = OpContext::background();

    let created = fx.users.create(&ctx, &user("user_100")).await.unwrap();
    let strong = fx.users.get_strong(&ctx, "user_100").await.unwrap();
    assert_eq!(strong, created);

    assert!(fx.users.get(&ctx, "user_100").await.unwrap_err().is_not_found());
    fx.connector.flush_replication().await;
    assert_eq!(fx.users.get(&ctx, "user_100").await.unwrap(), created);
}

#[tokio::test]
async fn test_writes_land_only_on_the_keys_partition() {
    let fx = Fixture::new(ReplicationMode::Immediate).await;
    let ctx = OpContext::background();

    // "user_100" hashes to partition 0.
    fx.users.create(&ctx, &user("user_100")).await.unwrap();
    assert!(fx.primary(0).contains("user_100").await);
    assert!(fx.replica(0).contains("user_100").await);
    for partition in 1..3 {
        assert_eq!(fx.primary(partition).user_count().await, 0);
        assert_eq!(fx.replica(partition).user_count().await, 0);
    }
}

#[tokio::test]
async fn test_update_then_read_back() {
    let fx = Fixture::new(ReplicationMode::Immediate).await;
    let ctx = OpContext::background();
    let created = fx.users.create(&ctx, &user("user_5")).await.unwrap();

    fx.users
        .update(&ctx, &NewUser::new("user_5", "Renamed", "renamed@example.com"))
        .await
        .unwrap();

    let updated = fx.users.get(&ctx, "user_5").await.unwrap();
    assert_eq!(updated.name, "Renamed");
    assert_eq!(updated.email, "renamed@example.com");
    assert_eq!(updated.id, created.id);
    assert_eq!(updated.created_at, created.created_at);
}

#[tokio::test]
async fn test_missing_key_does_not_touch_other_partitions() {
    let fx = Fixture::new(ReplicationMode::Immediate).await;
    let ctx = OpContext::background();
    for i in 0..30 {
        fx.users.create(&ctx, &user(&format!("user_{}", i))).await.unwrap();
    }
    let before = fx.users.count_per_partition(&ctx).await.unwrap();

    let err = fx
        .users
        .update(&ctx, &user("nobody_here"))
        .await
        .unwrap_err();
    assert!(matches!(err, ShardError::NotFound { ref key } if key == "nobody_here"));
    assert!(fx.users.delete(&ctx, "nobody_here").await.unwrap_err().is_not_found());

    assert_eq!(fx.users.count_per_partition(&ctx).await.unwrap(), before);
}

#[tokio::test]
async fn test_delete_removes_record() {
    let fx = Fixture::new(ReplicationMode::Immediate).await;
    let ctx = OpContext::background();
    fx.users.create(&ctx, &user("user_9")).await.unwrap();

    fx.users.delete(&ctx, "user_9").await.unwrap();
    assert!(fx.users.get_strong(&ctx, "user_9").await.unwrap_err().is_not_found());
    assert!(fx.users.get(&ctx, "user_9").await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_counts_cover_every_partition() {
    let fx = Fixture::new(ReplicationMode::Immediate).await;
    let ctx = OpContext::background();
    for i in 0..1000 {
        fx.users.create(&ctx, &user(&format!("user_{}", i))).await.unwrap();
    }

    let counts = fx.users.count_per_partition(&ctx).await.unwrap();
    assert_eq!(counts, BTreeMap::from([(0, 340), (1, 327), (2, 333)]));
}

#[tokio::test]
async fn test_get_all_concatenates_in_partition_order() {
    let fx = Fixture::new(ReplicationMode::Immediate).await;
    let ctx = OpContext::background();
    for i in 0..12 {
        fx.users.create(&ctx, &user(&format!("user_{}", i))).await.unwrap();
    }

    let all = fx.users.get_all(&ctx).await.unwrap();
    assert_eq!(all.len(), 12);

    let router = fx.users.router();
    let partitions = all
        .iter()
        .map(|u| router.partition_for(&u.user_id))
        .collect::<Vec<_>>();
    let mut sorted = partitions.clone();
    sorted.sort();
    assert_eq!(partitions, sorted);

    // Newest first within a partition.
    for pair in all.windows(2) {
        if router.partition_for(&pair[0].user_id) == router.partition_for(&pair[1].user_id) {
            assert!(pair[0].id > pair[1].id);
        }
    }
}

#[tokio::test]
async fn test_get_all_reads_first_replica() {
    let fx = Fixture::new(ReplicationMode::Manual).await;
    let ctx = OpContext::background();
    fx.users.create(&ctx, &user("user_1")).await.unwrap();

    assert!(fx.users.get_all(&ctx).await.unwrap().is_empty());
    fx.connector.flush_replication().await;
    assert_eq!(fx.users.get_all(&ctx).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_get_all_fails_fast() {
    let fx = Fixture::new(ReplicationMode::Immediate).await;
    let ctx = OpContext::background();
    fx.replica(1).set_fail_statements(true);
    let untouched = fx.replica(2).statement_count();

    let err = fx.users.get_all(&ctx).await.unwrap_err();
    assert!(matches!(err, ShardError::ReadFailed { partition: 1, .. }));
    assert_eq!(fx.replica(2).statement_count(), untouched);
}

#[tokio::test]
async fn test_unreachable_primary_is_write_failed() {
    let fx = Fixture::new(ReplicationMode::Immediate).await;
    fx.primary(0).set_unreachable(true);

    let err = fx
        .users
        .create(&OpContext::background(), &user("user_100"))
        .await
        .unwrap_err();
    assert!(matches!(err, ShardError::WriteFailed { partition: 0, .. }));
    assert!(!err.is_not_found());
}

#[tokio::test(start_paused = true)]
async fn test_deadline_surfaces_timeout() {
    let fx = Fixture::new(ReplicationMode::Immediate).await;
    fx.primary(0).set_latency(Duration::from_secs(10));

    let ctx = OpContext::with_timeout(Duration::from_millis(200));
    let err = fx.users.get_strong(&ctx, "user_100").await.unwrap_err();
    assert!(matches!(err, ShardError::Timeout));
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_stops_fan_out() {
    let fx = Fixture::new(ReplicationMode::Immediate).await;
    fx.primary(0).set_latency(Duration::from_secs(10));
    let later = [fx.primary(1).statement_count(), fx.primary(2).statement_count()];

    let (handle, token) = cancel_pair();
    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.cancel();
    });

    let ctx = OpContext::background().cancel_on(token);
    let err = fx.users.count_per_partition(&ctx).await.unwrap_err();
    canceller.await.unwrap();

    assert!(matches!(err, ShardError::Cancelled));
    assert!(err.is_interrupted());
    assert_eq!(
        [fx.primary(1).statement_count(), fx.primary(2).statement_count()],
        later
    );
}

#[tokio::test]
async fn test_operations_after_shutdown_are_rejected() {
    let fx = Fixture::new(ReplicationMode::Immediate).await;
    let ctx = OpContext::background();
    fx.users.router().shutdown().await.unwrap();

    assert!(matches!(
        fx.users.create(&ctx, &user("user_1")).await,
        Err(ShardError::Closed)
    ));
    assert!(matches!(fx.users.get_all(&ctx).await, Err(ShardError::Closed)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_creates_across_tasks() {
    let fx = Fixture::new(ReplicationMode::Immediate).await;
    let users = fx.users.clone();

    let tasks = (0..8)
        .map(|t| {
            let users = users.clone();
            tokio::spawn(async move {
                let ctx = OpContext::background();
                for i in 0..25 {
                    users
                        .create(&ctx, &user(&format!("user_{}_{}", t, i)))
                        .await
                        .unwrap();
                }
            })
        })
        .collect::<Vec<_>>();
    for task in tasks {
        task.await.unwrap();
    }

    let total: u64 = users
        .count_per_partition(&OpContext::background())
        .await
        .unwrap()
        .values()
        .sum();
    assert_eq!(total, 200);

    // Immediate replication leaves every replica caught up once writes settle.
    let replicated = users.get_all(&OpContext::background()).await.unwrap();
    assert_eq!(replicated.len(), 200);
}
