use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use replishard::storage::{MemoryConnector, PgConnector, ReplicationMode};
use replishard::{
    Connector, NewUser, OpContext, TopologyConfig, UserRepository, partition_for_key,
};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "replishard")]
#[command(about = "Key routing across partitioned primary/replica clusters")]
struct Cli {
    /// Topology description (JSON). Defaults to $REPLISHARD_TOPOLOGY, then the local layout.
    #[arg(long, global = true)]
    topology: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = Backend::Memory, global = true)]
    backend: Backend,

    /// Per-operation deadline in milliseconds.
    #[arg(long, default_value_t = 5000, global = true)]
    timeout_ms: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum Backend {
    Memory,
    Postgres,
}

#[derive(Subcommand)]
enum Command {
    /// Print the partition of each key without connecting.
    Route {
        #[arg(required = true)]
        keys: Vec<String>,
    },
    /// Open every endpoint, report the topology and shut down.
    Check,
    /// Walk through routing, CRUD, replica reads and distribution.
    Demo {
        #[arg(long, default_value_t = 1000)]
        keys: usize,
    },
    /// Print the number of users on each partition.
    Counts,
}

enum Storage {
    Memory(MemoryConnector),
    Postgres(PgConnector),
}

impl Storage {
    fn new(backend: Backend, config: &TopologyConfig) -> Self {
        match backend {
            Backend::Memory => {
                Self::Memory(MemoryConnector::for_topology(config, ReplicationMode::Manual))
            }
            Backend::Postgres => Self::Postgres(PgConnector::new()),
        }
    }

    fn connector(&self) -> &dyn Connector {
        match self {
            Self::Memory(connector) => connector,
            Self::Postgres(connector) => connector,
        }
    }

    /// Gives replicas a chance to catch up with their primaries.
    async fn settle(&self) {
        match self {
            Self::Memory(connector) => connector.flush_replication().await,
            Self::Postgres(_) => tokio::time::sleep(Duration::from_millis(100)).await,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = match &cli.topology {
        Some(path) => TopologyConfig::from_file(path)
            .with_context(|| format!("failed to load topology from {}", path.display()))?,
        None => TopologyConfig::from_env().context("failed to load topology from environment")?,
    };
    config.validate().context("invalid topology")?;

    if let Command::Route { keys } = &cli.command {
        route(&config, keys);
        return Ok(());
    }

    let storage = Storage::new(cli.backend, &config);
    let users = replishard::connect(&config, storage.connector())
        .await
        .context("failed to connect to the topology")?;
    let timeout = Duration::from_millis(cli.timeout_ms);

    let outcome = match cli.command {
        Command::Route { .. } => Ok(()),
        Command::Check => check(&users),
        Command::Demo { keys } => demo(&users, &storage, timeout, keys).await,
        Command::Counts => counts(&users, timeout).await,
    };

    users
        .router()
        .shutdown()
        .await
        .context("failed to close connections")?;
    outcome
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("replishard=info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn route(config: &TopologyConfig, keys: &[String]) {
    let count = config.partition_count();
    for key in keys {
        println!("{} -> partition {}", key, partition_for_key(key, count));
    }
}

fn check(users: &UserRepository) -> Result<()> {
    for partition in users.router().all_partitions()? {
        println!(
            "partition {}: primary + {} replica(s)",
            partition.id(),
            partition.replica_count()
        );
    }
    info!(partitions = users.router().partition_count(), "topology healthy");
    Ok(())
}

async fn counts(users: &UserRepository, timeout: Duration) -> Result<()> {
    let counts = users
        .count_per_partition(&OpContext::with_timeout(timeout))
        .await
        .context("failed to count users")?;
    for (partition, count) in counts {
        println!("partition {}: {} users", partition, count);
    }
    Ok(())
}

async fn demo(users: &UserRepository, storage: &Storage, timeout: Duration, keys: usize) -> Result<()> {
    let ctx = || OpContext::with_timeout(timeout);
    let router = users.router();

    users
        .ensure_schema(&ctx())
        .await
        .context("failed to create schema")?;

    println!("== routing ==");
    for key in ["user_1", "user_2", "user_100", "user_999"] {
        println!("{} -> partition {}", key, router.partition_for(key));
    }

    println!("== crud ==");
    let created = users
        .create(&ctx(), &NewUser::new("user_100", "Alice", "alice@example.com"))
        .await
        .context("create failed")?;
    println!(
        "created {} (id {}) on partition {}",
        created.user_id,
        created.id,
        router.partition_for(&created.user_id)
    );

    let strong = users.get_strong(&ctx(), "user_100").await?;
    println!("primary read: {} <{}>", strong.name, strong.email);

    users
        .update(&ctx(), &NewUser::new("user_100", "Alice Smith", "alice.smith@example.com"))
        .await
        .context("update failed")?;

    println!("== replication ==");
    match users.get(&ctx(), "user_100").await {
        Ok(user) => println!("replica read before sync: {}", user.name),
        Err(err) if err.is_not_found() => println!("replica read before sync: not yet replicated"),
        Err(err) => return Err(err.into()),
    }
    storage.settle().await;
    let replicated = users.get(&ctx(), "user_100").await?;
    println!("replica read after sync: {}", replicated.name);

    users
        .delete(&ctx(), "user_100")
        .await
        .context("delete failed")?;

    println!("== distribution ==");
    for i in 0..keys {
        let key = format!("user_{}", i);
        let user = NewUser::new(key.clone(), format!("User {}", i), format!("{}@example.com", key));
        if let Err(err) = users.create(&ctx(), &user).await {
            warn!(key = %key, error = %err, "skipping key");
        }
    }
    for (partition, count) in users.count_per_partition(&ctx()).await? {
        println!("partition {}: {} users", partition, count);
    }

    storage.settle().await;
    let all = users.get_all(&ctx()).await?;
    println!("total users across partitions: {}", all.len());
    Ok(())
}
