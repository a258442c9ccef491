#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use std::sync::Arc;
use tally::counter::{CounterEngine, FlushWorker};
use tally::shard::ShardManager;
use tally::store::RedisStore;
use tally::{http, Config};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let config = Config::from_env();
    info!(
        "Starting visit counter: {} shard(s), flush every {}s, cache TTL {}s",
        config.nodes.len(),
        config.flush_interval_secs,
        config.cache_ttl_secs
    );

    let shards = Arc::new(ShardManager::<RedisStore>::new(
        config.virtual_nodes,
        config.pool_max,
    ));
    for node in &config.nodes {
        if let Err(e) = shards.add_shard(node).await {
            error!("Failed to register shard {}: {}", node, e);
        }
    }

    let engine = Arc::new(CounterEngine::new(
        shards,
        config.cache_ttl(),
        config.flush_interval(),
    ));

    let (worker, flush_handle) = FlushWorker::new(engine.clone());
    let worker_task = tokio::spawn(worker.run());

    let router = http::build_router(engine);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!("Listening on {}", config.bind_addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown requested");
        })
        .await?;

    // Final sweep so buffered visits reach the backend before exit.
    flush_handle.shutdown();
    let _ = worker_task.await;

    Ok(())
}
