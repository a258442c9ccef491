pub mod config;
pub mod counter;
pub mod http;
pub mod ring;
pub mod shard;
pub mod store;

pub use config::Config;
pub use counter::{CounterEngine, FlushWorker, FlushWorkerHandle, ServedVia};
pub use ring::HashRing;
pub use shard::{ShardError, ShardManager};
pub use store::{CounterStore, MemoryStore, RedisStore, StoreError};
