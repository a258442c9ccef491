//! Backend counter stores.
//!
//! The engine talks to shards through the [`CounterStore`] trait: five
//! primitives (`GET`, `SET`, `INCRBY`, `DELETE`, `KEYS`) over pooled
//! connections. [`RedisStore`] is the wire implementation; [`MemoryStore`]
//! backs tests and single-process development runs.

mod pool;
mod resp;

pub mod memory;
pub mod redis;

pub use memory::MemoryStore;
pub use redis::RedisStore;

use async_trait::async_trait;
use std::fmt;

/// Error raised by a backend store client.
#[derive(Debug)]
pub enum StoreError {
    /// Network failure talking to the shard.
    Io(std::io::Error),
    /// The shard replied with bytes the codec does not understand.
    Protocol(String),
    /// The shard replied with an error string.
    Backend(String),
    /// A stored value was not an integer counter.
    NotAnInteger(String),
    /// The connection pool was shut down.
    PoolClosed,
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Io(e) => write!(f, "shard I/O error: {}", e),
            StoreError::Protocol(msg) => write!(f, "protocol error: {}", msg),
            StoreError::Backend(msg) => write!(f, "shard error reply: {}", msg),
            StoreError::NotAnInteger(value) => {
                write!(f, "stored value is not an integer: {:?}", value)
            }
            StoreError::PoolClosed => write!(f, "connection pool closed"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Io(e)
    }
}

/// A remote counter store holding one integer per key.
///
/// Implementations are internally pooled and safe to share behind an `Arc`;
/// every method may run concurrently with any other.
#[async_trait]
pub trait CounterStore: Send + Sync + Sized + 'static {
    /// Open a pooled client for the shard at `url`.
    async fn connect(url: &str, pool_max: usize) -> Result<Self, StoreError>;

    /// Value stored at `key`, `None` when absent.
    async fn get(&self, key: &str) -> Result<Option<i64>, StoreError>;

    /// Store `value` at `key`, overwriting any previous value.
    async fn set(&self, key: &str, value: i64) -> Result<(), StoreError>;

    /// Atomically add `n` to `key` and return the new value. Absent keys
    /// start at zero.
    async fn incr_by(&self, key: &str, n: i64) -> Result<i64, StoreError>;

    /// Remove `key`. Removing an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Every key currently stored on this shard.
    async fn keys(&self) -> Result<Vec<String>, StoreError>;
}
