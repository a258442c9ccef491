//! Bounded connection pool for shard clients.
//!
//! A semaphore caps concurrent connections per shard; idle connections are
//! recycled through a lock-free queue. A connection that hit an error is
//! dropped instead of returned, so the pool never hands out a broken stream.

use super::StoreError;
use crossbeam::queue::ArrayQueue;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

pub struct ConnectionPool {
    addr: String,
    idle: ArrayQueue<TcpStream>,
    permits: Arc<Semaphore>,
}

impl ConnectionPool {
    pub fn new(addr: String, max_connections: usize) -> Self {
        let cap = max_connections.max(1);
        ConnectionPool {
            addr,
            idle: ArrayQueue::new(cap),
            permits: Arc::new(Semaphore::new(cap)),
        }
    }

    /// Check out a connection, dialing a new one when no idle connection is
    /// available. Waits while the pool is at capacity.
    pub async fn acquire(&self) -> Result<PooledConnection<'_>, StoreError> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| StoreError::PoolClosed)?;
        let stream = match self.idle.pop() {
            Some(stream) => stream,
            None => TcpStream::connect(&self.addr).await?,
        };
        Ok(PooledConnection {
            pool: self,
            stream,
            _permit: permit,
        })
    }
}

/// A connection checked out of the pool.
///
/// Call [`PooledConnection::release`] after a clean exchange to return the
/// stream for reuse; dropping the guard instead discards the stream and
/// frees its permit.
pub struct PooledConnection<'a> {
    pool: &'a ConnectionPool,
    pub(crate) stream: TcpStream,
    _permit: OwnedSemaphorePermit,
}

impl PooledConnection<'_> {
    pub fn release(self) {
        // If the queue is full the stream is simply closed.
        let _ = self.pool.idle.push(self.stream);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn recycles_released_connections() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    break;
                };
                tokio::spawn(async move {
                    let mut buf = [0u8; 64];
                    while socket.read(&mut buf).await.unwrap_or(0) > 0 {}
                });
            }
        });

        let pool = ConnectionPool::new(addr, 4);
        let conn = pool.acquire().await.unwrap();
        let local = conn.stream.local_addr().unwrap();
        conn.release();

        // The same stream comes back for the next caller.
        let conn = pool.acquire().await.unwrap();
        assert_eq!(conn.stream.local_addr().unwrap(), local);
    }

    #[tokio::test]
    async fn capacity_limits_concurrent_checkouts() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            loop {
                if listener.accept().await.is_err() {
                    break;
                }
            }
        });

        let pool = ConnectionPool::new(addr, 1);
        let held = pool.acquire().await.unwrap();

        let second = tokio::time::timeout(std::time::Duration::from_millis(50), pool.acquire());
        assert!(second.await.is_err(), "pool should block at capacity");

        drop(held);
        let conn = tokio::time::timeout(std::time::Duration::from_millis(500), pool.acquire())
            .await
            .expect("permit freed by drop")
            .unwrap();
        conn.release();
    }
}
