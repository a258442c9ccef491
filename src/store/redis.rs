//! Pooled RESP client for a single backend shard.

use super::pool::ConnectionPool;
use super::resp::{self, encode_command, Reply};
use super::{CounterStore, StoreError};
use async_trait::async_trait;
use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

pub struct RedisStore {
    pool: ConnectionPool,
}

impl RedisStore {
    /// Run one command on a pooled connection. The connection is recycled
    /// only after a clean round trip.
    async fn command(&self, args: &[&str]) -> Result<Reply, StoreError> {
        let mut conn = self.pool.acquire().await?;
        conn.stream.write_all(&encode_command(args)).await?;
        let reply = read_reply(&mut conn.stream).await?;
        conn.release();
        match reply {
            Reply::Error(msg) => Err(StoreError::Backend(msg)),
            other => Ok(other),
        }
    }
}

async fn read_reply(stream: &mut TcpStream) -> Result<Reply, StoreError> {
    let mut buf = BytesMut::with_capacity(4096);
    loop {
        if let Some((reply, _consumed)) = resp::parse_reply(&buf)? {
            return Ok(reply);
        }
        let mut chunk = vec![0u8; 4096];
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(StoreError::Protocol(
                "connection closed mid-reply".to_string(),
            ));
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

/// `host:port` part of a shard URL. Accepts `redis://host:port[/db]` or a
/// bare `host[:port]`; the port defaults to 6379.
fn host_port(url: &str) -> String {
    let rest = url.strip_prefix("redis://").unwrap_or(url);
    let rest = rest.split('/').next().unwrap_or(rest);
    if rest.contains(':') {
        rest.to_string()
    } else {
        format!("{}:6379", rest)
    }
}

fn bulk_integer(data: &[u8]) -> Result<i64, StoreError> {
    let text = std::str::from_utf8(data)
        .map_err(|_| StoreError::NotAnInteger(String::from_utf8_lossy(data).into_owned()))?;
    text.parse()
        .map_err(|_| StoreError::NotAnInteger(text.to_string()))
}

#[async_trait]
impl CounterStore for RedisStore {
    async fn connect(url: &str, pool_max: usize) -> Result<Self, StoreError> {
        // Connections are dialed lazily on first checkout, so registering a
        // shard never blocks on the backend being up.
        Ok(RedisStore {
            pool: ConnectionPool::new(host_port(url), pool_max),
        })
    }

    async fn get(&self, key: &str) -> Result<Option<i64>, StoreError> {
        match self.command(&["GET", key]).await? {
            Reply::Bulk(None) => Ok(None),
            Reply::Bulk(Some(data)) => Ok(Some(bulk_integer(&data)?)),
            other => Err(StoreError::Protocol(format!(
                "unexpected GET reply: {:?}",
                other
            ))),
        }
    }

    async fn set(&self, key: &str, value: i64) -> Result<(), StoreError> {
        let value = value.to_string();
        match self.command(&["SET", key, &value]).await? {
            Reply::Simple(_) => Ok(()),
            other => Err(StoreError::Protocol(format!(
                "unexpected SET reply: {:?}",
                other
            ))),
        }
    }

    async fn incr_by(&self, key: &str, n: i64) -> Result<i64, StoreError> {
        let n = n.to_string();
        match self.command(&["INCRBY", key, &n]).await? {
            Reply::Integer(value) => Ok(value),
            other => Err(StoreError::Protocol(format!(
                "unexpected INCRBY reply: {:?}",
                other
            ))),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        match self.command(&["DEL", key]).await? {
            Reply::Integer(_) => Ok(()),
            other => Err(StoreError::Protocol(format!(
                "unexpected DEL reply: {:?}",
                other
            ))),
        }
    }

    async fn keys(&self) -> Result<Vec<String>, StoreError> {
        match self.command(&["KEYS", "*"]).await? {
            Reply::Array(items) => items
                .unwrap_or_default()
                .into_iter()
                .map(|item| match item {
                    Reply::Bulk(Some(data)) => String::from_utf8(data).map_err(|_| {
                        StoreError::Protocol("non-UTF-8 key in KEYS reply".to_string())
                    }),
                    other => Err(StoreError::Protocol(format!(
                        "unexpected KEYS element: {:?}",
                        other
                    ))),
                })
                .collect(),
            other => Err(StoreError::Protocol(format!(
                "unexpected KEYS reply: {:?}",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shard_urls_reduce_to_dial_addresses() {
        assert_eq!(host_port("redis://redis1:6379"), "redis1:6379");
        assert_eq!(host_port("redis://redis1:6379/0"), "redis1:6379");
        assert_eq!(host_port("redis://redis2"), "redis2:6379");
        assert_eq!(host_port("10.0.0.5:7000"), "10.0.0.5:7000");
    }

    #[test]
    fn bulk_values_must_be_integers() {
        assert_eq!(bulk_integer(b"17").unwrap(), 17);
        assert_eq!(bulk_integer(b"-3").unwrap(), -3);
        assert!(matches!(
            bulk_integer(b"seventeen"),
            Err(StoreError::NotAnInteger(_))
        ));
    }
}
