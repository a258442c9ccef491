//! Runtime configuration for the counter service.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Seconds a cached read stays fresh.
const DEFAULT_CACHE_TTL_SECS: u64 = 50;
/// Seconds between write-buffer flush sweeps.
const DEFAULT_FLUSH_INTERVAL_SECS: u64 = 30;
/// Per-shard connection cap.
const DEFAULT_POOL_MAX: usize = 200;
/// Virtual nodes each shard contributes to the hash ring.
const DEFAULT_VIRTUAL_NODES: u32 = 100;
/// Shard used when `REDIS_NODES` is not set.
const DEFAULT_NODE: &str = "redis://redis1:6379";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Address the HTTP listener binds to.
    pub bind_addr: String,
    /// Backend shard URLs registered at startup.
    pub nodes: Vec<String>,
    pub cache_ttl_secs: u64,
    pub flush_interval_secs: u64,
    pub pool_max: usize,
    pub virtual_nodes: u32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind_addr: "0.0.0.0:8000".to_string(),
            nodes: vec![DEFAULT_NODE.to_string()],
            cache_ttl_secs: DEFAULT_CACHE_TTL_SECS,
            flush_interval_secs: DEFAULT_FLUSH_INTERVAL_SECS,
            pool_max: DEFAULT_POOL_MAX,
            virtual_nodes: DEFAULT_VIRTUAL_NODES,
        }
    }
}

impl Config {
    /// Configuration from the environment.
    ///
    /// `REDIS_NODES` is a comma-separated shard URL list (a single default
    /// shard when unset or empty); `BIND_ADDR` overrides the listen address.
    pub fn from_env() -> Self {
        let mut config = Config::default();
        if let Ok(nodes) = std::env::var("REDIS_NODES") {
            let nodes: Vec<String> = nodes
                .split(',')
                .map(str::trim)
                .filter(|node| !node.is_empty())
                .map(str::to_string)
                .collect();
            if !nodes.is_empty() {
                config.nodes = nodes;
            }
        }
        if let Ok(addr) = std::env::var("BIND_ADDR") {
            config.bind_addr = addr;
        }
        config
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs)
    }

    pub fn with_nodes(mut self, nodes: Vec<String>) -> Self {
        self.nodes = nodes;
        self
    }

    pub fn with_cache_ttl_secs(mut self, secs: u64) -> Self {
        self.cache_ttl_secs = secs;
        self
    }

    pub fn with_flush_interval_secs(mut self, secs: u64) -> Self {
        self.flush_interval_secs = secs;
        self
    }

    pub fn with_pool_max(mut self, pool_max: usize) -> Self {
        self.pool_max = pool_max;
        self
    }
}
