//! Consumed storage capabilities: the durable KV store of truth, the edge
//! HTTP cache, and the block queue. The core only ever talks to these
//! traits; production adapters live in the embedding shell, and the
//! in-memory implementations here back tests and the CLI.

use std::time::Duration;

use async_trait::async_trait;

use crate::utils::error::Result;

mod memory;

pub use memory::{MemoryCache, MemoryKv, MemoryQueue};

/// One key returned from a prefix scan.
#[derive(Debug, Clone)]
pub struct KvKey {
    pub name: String,
    /// Unix seconds at which the entry expires, if it carries a TTL.
    pub expiration: Option<i64>,
}

/// One page of a cursor-paginated prefix scan.
#[derive(Debug, Clone)]
pub struct KvPage {
    pub keys: Vec<KvKey>,
    pub cursor: Option<String>,
    pub list_complete: bool,
}

/// Durable key-value store, the blocklist's source of truth.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    async fn put(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Scans keys under `prefix`. Callers loop until `list_complete`.
    async fn list(&self, prefix: &str, cursor: Option<&str>) -> Result<KvPage>;

    /// UTF-8 convenience over `get`; lossy on invalid bytes.
    async fn get_text(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .get(key)
            .await?
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
    }
}

/// Edge HTTP cache keyed by synthetic URLs.
///
/// Entries are scoped to one edge location and carry a `max-age`; the core
/// uses it for the pending-block markers and the cuckoo filter snapshot.
#[async_trait]
pub trait EdgeCache: Send + Sync {
    async fn get(&self, url: &str) -> Result<Option<Vec<u8>>>;

    async fn put(&self, url: &str, body: Vec<u8>, max_age: Duration) -> Result<()>;

    /// Returns whether an entry was present.
    async fn delete(&self, url: &str) -> Result<bool>;
}

/// Producer half of the replication queue. Payloads are opaque bytes; the
/// blocklist layer serializes its own messages.
#[async_trait]
pub trait BlockQueue: Send + Sync {
    async fn send(&self, payload: Vec<u8>) -> Result<()>;
}
