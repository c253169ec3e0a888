use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use time::OffsetDateTime;

use crate::storage::{BlockQueue, EdgeCache, KvKey, KvPage, KvStore};
use crate::utils::error::Result;

// Page size for MemoryKv prefix scans.
const LIST_PAGE_SIZE: usize = 1000;

#[derive(Debug, Clone)]
struct Entry {
    value: Vec<u8>,
    expires_at: Option<OffsetDateTime>,
}

impl Entry {
    fn expired(&self, now: OffsetDateTime) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// In-memory `KvStore` with real TTL semantics.
///
/// Backs the integration tests and the CLI. Expired entries are purged
/// lazily on access, which keeps `list` pagination stable.
#[derive(Debug, Default)]
pub struct MemoryKv {
    entries: Mutex<BTreeMap<String, Entry>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries, for test assertions.
    pub fn len(&self) -> usize {
        let now = OffsetDateTime::now_utc();
        self.entries
            .lock()
            .values()
            .filter(|e| !e.expired(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let now = OffsetDateTime::now_utc();
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.expired(now) => {
                entries.remove(key);
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.value.clone())),
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        let expires_at = ttl.map(|t| OffsetDateTime::now_utc() + t);
        self.entries
            .lock()
            .insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.lock().remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str, cursor: Option<&str>) -> Result<KvPage> {
        let now = OffsetDateTime::now_utc();
        let entries = self.entries.lock();
        let mut keys = Vec::new();
        let mut next_cursor = None;

        let range = entries
            .range(prefix.to_string()..)
            .take_while(|(name, _)| name.starts_with(prefix))
            .filter(|(name, _)| cursor.is_none_or(|c| name.as_str() > c));

        for (name, entry) in range {
            if entry.expired(now) {
                continue;
            }
            if keys.len() == LIST_PAGE_SIZE {
                next_cursor = keys.last().map(|k: &KvKey| k.name.clone());
                break;
            }
            keys.push(KvKey {
                name: name.clone(),
                expiration: entry.expires_at.map(|at| at.unix_timestamp()),
            });
        }

        let list_complete = next_cursor.is_none();
        Ok(KvPage {
            keys,
            cursor: next_cursor,
            list_complete,
        })
    }
}

/// In-memory `EdgeCache` keyed by URL, honoring `max_age`.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<BTreeMap<String, Entry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EdgeCache for MemoryCache {
    async fn get(&self, url: &str) -> Result<Option<Vec<u8>>> {
        let now = OffsetDateTime::now_utc();
        let mut entries = self.entries.lock();
        match entries.get(url) {
            Some(entry) if entry.expired(now) => {
                entries.remove(url);
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.value.clone())),
            None => Ok(None),
        }
    }

    async fn put(&self, url: &str, body: Vec<u8>, max_age: Duration) -> Result<()> {
        self.entries.lock().insert(
            url.to_string(),
            Entry {
                value: body,
                expires_at: Some(OffsetDateTime::now_utc() + max_age),
            },
        );
        Ok(())
    }

    async fn delete(&self, url: &str) -> Result<bool> {
        Ok(self.entries.lock().remove(url).is_some())
    }
}

/// In-memory `BlockQueue` with a consumer-side drain for tests.
#[derive(Debug, Default)]
pub struct MemoryQueue {
    messages: Mutex<VecDeque<Vec<u8>>>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pops up to `max` pending payloads, oldest first.
    pub fn pull(&self, max: usize) -> Vec<Vec<u8>> {
        let mut messages = self.messages.lock();
        let take = max.min(messages.len());
        messages.drain(..take).collect()
    }

    /// Re-enqueues a payload at the back, the retry path.
    pub fn push_back(&self, payload: Vec<u8>) {
        self.messages.lock().push_back(payload);
    }

    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.lock().is_empty()
    }
}

#[async_trait]
impl BlockQueue for MemoryQueue {
    async fn send(&self, payload: Vec<u8>) -> Result<()> {
        self.messages.lock().push_back(payload);
        Ok(())
    }
}
