use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::utils::error::{Result, SentinelError};

// Blocklist configuration defaults
const DEFAULT_KEY_PREFIX: &str = "blocked:";
const DEFAULT_BLOCK_TTL_SECS: u64 = 86400;
const DEFAULT_READ_CACHE_TTL_SECS: u64 = 3600;
const DEFAULT_PENDING_TTL_SECS: u64 = 300;
const DEFAULT_FILTER_CACHE_TTL_SECS: u64 = 300;
const DEFAULT_FILTER_CAPACITY: usize = 100_000;
const DEFAULT_CACHE_HOST: &str = "sentinel.internal";

/// How the blocklist detector reads membership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlocklistMode {
    /// Straight KV lookup per request, softened by a read-through cache.
    Direct,
    /// Pending cache → cuckoo filter → KV verification.
    Cuckoo,
}

/// Settings shared by the blocklist detector, handler, queue consumer, and
/// rebuild worker. Durations are stored as whole seconds so they load
/// cleanly from TOML and environment overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BlocklistConfig {
    pub enabled: bool,
    pub mode: BlocklistMode,
    /// KV key prefix for block records.
    pub key_prefix: String,
    /// Default block duration when an action does not carry one.
    pub block_ttl_secs: u64,
    /// Direct-mode read-through cache TTL.
    pub read_cache_ttl_secs: u64,
    /// Whether cuckoo-mode hits are verified against KV before blocking.
    pub verify_with_kv: bool,
    /// Pending-cache marker TTL cap.
    pub pending_ttl_secs: u64,
    /// Edge-cache TTL for the deserialized filter snapshot.
    pub filter_cache_ttl_secs: u64,
    /// Cuckoo filter capacity in entries.
    pub filter_capacity: usize,
    /// Host used in synthetic cache URLs.
    pub cache_host: String,
}

impl Default for BlocklistConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: BlocklistMode::Direct,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            block_ttl_secs: DEFAULT_BLOCK_TTL_SECS,
            read_cache_ttl_secs: DEFAULT_READ_CACHE_TTL_SECS,
            verify_with_kv: true,
            pending_ttl_secs: DEFAULT_PENDING_TTL_SECS,
            filter_cache_ttl_secs: DEFAULT_FILTER_CACHE_TTL_SECS,
            filter_capacity: DEFAULT_FILTER_CAPACITY,
            cache_host: DEFAULT_CACHE_HOST.to_string(),
        }
    }
}

impl BlocklistConfig {
    pub fn block_ttl(&self) -> Duration {
        Duration::from_secs(self.block_ttl_secs)
    }

    pub fn read_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.read_cache_ttl_secs)
    }

    pub fn pending_ttl(&self) -> Duration {
        Duration::from_secs(self.pending_ttl_secs)
    }

    pub fn filter_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.filter_cache_ttl_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.key_prefix.is_empty() {
            return Err(SentinelError::config("blocklist key_prefix is empty"));
        }
        if self.filter_capacity == 0 {
            return Err(SentinelError::config("blocklist filter_capacity is zero"));
        }
        if self.block_ttl_secs == 0 || self.pending_ttl_secs == 0 {
            return Err(SentinelError::config("blocklist TTLs must be positive"));
        }
        Ok(())
    }
}
