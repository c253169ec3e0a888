//! The globally replicated blocklist: record and queue-message schema,
//! synthetic cache URLs, the cuckoo filter and its snapshot persistence,
//! the per-edge pending cache, the queue consumer, and the cron rebuild.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::http::HttpRequest;
use crate::storage::KvStore;
use crate::utils::error::{Result, SentinelError};
use crate::utils::epoch_ms;

pub mod consumer;
pub mod cuckoo;
pub mod pending;
pub mod rebuild;

pub use consumer::{BatchSummary, BlocklistConsumer, MessageDisposition};
pub use cuckoo::CuckooFilter;
pub use pending::PendingCache;
pub use rebuild::{FilterRebuilder, RebuildSummary};

// KV keys for the shared filter snapshot
pub const FILTER_SNAPSHOT_KEY: &str = "filter_snapshot";
pub const FILTER_VERSION_KEY: &str = "filter_version";

// Values accepted as bare "blocked" markers in legacy string records
const MARKER_VALUES: [&str; 2] = ["true", "1"];
const DEFAULT_MARKER_REASON: &str = "Blocked";

/// Derives the blocklist key for a request; `None` opts the request out.
pub type KeyExtractor = Arc<dyn Fn(&HttpRequest) -> Option<String> + Send + Sync>;

/// The KV record for one blocked key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockRecord {
    pub blocked: bool,
    pub reason: String,
    pub blocked_at: i64,
    pub expires_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attack_types: Option<Vec<String>>,
}

impl BlockRecord {
    pub fn new(reason: impl Into<String>, ttl_secs: u64) -> Self {
        let now = epoch_ms();
        Self {
            blocked: true,
            reason: reason.into(),
            blocked_at: now,
            expires_at: now + (ttl_secs as i64) * 1000,
            score: None,
            attack_types: None,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| SentinelError::serialization("block record", e))
    }
}

/// Decoded form of whatever sits under a block key.
///
/// JSON records are the current format; plain strings are accepted for
/// operator-seeded entries, where the string is the reason unless it is one
/// of the reserved markers.
#[derive(Debug, Clone)]
pub enum StoredBlock {
    Record(BlockRecord),
    Reason(String),
    Marker,
}

impl StoredBlock {
    pub fn parse(bytes: &[u8]) -> Self {
        if let Ok(record) = serde_json::from_slice::<BlockRecord>(bytes) {
            return StoredBlock::Record(record);
        }
        let text = String::from_utf8_lossy(bytes).trim().to_string();
        if MARKER_VALUES.contains(&text.as_str()) {
            StoredBlock::Marker
        } else {
            StoredBlock::Reason(text)
        }
    }

    pub fn reason(&self) -> String {
        match self {
            StoredBlock::Record(record) => record.reason.clone(),
            StoredBlock::Reason(reason) => reason.clone(),
            StoredBlock::Marker => DEFAULT_MARKER_REASON.to_string(),
        }
    }

    pub fn blocked_at(&self) -> Option<i64> {
        match self {
            StoredBlock::Record(record) => Some(record.blocked_at),
            _ => None,
        }
    }
}

/// Replication actions carried on the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueAction {
    Add,
    Remove,
}

/// One replication message, serialized as JSON on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockQueueMessage {
    pub key: String,
    pub action: QueueAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attack_types: Option<Vec<String>>,
}

impl BlockQueueMessage {
    pub fn add(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            action: QueueAction::Add,
            reason: None,
            timestamp: epoch_ms(),
            expires_at: None,
            score: None,
            attack_types: None,
        }
    }

    pub fn remove(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            action: QueueAction::Remove,
            reason: None,
            timestamp: epoch_ms(),
            expires_at: None,
            score: None,
            attack_types: None,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| SentinelError::serialization("queue message", e))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| SentinelError::serialization("queue message", e))
    }
}

/// Synthetic URL for the cached filter snapshot at one edge.
pub fn filter_cache_url(host: &str) -> String {
    format!("https://{host}/blocklist/filter/v1")
}

/// Synthetic URL for a pending-block marker.
pub fn pending_cache_url(host: &str, raw_key: &str) -> String {
    format!(
        "https://{host}/blocklist/pending/{}",
        urlencoding::encode(raw_key)
    )
}

/// Full KV key for a raw blocklist key.
pub fn kv_key(prefix: &str, raw_key: &str) -> String {
    format!("{prefix}{raw_key}")
}

/// Persists a mutated filter: snapshot first, then the version key.
///
/// Both puts complete before the caller acknowledges queue messages, so no
/// reader observes a version change without the matching snapshot.
pub async fn write_snapshot(
    kv: &dyn KvStore,
    filter: &CuckooFilter,
    version: String,
) -> Result<String> {
    kv.put(FILTER_SNAPSHOT_KEY, filter.to_bytes(), None).await?;
    kv.put(FILTER_VERSION_KEY, version.clone().into_bytes(), None)
        .await?;
    debug!(version = %version, entries = filter.len(), "filter snapshot persisted");
    Ok(version)
}

/// Loads the shared filter from KV, or `None` when no snapshot exists.
pub async fn load_snapshot(kv: &dyn KvStore) -> Result<Option<CuckooFilter>> {
    match kv.get(FILTER_SNAPSHOT_KEY).await? {
        Some(bytes) => CuckooFilter::from_bytes(&bytes).map(Some),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stored_block_parses_json_record() {
        let record = BlockRecord::new("Spam", 60);
        let parsed = StoredBlock::parse(&record.to_bytes().unwrap());
        assert_eq!(parsed.reason(), "Spam");
        assert!(parsed.blocked_at().is_some());
    }

    #[test]
    fn stored_block_parses_plain_string() {
        let parsed = StoredBlock::parse(b"manual ban");
        assert_eq!(parsed.reason(), "manual ban");
        assert!(parsed.blocked_at().is_none());
    }

    #[test]
    fn stored_block_markers_get_default_reason() {
        assert_eq!(StoredBlock::parse(b"true").reason(), "Blocked");
        assert_eq!(StoredBlock::parse(b"1").reason(), "Blocked");
    }

    #[test]
    fn queue_message_roundtrip() {
        let mut message = BlockQueueMessage::add("1.2.3.4");
        message.reason = Some("Spam".into());
        message.score = Some(100);
        let decoded = BlockQueueMessage::from_bytes(&message.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded.key, "1.2.3.4");
        assert_eq!(decoded.action, QueueAction::Add);
        assert_eq!(decoded.reason.as_deref(), Some("Spam"));
    }

    #[test]
    fn pending_url_encodes_key() {
        let url = pending_cache_url("sentinel.internal", "2001:db8::1");
        assert_eq!(
            url,
            "https://sentinel.internal/blocklist/pending/2001%3Adb8%3A%3A1"
        );
    }
}
