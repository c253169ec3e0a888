use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::storage::KvStore;
use crate::utils::error::{Result, SentinelError};
use crate::utils::epoch_ms;

// Constants for reputation storage
const REPUTATION_KEY_PREFIX: &str = "reputation:";
pub const DEFAULT_REPUTATION_TTL: Duration = Duration::from_secs(86400);
pub const MAX_HISTORY_ENTRIES: usize = 10;

/// One applied delta, kept for operator forensics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReputationEvent {
    pub delta: i64,
    pub attack_types: Vec<String>,
    pub at: i64,
}

/// Aggregate reputation for one client key.
///
/// `score` drifts negative as detections accumulate and recovers only by
/// TTL expiry of the whole record. History is bounded so hot keys cannot
/// grow the record without limit.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ReputationRecord {
    pub score: i64,
    #[serde(default)]
    pub history: Vec<ReputationEvent>,
    pub updated_at: i64,
}

/// KV-backed reputation reads and writes.
///
/// Read-modify-write without CAS: concurrent writers for the same key may
/// lose an update. Last write wins.
#[derive(Clone)]
pub struct ReputationStore {
    kv: Arc<dyn KvStore>,
    ttl: Duration,
}

impl ReputationStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self {
            kv,
            ttl: DEFAULT_REPUTATION_TTL,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    fn kv_key(key: &str) -> String {
        format!("{REPUTATION_KEY_PREFIX}{key}")
    }

    /// Loads the record for `key`, or `None` when the key is clean.
    pub async fn load(&self, key: &str) -> Result<Option<ReputationRecord>> {
        match self.kv.get(&Self::kv_key(key)).await? {
            Some(bytes) => {
                let record = serde_json::from_slice(&bytes)
                    .map_err(|e| SentinelError::serialization("reputation record", e))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// Applies a (negative) delta, appending to bounded history.
    ///
    /// Returns the stored record after the write.
    #[instrument(skip(self, attack_types))]
    pub async fn apply_delta(
        &self,
        key: &str,
        delta: i64,
        attack_types: Vec<String>,
    ) -> Result<ReputationRecord> {
        let mut record = self.load(key).await?.unwrap_or_default();
        let now = epoch_ms();

        record.score = record.score.saturating_add(delta);
        record.updated_at = now;
        record.history.push(ReputationEvent {
            delta,
            attack_types,
            at: now,
        });
        if record.history.len() > MAX_HISTORY_ENTRIES {
            let excess = record.history.len() - MAX_HISTORY_ENTRIES;
            record.history.drain(..excess);
        }

        let bytes = serde_json::to_vec(&record)
            .map_err(|e| SentinelError::serialization("reputation record", e))?;
        self.kv
            .put(&Self::kv_key(key), bytes, Some(self.ttl))
            .await?;
        debug!(key, delta, score = record.score, "reputation updated");
        Ok(record)
    }
}
