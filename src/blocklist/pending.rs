use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, instrument};

use crate::blocklist::pending_cache_url;
use crate::storage::EdgeCache;
use crate::utils::error::Result;

// One-byte body; presence of the entry is the whole signal.
const PENDING_MARKER: [u8; 1] = [1];

/// Edge-local pending-block markers.
///
/// A freshly blocked key takes effect at its originating edge immediately,
/// before the queue consumer has folded it into the shared filter. Entries
/// are append-only within their TTL; the only explicit delete happens when
/// KV verification shows the marker is stale.
#[derive(Clone)]
pub struct PendingCache {
    cache: Arc<dyn EdgeCache>,
    host: String,
    max_ttl: Duration,
}

impl PendingCache {
    pub fn new(cache: Arc<dyn EdgeCache>, host: impl Into<String>, max_ttl: Duration) -> Self {
        Self {
            cache,
            host: host.into(),
            max_ttl,
        }
    }

    fn url(&self, raw_key: &str) -> String {
        pending_cache_url(&self.host, raw_key)
    }

    /// Marks a key as pending-blocked for `min(requested_ttl, max_ttl)`.
    #[instrument(skip(self))]
    pub async fn mark(&self, raw_key: &str, requested_ttl: Duration) -> Result<()> {
        let ttl = requested_ttl.min(self.max_ttl);
        self.cache
            .put(&self.url(raw_key), PENDING_MARKER.to_vec(), ttl)
            .await?;
        debug!(key = raw_key, ttl_secs = ttl.as_secs(), "pending block marked");
        Ok(())
    }

    /// Whether a pending marker exists for the key.
    pub async fn has(&self, raw_key: &str) -> Result<bool> {
        Ok(self.cache.get(&self.url(raw_key)).await?.is_some())
    }

    /// Drops a stale marker; returns whether one existed.
    pub async fn clear(&self, raw_key: &str) -> Result<bool> {
        self.cache.delete(&self.url(raw_key)).await
    }
}
