use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, instrument};

use crate::storage::KvStore;
use crate::utils::error::Result;

/// Per-key failure counter with a TTL window.
///
/// The count lives in KV as a decimal string under `{prefix}:{key}` with
/// `expirationTtl` = window, so it disappears on its own once the key goes
/// quiet. Increments are read-modify-write; concurrent requests may lose a
/// tick at the window edge, which the rate-limit and failure-threshold
/// detectors tolerate.
#[derive(Clone)]
pub struct WindowedCounter {
    kv: Arc<dyn KvStore>,
    prefix: String,
    window: Duration,
}

impl WindowedCounter {
    pub fn new(kv: Arc<dyn KvStore>, prefix: impl Into<String>, window: Duration) -> Self {
        Self {
            kv,
            prefix: prefix.into(),
            window,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    fn kv_key(&self, key: &str) -> String {
        format!("{}:{}", self.prefix, key)
    }

    /// Adds one to the key's count and returns the new value.
    ///
    /// Every write re-arms the TTL; KV cannot preserve a remaining TTL on
    /// rewrite, so the window slides under sustained traffic.
    #[instrument(skip(self), fields(prefix = %self.prefix))]
    pub async fn increment(&self, key: &str) -> Result<u64> {
        let kv_key = self.kv_key(key);
        let current = self.read(&kv_key).await?;
        let next = current.saturating_add(1);
        self.kv
            .put(&kv_key, next.to_string().into_bytes(), Some(self.window))
            .await?;
        debug!(key = %kv_key, count = next, "counter incremented");
        Ok(next)
    }

    /// Current count without touching the TTL. Zero when absent or expired.
    pub async fn current(&self, key: &str) -> Result<u64> {
        self.read(&self.kv_key(key)).await
    }

    /// Drops the counter, used when a route wants a clean slate.
    pub async fn reset(&self, key: &str) -> Result<()> {
        self.kv.delete(&self.kv_key(key)).await
    }

    async fn read(&self, kv_key: &str) -> Result<u64> {
        let value = self.kv.get_text(kv_key).await?;
        Ok(value
            .and_then(|text| text.trim().parse::<u64>().ok())
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryKv;

    fn counter(window: Duration) -> (Arc<MemoryKv>, WindowedCounter) {
        let kv = Arc::new(MemoryKv::new());
        let counter = WindowedCounter::new(kv.clone(), "ratelimit", window);
        (kv, counter)
    }

    #[tokio::test]
    async fn counts_monotonically_within_window() {
        let (_kv, counter) = counter(Duration::from_secs(60));
        for expected in 1..=5 {
            assert_eq!(counter.increment("1.2.3.4").await.unwrap(), expected);
        }
        assert_eq!(counter.current("1.2.3.4").await.unwrap(), 5);
        assert_eq!(counter.current("8.8.8.8").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn restarts_after_window_expiry() {
        let (_kv, counter) = counter(Duration::from_millis(40));
        assert_eq!(counter.increment("k").await.unwrap(), 1);
        assert_eq!(counter.increment("k").await.unwrap(), 2);
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(counter.increment("k").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn garbage_value_reads_as_zero() {
        let (kv, counter) = counter(Duration::from_secs(60));
        kv.put("ratelimit:k", b"not-a-number".to_vec(), None)
            .await
            .unwrap();
        assert_eq!(counter.current("k").await.unwrap(), 0);
        assert_eq!(counter.increment("k").await.unwrap(), 1);
    }
}
