use std::sync::Arc;

use metrics::counter;
use time::OffsetDateTime;
use tracing::{info, instrument, warn};

use crate::blocklist::{write_snapshot, CuckooFilter};
use crate::config::BlocklistConfig;
use crate::storage::KvStore;
use crate::utils::epoch_ms;
use crate::utils::error::Result;

/// What a rebuild saw and produced.
#[derive(Debug, Clone, Default)]
pub struct RebuildSummary {
    pub scanned: usize,
    pub inserted: usize,
    pub skipped_expired: usize,
    pub capacity_drops: usize,
    pub version: String,
}

/// Scheduled reconstruction of the filter from the KV source of truth.
///
/// Scans every `{prefix}` key cursor-paginated, skips entries already past
/// their expiration, and writes a fresh snapshot with a `rebuild-` version.
/// Idempotent: re-running produces an equivalent snapshot. Readers may see
/// the previous cached filter for up to `filter_cache_ttl` afterwards.
pub struct FilterRebuilder {
    kv: Arc<dyn KvStore>,
    config: BlocklistConfig,
}

impl FilterRebuilder {
    pub fn new(kv: Arc<dyn KvStore>, config: BlocklistConfig) -> Self {
        Self { kv, config }
    }

    #[instrument(skip(self))]
    pub async fn rebuild(&self) -> Result<RebuildSummary> {
        let mut filter = CuckooFilter::new(self.config.filter_capacity);
        let mut summary = RebuildSummary::default();
        let now_secs = OffsetDateTime::now_utc().unix_timestamp();

        let mut cursor: Option<String> = None;
        loop {
            let page = self
                .kv
                .list(&self.config.key_prefix, cursor.as_deref())
                .await?;

            for key in &page.keys {
                summary.scanned += 1;
                if key.expiration.is_some_and(|at| at <= now_secs) {
                    summary.skipped_expired += 1;
                    continue;
                }
                let raw_key = &key.name[self.config.key_prefix.len()..];
                if filter.add(raw_key) {
                    summary.inserted += 1;
                } else {
                    summary.capacity_drops += 1;
                    counter!("sentinel.blocklist.rebuild_capacity_drop", 1);
                    warn!(key = raw_key, "filter full during rebuild, key dropped");
                }
            }

            if page.list_complete {
                break;
            }
            cursor = page.cursor;
        }

        summary.version = write_snapshot(
            self.kv.as_ref(),
            &filter,
            format!("rebuild-{}", epoch_ms()),
        )
        .await?;

        info!(
            scanned = summary.scanned,
            inserted = summary.inserted,
            skipped_expired = summary.skipped_expired,
            capacity_drops = summary.capacity_drops,
            version = %summary.version,
            "filter rebuilt from source of truth"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocklist::{load_snapshot, BlockRecord};
    use crate::storage::MemoryKv;
    use std::time::Duration;

    #[tokio::test]
    async fn rebuild_reflects_live_records() {
        let kv = Arc::new(MemoryKv::new());
        for ip in ["1.2.3.4", "5.6.7.8", "9.9.9.9"] {
            let record = BlockRecord::new("Spam", 3600);
            kv.put(
                &format!("blocked:{ip}"),
                record.to_bytes().unwrap(),
                Some(Duration::from_secs(3600)),
            )
            .await
            .unwrap();
        }
        // Unrelated keys must not leak into the filter.
        kv.put("reputation:1.2.3.4", b"{}".to_vec(), None)
            .await
            .unwrap();

        let rebuilder = FilterRebuilder::new(kv.clone(), BlocklistConfig::default());
        let summary = rebuilder.rebuild().await.unwrap();

        assert_eq!(summary.scanned, 3);
        assert_eq!(summary.inserted, 3);
        assert!(summary.version.starts_with("rebuild-"));

        let filter = load_snapshot(kv.as_ref()).await.unwrap().unwrap();
        for ip in ["1.2.3.4", "5.6.7.8", "9.9.9.9"] {
            assert!(filter.contains(ip));
        }
        assert!(!filter.contains("reputation:1.2.3.4"));
    }

    #[tokio::test]
    async fn rebuild_is_idempotent() {
        let kv = Arc::new(MemoryKv::new());
        kv.put(
            "blocked:1.2.3.4",
            BlockRecord::new("Spam", 3600).to_bytes().unwrap(),
            None,
        )
        .await
        .unwrap();

        let rebuilder = FilterRebuilder::new(kv.clone(), BlocklistConfig::default());
        let first = rebuilder.rebuild().await.unwrap();
        let second = rebuilder.rebuild().await.unwrap();
        assert_eq!(first.inserted, second.inserted);

        let filter = load_snapshot(kv.as_ref()).await.unwrap().unwrap();
        assert!(filter.contains("1.2.3.4"));
        assert_eq!(filter.len(), 1);
    }

    #[tokio::test]
    async fn empty_kv_still_writes_empty_snapshot() {
        let kv = Arc::new(MemoryKv::new());
        let rebuilder = FilterRebuilder::new(kv.clone(), BlocklistConfig::default());
        let summary = rebuilder.rebuild().await.unwrap();
        assert_eq!(summary.scanned, 0);

        let filter = load_snapshot(kv.as_ref()).await.unwrap().unwrap();
        assert!(filter.is_empty());
    }
}
