use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use lru::LruCache;
use metrics::counter;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, warn};

use crate::blocklist::{
    filter_cache_url, kv_key, load_snapshot, CuckooFilter, KeyExtractor, PendingCache, StoredBlock,
};
use crate::config::{BlocklistConfig, BlocklistMode};
use crate::core::http::{HttpRequest, RequestContext};
use crate::detectors::{
    AttackType, Detector, DetectorResult, Evidence, Severity, META_BLOCK_KEY,
    META_SKIP_BLOCKLIST_UPDATE,
};
use crate::storage::{EdgeCache, KvStore};
use crate::utils::net::client_ip_string;

pub const DETECTOR_NAME: &str = "blocklist";
pub const DEFAULT_PRIORITY: u8 = 100;

// Direct-mode read-through cache size (entries).
const READ_CACHE_ENTRIES: usize = 4096;

struct CachedLookup {
    stored: Option<StoredBlock>,
    fetched_at: Instant,
}

/// Reads the replicated blocklist for each request.
///
/// Direct mode is a KV lookup behind a read-through cache. Cuckoo mode goes
/// pending cache → filter membership → KV verification; KV stays the source
/// of truth, so a filter hit that KV cannot confirm is treated as a false
/// positive and never blocks. Every positive result carries
/// `skipBlocklistUpdate` so the write path cannot re-block the same key in
/// a loop.
pub struct BlocklistDetector {
    kv: Arc<dyn KvStore>,
    edge_cache: Arc<dyn EdgeCache>,
    pending: PendingCache,
    config: BlocklistConfig,
    key_extractor: Option<KeyExtractor>,
    read_cache: Mutex<LruCache<String, CachedLookup>>,
}

impl BlocklistDetector {
    pub fn new(
        kv: Arc<dyn KvStore>,
        edge_cache: Arc<dyn EdgeCache>,
        config: BlocklistConfig,
    ) -> Self {
        let pending = PendingCache::new(
            edge_cache.clone(),
            config.cache_host.clone(),
            config.pending_ttl(),
        );
        Self {
            kv,
            edge_cache,
            pending,
            config,
            key_extractor: None,
            read_cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(READ_CACHE_ENTRIES).expect("nonzero cache size"),
            )),
        }
    }

    /// Overrides the default client-IP key derivation.
    pub fn with_key_extractor(mut self, extractor: KeyExtractor) -> Self {
        self.key_extractor = Some(extractor);
        self
    }

    fn key_for(&self, request: &HttpRequest, context: &RequestContext) -> Option<String> {
        if let Some(key) = &context.client_key {
            return Some(key.clone());
        }
        match &self.key_extractor {
            Some(extractor) => extractor(request),
            None => client_ip_string(request),
        }
    }

    fn blocked_result(&self, raw_key: &str, reason: String, detail: Option<i64>) -> DetectorResult {
        let full_key = kv_key(&self.config.key_prefix, raw_key);
        let mut result = DetectorResult::new(AttackType::Blocklist, Severity::Critical, 1.0)
            .with_evidence(Evidence {
                field: "client".to_string(),
                value: raw_key.to_string(),
                pattern: reason,
                raw_content: None,
            })
            .with_metadata(META_SKIP_BLOCKLIST_UPDATE, Value::Bool(true))
            .with_metadata(META_BLOCK_KEY, Value::String(full_key));
        if let Some(blocked_at) = detail {
            result = result.with_metadata("blockedAt", Value::from(blocked_at));
        }
        counter!("sentinel.blocklist.hits", 1);
        result
    }

    /// Direct-mode lookup with the read-through cache.
    async fn lookup_direct(&self, raw_key: &str) -> Option<StoredBlock> {
        let full_key = kv_key(&self.config.key_prefix, raw_key);
        {
            let mut cache = self.read_cache.lock();
            if let Some(entry) = cache.get(&full_key) {
                if entry.fetched_at.elapsed() < self.config.read_cache_ttl() {
                    return entry.stored.clone();
                }
                cache.pop(&full_key);
            }
        }

        let stored = match self.kv.get(&full_key).await {
            Ok(Some(bytes)) => Some(StoredBlock::parse(&bytes)),
            Ok(None) => None,
            Err(err) => {
                warn!(key = %full_key, error = %err, "blocklist read failed, failing open");
                return None;
            }
        };

        self.read_cache.lock().put(
            full_key,
            CachedLookup {
                stored: stored.clone(),
                fetched_at: Instant::now(),
            },
        );
        stored
    }

    /// Fetches the filter: edge cache first, then the KV snapshot.
    async fn load_filter(&self) -> Option<CuckooFilter> {
        let url = filter_cache_url(&self.config.cache_host);
        match self.edge_cache.get(&url).await {
            Ok(Some(bytes)) => match CuckooFilter::from_bytes(&bytes) {
                Ok(filter) => return Some(filter),
                Err(err) => {
                    warn!(error = %err, "cached filter unreadable, reloading from KV");
                }
            },
            Ok(None) => {}
            Err(err) => {
                warn!(error = %err, "edge cache unavailable for filter");
            }
        }

        let filter = match load_snapshot(self.kv.as_ref()).await {
            Ok(Some(filter)) => filter,
            Ok(None) => return None,
            Err(err) => {
                warn!(error = %err, "filter snapshot unreadable");
                return None;
            }
        };

        if let Err(err) = self
            .edge_cache
            .put(&url, filter.to_bytes(), self.config.filter_cache_ttl())
            .await
        {
            warn!(error = %err, "failed to cache filter at edge");
        }
        Some(filter)
    }

    async fn verify_against_kv(&self, raw_key: &str) -> Option<StoredBlock> {
        let full_key = kv_key(&self.config.key_prefix, raw_key);
        match self.kv.get(&full_key).await {
            Ok(Some(bytes)) => Some(StoredBlock::parse(&bytes)),
            Ok(None) => None,
            Err(err) => {
                warn!(key = %full_key, error = %err, "blocklist verification failed, failing open");
                None
            }
        }
    }

    async fn detect_cuckoo(&self, raw_key: &str) -> Option<DetectorResult> {
        // Tier 1: pending cache.
        match self.pending.has(raw_key).await {
            Ok(true) => {
                if self.config.verify_with_kv {
                    match self.verify_against_kv(raw_key).await {
                        Some(stored) => {
                            return Some(self.blocked_result(
                                raw_key,
                                format!("Pending block (verified): {}", stored.reason()),
                                stored.blocked_at(),
                            ));
                        }
                        None => {
                            // Stale marker; drop it and fall through to the filter.
                            if let Err(err) = self.pending.clear(raw_key).await {
                                warn!(error = %err, "stale pending entry not cleared");
                            }
                            debug!(key = raw_key, "stale pending entry dropped");
                        }
                    }
                } else {
                    return Some(self.blocked_result(
                        raw_key,
                        "Pending block (immediate)".to_string(),
                        None,
                    ));
                }
            }
            Ok(false) => {}
            Err(err) => {
                warn!(error = %err, "pending cache unavailable");
            }
        }

        // Tier 2: filter membership.
        let filter = match self.load_filter().await {
            Some(filter) => filter,
            // No snapshot yet: direct lookup for this request only.
            None => {
                let stored = self.lookup_direct(raw_key).await?;
                return Some(self.blocked_result(raw_key, stored.reason(), stored.blocked_at()));
            }
        };
        if !filter.contains(raw_key) {
            return None;
        }

        // Tier 3: KV verification of the filter hit.
        if self.config.verify_with_kv {
            match self.verify_against_kv(raw_key).await {
                Some(stored) => {
                    Some(self.blocked_result(raw_key, stored.reason(), stored.blocked_at()))
                }
                None => {
                    counter!("sentinel.blocklist.filter_false_positive", 1);
                    debug!(key = raw_key, "filter false positive, not blocking");
                    None
                }
            }
        } else {
            Some(self.blocked_result(raw_key, "Blocked (filter)".to_string(), None))
        }
    }
}

#[async_trait]
impl Detector for BlocklistDetector {
    fn name(&self) -> &str {
        DETECTOR_NAME
    }

    fn priority(&self) -> u8 {
        DEFAULT_PRIORITY
    }

    fn enabled(&self) -> bool {
        self.config.enabled
    }

    async fn detect_request(
        &self,
        request: &HttpRequest,
        context: &RequestContext,
    ) -> Option<DetectorResult> {
        let raw_key = self.key_for(request, context)?;
        match self.config.mode {
            BlocklistMode::Direct => {
                let stored = self.lookup_direct(&raw_key).await?;
                Some(self.blocked_result(&raw_key, stored.reason(), stored.blocked_at()))
            }
            BlocklistMode::Cuckoo => self.detect_cuckoo(&raw_key).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocklist::{write_snapshot, BlockRecord};
    use crate::storage::{MemoryCache, MemoryKv};

    fn request_from(ip: &str) -> HttpRequest {
        HttpRequest::get("/").with_header("cf-connecting-ip", ip)
    }

    fn direct_config() -> BlocklistConfig {
        BlocklistConfig::default()
    }

    fn cuckoo_config(verify: bool) -> BlocklistConfig {
        BlocklistConfig {
            mode: BlocklistMode::Cuckoo,
            verify_with_kv: verify,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn direct_mode_blocks_listed_ip() {
        let kv = Arc::new(MemoryKv::new());
        kv.put("blocked:1.2.3.4", b"Spam".to_vec(), None).await.unwrap();
        let detector =
            BlocklistDetector::new(kv, Arc::new(MemoryCache::new()), direct_config());

        let result = detector
            .detect_request(&request_from("1.2.3.4"), &RequestContext::new())
            .await
            .expect("listed ip blocks");
        assert_eq!(result.attack_type, AttackType::Blocklist);
        assert_eq!(result.severity, Severity::Critical);
        assert_eq!(result.confidence, 1.0);
        assert!(result.metadata_flag(META_SKIP_BLOCKLIST_UPDATE));
        assert_eq!(
            result.metadata.get(META_BLOCK_KEY).unwrap().as_str().unwrap(),
            "blocked:1.2.3.4"
        );
        assert_eq!(result.evidence.as_ref().unwrap().pattern, "Spam");
    }

    #[tokio::test]
    async fn direct_mode_unlisted_ip_passes() {
        let detector = BlocklistDetector::new(
            Arc::new(MemoryKv::new()),
            Arc::new(MemoryCache::new()),
            direct_config(),
        );
        assert!(detector
            .detect_request(&request_from("8.8.8.8"), &RequestContext::new())
            .await
            .is_none());
    }

    #[tokio::test]
    async fn direct_mode_read_through_cache_serves_stale() {
        let kv = Arc::new(MemoryKv::new());
        kv.put("blocked:1.2.3.4", b"Spam".to_vec(), None).await.unwrap();
        let detector = BlocklistDetector::new(
            kv.clone(),
            Arc::new(MemoryCache::new()),
            direct_config(),
        );

        assert!(detector
            .detect_request(&request_from("1.2.3.4"), &RequestContext::new())
            .await
            .is_some());
        // Delete the record; the cached verdict stays for the TTL.
        kv.delete("blocked:1.2.3.4").await.unwrap();
        assert!(detector
            .detect_request(&request_from("1.2.3.4"), &RequestContext::new())
            .await
            .is_some());
    }

    #[tokio::test]
    async fn cuckoo_mode_cold_start_loads_and_caches_filter() {
        let kv = Arc::new(MemoryKv::new());
        let edge = Arc::new(MemoryCache::new());
        let mut filter = CuckooFilter::new(1000);
        filter.add("9.9.9.9");
        write_snapshot(kv.as_ref(), &filter, "1".into()).await.unwrap();

        let detector = BlocklistDetector::new(kv, edge.clone(), cuckoo_config(true));
        assert!(detector
            .detect_request(&request_from("8.8.8.8"), &RequestContext::new())
            .await
            .is_none());

        // Filter now cached at the edge.
        let url = filter_cache_url("sentinel.internal");
        assert!(edge.get(&url).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn cuckoo_filter_hit_verified_against_kv() {
        let kv = Arc::new(MemoryKv::new());
        let mut filter = CuckooFilter::new(1000);
        filter.add("1.2.3.4");
        write_snapshot(kv.as_ref(), &filter, "1".into()).await.unwrap();
        let record = BlockRecord::new("Abuse", 3600);
        kv.put("blocked:1.2.3.4", record.to_bytes().unwrap(), None)
            .await
            .unwrap();

        let detector =
            BlocklistDetector::new(kv, Arc::new(MemoryCache::new()), cuckoo_config(true));
        let result = detector
            .detect_request(&request_from("1.2.3.4"), &RequestContext::new())
            .await
            .unwrap();
        assert_eq!(result.evidence.as_ref().unwrap().pattern, "Abuse");
    }

    #[tokio::test]
    async fn cuckoo_false_positive_is_not_blocked_when_verifying() {
        let kv = Arc::new(MemoryKv::new());
        let mut filter = CuckooFilter::new(1000);
        filter.add("1.2.3.4"); // in filter, but no KV record
        write_snapshot(kv.as_ref(), &filter, "1".into()).await.unwrap();

        let detector =
            BlocklistDetector::new(kv, Arc::new(MemoryCache::new()), cuckoo_config(true));
        assert!(detector
            .detect_request(&request_from("1.2.3.4"), &RequestContext::new())
            .await
            .is_none());
    }

    #[tokio::test]
    async fn cuckoo_false_positive_blocks_without_verification() {
        let kv = Arc::new(MemoryKv::new());
        let mut filter = CuckooFilter::new(1000);
        filter.add("1.2.3.4");
        write_snapshot(kv.as_ref(), &filter, "1".into()).await.unwrap();

        let detector =
            BlocklistDetector::new(kv, Arc::new(MemoryCache::new()), cuckoo_config(false));
        assert!(detector
            .detect_request(&request_from("1.2.3.4"), &RequestContext::new())
            .await
            .is_some());
    }

    #[tokio::test]
    async fn pending_hit_verified_and_stale_marker_cleared() {
        let kv = Arc::new(MemoryKv::new());
        let edge = Arc::new(MemoryCache::new());
        let config = cuckoo_config(true);
        let edge_dyn: Arc<dyn EdgeCache> = edge.clone();
        let pending = PendingCache::new(edge_dyn, config.cache_host.clone(), config.pending_ttl());
        pending
            .mark("1.2.3.4", Duration::from_secs(300))
            .await
            .unwrap();

        // Stale: no KV record behind the marker, and no snapshot either, so
        // the request falls through to a direct lookup and passes.
        let detector = BlocklistDetector::new(kv.clone(), edge.clone(), config.clone());
        assert!(detector
            .detect_request(&request_from("1.2.3.4"), &RequestContext::new())
            .await
            .is_none());
        assert!(!pending.has("1.2.3.4").await.unwrap());

        // Marker with a real record behind it verifies and blocks.
        pending
            .mark("5.6.7.8", Duration::from_secs(300))
            .await
            .unwrap();
        kv.put(
            "blocked:5.6.7.8",
            BlockRecord::new("Flood", 600).to_bytes().unwrap(),
            None,
        )
        .await
        .unwrap();
        let result = detector
            .detect_request(&request_from("5.6.7.8"), &RequestContext::new())
            .await
            .unwrap();
        assert!(result
            .evidence
            .as_ref()
            .unwrap()
            .pattern
            .starts_with("Pending block (verified)"));
    }

    #[tokio::test]
    async fn no_snapshot_falls_back_to_direct_lookup() {
        let kv = Arc::new(MemoryKv::new());
        kv.put("blocked:1.2.3.4", b"Spam".to_vec(), None).await.unwrap();

        let detector = BlocklistDetector::new(
            kv,
            Arc::new(MemoryCache::new()),
            cuckoo_config(true),
        );
        assert!(detector
            .detect_request(&request_from("1.2.3.4"), &RequestContext::new())
            .await
            .is_some());
    }

    #[tokio::test]
    async fn custom_key_extractor() {
        let kv = Arc::new(MemoryKv::new());
        kv.put("blocked:tenant-7", b"true".to_vec(), None).await.unwrap();
        let extractor: KeyExtractor = Arc::new(|request: &HttpRequest| {
            request.header("x-tenant-id").map(|t| format!("tenant-{t}"))
        });
        let detector = BlocklistDetector::new(
            kv,
            Arc::new(MemoryCache::new()),
            direct_config(),
        )
        .with_key_extractor(extractor);

        let request = HttpRequest::get("/").with_header("x-tenant-id", "7");
        let result = detector
            .detect_request(&request, &RequestContext::new())
            .await
            .unwrap();
        assert_eq!(result.evidence.as_ref().unwrap().pattern, "Blocked");
    }
}
