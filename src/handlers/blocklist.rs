use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use metrics::counter;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::blocklist::{kv_key, BlockQueueMessage, BlockRecord, KeyExtractor, PendingCache};
use crate::config::BlocklistConfig;
use crate::core::decision::Action;
use crate::detectors::{attack_type_csv, META_SKIP_BLOCKLIST_UPDATE};
use crate::handlers::{Handler, HandlerContext};
use crate::storage::{BlockQueue, EdgeCache, KvStore};
use crate::utils::epoch_ms;
use crate::utils::error::Result;
use crate::utils::net::client_ip_string;

pub const HANDLER_NAME: &str = "blocklist";

/// Executes block actions: pending cache, then KV, then the queue.
///
/// The write order is load-bearing. The pending marker makes the block
/// effective at this edge immediately; the KV record is the source of
/// truth; the queue message replicates membership into the shared filter.
/// The queue message is only sent once the KV write succeeded — if KV
/// fails, the handler logs and abandons, leaving at worst a short-lived
/// pending marker (over-blocking at one edge, never under-recording).
pub struct BlocklistHandler {
    kv: Arc<dyn KvStore>,
    queue: Arc<dyn BlockQueue>,
    pending: PendingCache,
    config: BlocklistConfig,
    key_extractor: Option<KeyExtractor>,
}

impl BlocklistHandler {
    pub fn new(
        kv: Arc<dyn KvStore>,
        edge_cache: Arc<dyn EdgeCache>,
        queue: Arc<dyn BlockQueue>,
        config: BlocklistConfig,
    ) -> Self {
        let pending = PendingCache::new(
            edge_cache,
            config.cache_host.clone(),
            config.pending_ttl(),
        );
        Self {
            kv,
            queue,
            pending,
            config,
            key_extractor: None,
        }
    }

    pub fn with_key_extractor(mut self, extractor: KeyExtractor) -> Self {
        self.key_extractor = Some(extractor);
        self
    }

    fn block_ttl(&self, action: &Action) -> Duration {
        action
            .data
            .get("duration")
            .and_then(Value::as_u64)
            .map(Duration::from_secs)
            .unwrap_or_else(|| self.config.block_ttl())
    }

    fn reason(&self, action: &Action, ctx: &HandlerContext<'_>) -> String {
        if let Some(reason) = action.data.get("reason").and_then(Value::as_str) {
            return reason.to_string();
        }
        format!("Blocked by Sentinel: {}", attack_type_csv(ctx.results))
    }
}

#[async_trait]
impl Handler for BlocklistHandler {
    fn name(&self) -> &str {
        HANDLER_NAME
    }

    #[instrument(skip_all)]
    async fn execute(&self, action: &Action, ctx: &HandlerContext<'_>) -> Result<()> {
        // A batch produced purely by the blocklist detector must not
        // re-block its own key.
        if !ctx.results.is_empty()
            && ctx
                .results
                .iter()
                .all(|r| r.metadata_flag(META_SKIP_BLOCKLIST_UPDATE))
        {
            debug!("all results flagged skipBlocklistUpdate, no write");
            return Ok(());
        }

        let raw_key = match &self.key_extractor {
            Some(extractor) => extractor(ctx.request),
            None => ctx
                .context
                .client_key
                .clone()
                .or_else(|| client_ip_string(ctx.request)),
        };
        let Some(raw_key) = raw_key else {
            debug!("no blockable key for request, skipping");
            return Ok(());
        };

        let ttl = self.block_ttl(action);
        let reason = self.reason(action, ctx);

        // 1. Pending marker: ~0 ms effect at this edge.
        if let Err(err) = self.pending.mark(&raw_key, ttl).await {
            warn!(key = %raw_key, error = %err, "pending mark failed, continuing to KV");
        }

        // 2. KV record, the source of truth.
        let mut record = BlockRecord::new(reason.clone(), ttl.as_secs());
        record.score = Some(ctx.score.score);
        let attack_types: Vec<String> = ctx
            .results
            .iter()
            .map(|r| r.attack_type.as_str().to_string())
            .collect();
        if !attack_types.is_empty() {
            record.attack_types = Some(attack_types.clone());
        }
        let full_key = kv_key(&self.config.key_prefix, &raw_key);
        if let Err(err) = self
            .kv
            .put(&full_key, record.to_bytes()?, Some(ttl))
            .await
        {
            // Abandon: the pending marker expires on its own TTL.
            warn!(key = %full_key, error = %err, "block record write failed, abandoning");
            counter!("sentinel.blocklist.write_failed", 1);
            return Ok(());
        }

        // 3. Replication, only after KV succeeded.
        let mut message = BlockQueueMessage::add(raw_key.clone());
        message.reason = Some(reason);
        message.expires_at = Some(epoch_ms() + ttl.as_millis() as i64);
        message.score = Some(ctx.score.score);
        if !attack_types.is_empty() {
            message.attack_types = Some(attack_types);
        }
        if let Err(err) = self.queue.send(message.to_bytes()?).await {
            warn!(key = %raw_key, error = %err, "queue publish failed; rebuild will reconcile");
        }

        counter!("sentinel.blocklist.blocks", 1);
        info!(key = %raw_key, ttl_secs = ttl.as_secs(), "key blocked");
        Ok(())
    }
}
