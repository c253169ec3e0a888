use std::sync::Arc;

use async_trait::async_trait;
use metrics::counter;
use tracing::{debug, instrument, warn};

use crate::behavior::ReputationStore;
use crate::config::ReputationHandlerConfig;
use crate::core::decision::Action;
use crate::detectors::{severity_delta, META_SKIP_REPUTATION_UPDATE};
use crate::handlers::{Handler, HandlerContext};
use crate::storage::KvStore;
use crate::utils::error::Result;
use crate::utils::net::client_ip_string;

pub const HANDLER_NAME: &str = "reputation";

/// Applies a reputation delta for each real detection in the batch.
///
/// Results flagged `skipReputationUpdate` are excluded so reputation-driven
/// detections cannot feed themselves. Deltas sum per batch and are clamped
/// at `min_delta` so one request cannot crater a client. The record write
/// is read-modify-write; concurrent requests race and last write wins.
pub struct ReputationHandler {
    store: ReputationStore,
    use_confidence: bool,
    min_delta: i64,
}

impl ReputationHandler {
    pub fn new(kv: Arc<dyn KvStore>, config: &ReputationHandlerConfig) -> Self {
        Self {
            store: ReputationStore::new(kv).with_ttl(config.ttl()),
            use_confidence: config.use_confidence,
            min_delta: config.min_delta,
        }
    }
}

#[async_trait]
impl Handler for ReputationHandler {
    fn name(&self) -> &str {
        HANDLER_NAME
    }

    #[instrument(skip_all)]
    async fn execute(&self, _action: &Action, ctx: &HandlerContext<'_>) -> Result<()> {
        let relevant: Vec<_> = ctx
            .results
            .iter()
            .filter(|r| r.detected && !r.metadata_flag(META_SKIP_REPUTATION_UPDATE))
            .collect();
        if relevant.is_empty() {
            debug!("no reputation-relevant results in batch");
            return Ok(());
        }

        let Some(key) = ctx
            .context
            .client_key
            .clone()
            .or_else(|| client_ip_string(ctx.request))
        else {
            debug!("no client key for reputation update");
            return Ok(());
        };

        let mut delta: i64 = 0;
        for result in &relevant {
            let base = severity_delta(result.severity) as f64;
            let scaled = if self.use_confidence {
                base * result.confidence
            } else {
                base
            };
            delta += scaled.round() as i64;
        }
        let delta = delta.max(self.min_delta);

        let attack_types = relevant
            .iter()
            .map(|r| r.attack_type.as_str().to_string())
            .collect();

        match self.store.apply_delta(&key, delta, attack_types).await {
            Ok(record) => {
                counter!("sentinel.actions.reputation_updated", 1);
                debug!(key = %key, delta, score = record.score, "reputation applied");
            }
            Err(err) => {
                warn!(key = %key, error = %err, "reputation update failed");
            }
        }
        Ok(())
    }
}
