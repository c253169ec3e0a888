use std::sync::Arc;

use metrics::counter;
use tracing::{info, instrument, warn};

use crate::blocklist::{
    kv_key, load_snapshot, write_snapshot, BlockQueueMessage, CuckooFilter, QueueAction,
};
use crate::config::BlocklistConfig;
use crate::storage::KvStore;
use crate::utils::epoch_ms;
use crate::utils::error::Result;

/// Outcome for one message in a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageDisposition {
    Ack,
    Retry,
}

/// What a batch did, for logging and tests.
#[derive(Debug, Clone)]
pub struct BatchSummary {
    pub dispositions: Vec<MessageDisposition>,
    pub filter_version: Option<String>,
    pub added: usize,
    pub removed: usize,
}

/// Consumes replication messages and folds them into the shared filter.
///
/// The consumer is the only writer of the filter snapshot; readers hold
/// their own deserialized copies. When a batch leaves the filter dirty, the
/// snapshot and a fresh version are persisted before any disposition is
/// returned, keeping the snapshot/version pairing intact.
pub struct BlocklistConsumer {
    kv: Arc<dyn KvStore>,
    config: BlocklistConfig,
}

impl BlocklistConsumer {
    pub fn new(kv: Arc<dyn KvStore>, config: BlocklistConfig) -> Self {
        Self { kv, config }
    }

    /// Processes one batch of queue messages.
    ///
    /// `add` inserts into the filter unless already present; saturation is
    /// logged and acked (the key re-enters on the next rebuild). `remove`
    /// drops filter membership and deletes the KV record; a failed KV
    /// delete retries that message. A failed snapshot persist fails the
    /// whole batch so the shell redelivers it.
    #[instrument(skip(self, batch), fields(batch_len = batch.len()))]
    pub async fn process_batch(&self, batch: &[BlockQueueMessage]) -> Result<BatchSummary> {
        let mut filter = match load_snapshot(self.kv.as_ref()).await? {
            Some(filter) => filter,
            None => CuckooFilter::new(self.config.filter_capacity),
        };

        let mut dispositions = Vec::with_capacity(batch.len());
        let mut dirty = false;
        let mut added = 0;
        let mut removed = 0;

        for message in batch {
            match message.action {
                QueueAction::Add => {
                    if filter.contains(&message.key) {
                        dispositions.push(MessageDisposition::Ack);
                        continue;
                    }
                    if filter.add(&message.key) {
                        dirty = true;
                        added += 1;
                    } else {
                        // Key is parked in the victim slot; still queryable.
                        dirty = true;
                        counter!("sentinel.blocklist.filter_full", 1);
                        warn!(
                            key = %message.key,
                            capacity = filter.capacity(),
                            "filter at capacity, key parked until next rebuild"
                        );
                    }
                    dispositions.push(MessageDisposition::Ack);
                }
                QueueAction::Remove => {
                    if filter.remove(&message.key) {
                        dirty = true;
                        removed += 1;
                    }
                    let record_key = kv_key(&self.config.key_prefix, &message.key);
                    match self.kv.delete(&record_key).await {
                        Ok(()) => dispositions.push(MessageDisposition::Ack),
                        Err(err) => {
                            warn!(key = %record_key, error = %err, "block record delete failed, retrying message");
                            dispositions.push(MessageDisposition::Retry);
                        }
                    }
                }
            }
        }

        let filter_version = if dirty {
            let version = write_snapshot(self.kv.as_ref(), &filter, epoch_ms().to_string()).await?;
            Some(version)
        } else {
            None
        };

        counter!("sentinel.blocklist.consumed", batch.len() as u64);
        info!(added, removed, dirty, "blocklist batch processed");
        Ok(BatchSummary {
            dispositions,
            filter_version,
            added,
            removed,
        })
    }
}
