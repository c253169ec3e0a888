//! End-to-end scenarios over the in-memory storage adapters.

mod behavior_scenarios;
mod blocklist_flow;
mod pipeline_scenarios;

use std::sync::Arc;

use sentinel::config::SentinelConfig;
use sentinel::storage::{MemoryCache, MemoryKv, MemoryQueue};
use sentinel::{build_pipeline, Pipeline, Stores};

/// Shared test harness: one pipeline over fresh in-memory stores.
pub struct Harness {
    pub kv: Arc<MemoryKv>,
    pub edge: Arc<MemoryCache>,
    pub queue: Arc<MemoryQueue>,
    pub pipeline: Pipeline,
    pub config: SentinelConfig,
}

impl Harness {
    pub fn new(config: SentinelConfig) -> Self {
        let kv = Arc::new(MemoryKv::new());
        let edge = Arc::new(MemoryCache::new());
        let queue = Arc::new(MemoryQueue::new());
        let stores = Stores::new(kv.clone(), edge.clone(), queue.clone());
        let pipeline = build_pipeline(&config, &stores).expect("pipeline builds");
        Self {
            kv,
            edge,
            queue,
            pipeline,
            config,
        }
    }

    pub fn standard() -> Self {
        Self::new(SentinelConfig::default())
    }
}
