//! Sentinel — a programmable web application firewall core.
//!
//! Inbound requests run through a priority-ordered detector pipeline that
//! short-circuits on the first positive detection, aggregates it into a
//! 0–100 threat score, resolves the score against cascading threshold
//! levels, and dispatches the resulting actions (log, notify, block,
//! reputation update) to registered handlers. A two-mode blocklist keeps a
//! globally replicated deny set: a durable KV store of truth fronted by a
//! cuckoo-filter snapshot and per-edge pending markers, reconciled through
//! an asynchronous queue and a scheduled rebuild.
//!
//! ```no_run
//! use std::sync::Arc;
//! use sentinel::config::SentinelConfig;
//! use sentinel::core::{ActionKind, HttpRequest, RequestContext};
//! use sentinel::storage::{MemoryCache, MemoryKv, MemoryQueue};
//!
//! # #[tokio::main]
//! # async fn main() -> sentinel::Result<()> {
//! let config = SentinelConfig::default();
//! let stores = sentinel::Stores::new(
//!     Arc::new(MemoryKv::new()),
//!     Arc::new(MemoryCache::new()),
//!     Arc::new(MemoryQueue::new()),
//! );
//! let pipeline = sentinel::build_pipeline(&config, &stores)?;
//!
//! let request = HttpRequest::get("/search?q=1%27%20OR%201%3D1%20--");
//! let decision = pipeline.process(&request, &RequestContext::new()).await;
//! if decision.has(&ActionKind::Block) {
//!     // deny the request
//! }
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

pub mod behavior;
pub mod blocklist;
pub mod cli;
pub mod config;
pub mod core;
pub mod detectors;
pub mod handlers;
pub mod storage;
pub mod utils;

pub use crate::core::{Decision, Pipeline};
pub use crate::utils::error::{Result, SentinelError};

use crate::config::SentinelConfig;
use crate::core::score::MaxScoreAggregator;
use crate::detectors::{
    BlocklistDetector, CommandInjectionDetector, Detector, EntropyDetector,
    FailureThresholdDetector, JwtDetector, NoSqlInjectionDetector, OpenRedirectDetector,
    PathTraversalDetector, RateLimitDetector, ReputationDetector, SmugglingDetector,
    SqlInjectionDetector, SsrfDetector, SstiDetector, XssDetector, XxeDetector,
};
use crate::handlers::{BlocklistHandler, LogHandler, NotifyHandler, ReputationHandler};
use crate::storage::{BlockQueue, EdgeCache, KvStore};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// The external capabilities one pipeline instance talks to.
#[derive(Clone)]
pub struct Stores {
    pub kv: Arc<dyn KvStore>,
    pub edge_cache: Arc<dyn EdgeCache>,
    pub queue: Arc<dyn BlockQueue>,
}

impl Stores {
    pub fn new(
        kv: Arc<dyn KvStore>,
        edge_cache: Arc<dyn EdgeCache>,
        queue: Arc<dyn BlockQueue>,
    ) -> Self {
        Self {
            kv,
            edge_cache,
            queue,
        }
    }
}

/// Assembles the full built-in pipeline from configuration: every enabled
/// detector, the max-score aggregator, the configured threshold table and
/// route overrides, and the standard handler set.
pub fn build_pipeline(config: &SentinelConfig, stores: &Stores) -> Result<Pipeline> {
    let d = &config.detectors;

    let mut detectors: Vec<Arc<dyn Detector>> = vec![
        Arc::new(BlocklistDetector::new(
            stores.kv.clone(),
            stores.edge_cache.clone(),
            config.blocklist.clone(),
        )),
        Arc::new(SqlInjectionDetector::new(&d.sql_injection)),
        Arc::new(XssDetector::new(&d.xss)),
        Arc::new(PathTraversalDetector::new(&d.path_traversal)),
        Arc::new(CommandInjectionDetector::new(&d.command_injection)),
        Arc::new(NoSqlInjectionDetector::new(&d.nosql_injection)),
        Arc::new(SsrfDetector::new(&d.ssrf)),
        Arc::new(XxeDetector::new(&d.xxe)),
        Arc::new(SstiDetector::new(&d.ssti)),
        Arc::new(OpenRedirectDetector::new(&d.open_redirect)),
        Arc::new(JwtDetector::new(&d.jwt)),
        Arc::new(SmugglingDetector::new(&d.smuggling)),
        Arc::new(EntropyDetector::new(&d.entropy)),
        Arc::new(RateLimitDetector::new(stores.kv.clone(), &d.rate_limit)),
        Arc::new(ReputationDetector::new(stores.kv.clone(), &d.reputation)),
        Arc::new(FailureThresholdDetector::brute_force(
            stores.kv.clone(),
            &d.brute_force,
        )),
    ];
    if d.failure_threshold.enabled {
        detectors.push(Arc::new(FailureThresholdDetector::new(
            stores.kv.clone(),
            &d.failure_threshold,
        )));
    }

    let mut builder = Pipeline::builder()
        .detect_all(detectors)
        .score(Arc::new(MaxScoreAggregator))
        .resolve(config.thresholds.resolver()?)
        .routes(config.thresholds.route_matcher())
        .on("log", Arc::new(LogHandler::new()))
        .on(
            "block",
            Arc::new(BlocklistHandler::new(
                stores.kv.clone(),
                stores.edge_cache.clone(),
                stores.queue.clone(),
                config.blocklist.clone(),
            )),
        )
        .on(
            "update_reputation",
            Arc::new(ReputationHandler::new(
                stores.kv.clone(),
                &config.reputation,
            )),
        );

    if config.notify.enabled {
        builder = builder.on(
            "notify",
            Arc::new(
                NotifyHandler::with_timeout(
                    config.notify.webhook_url.clone(),
                    config.notify.timeout(),
                )
                .with_retries(config.notify.retries),
            ),
        );
    }

    builder.build()
}
