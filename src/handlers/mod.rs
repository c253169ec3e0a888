//! Handler capability: executors for resolved actions.
//!
//! Handlers run sequentially in registration order after the resolver
//! yields an action list. A handler failure is logged and counted; it
//! never blocks sibling handlers or alters the Decision.

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::core::decision::Action;
use crate::core::http::{HttpRequest, RequestContext};
use crate::core::score::ThreatScore;
use crate::detectors::DetectorResult;
use crate::utils::error::Result;

pub mod blocklist;
pub mod log;
pub mod notify;
pub mod reputation;

pub use blocklist::BlocklistHandler;
pub use log::LogHandler;
pub use notify::NotifyHandler;
pub use reputation::ReputationHandler;

/// Per-dispatch state shared with every handler.
///
/// Carries the request, the detector batch, and the score, plus a deferral
/// hook for work that should not hold up the response (spawned onto the
/// runtime; join handles are collected so tests can drain them).
pub struct HandlerContext<'a> {
    pub request: &'a HttpRequest,
    pub context: &'a RequestContext,
    pub score: &'a ThreatScore,
    pub results: &'a [DetectorResult],
    deferred: Mutex<Vec<JoinHandle<()>>>,
}

impl<'a> HandlerContext<'a> {
    pub fn new(
        request: &'a HttpRequest,
        context: &'a RequestContext,
        score: &'a ThreatScore,
    ) -> Self {
        Self {
            request,
            context,
            score,
            results: &score.results,
            deferred: Mutex::new(Vec::new()),
        }
    }

    /// Schedules after-response work on the runtime.
    pub fn defer<F>(&self, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        self.deferred.lock().push(tokio::spawn(future));
    }

    /// Awaits everything deferred so far. Tests and the CLI use this;
    /// servers let the work run behind the response.
    pub async fn drain_deferred(&self) {
        let handles: Vec<_> = std::mem::take(&mut *self.deferred.lock());
        for handle in handles {
            let _ = handle.await;
        }
    }
}

/// Executor for one action kind.
#[async_trait]
pub trait Handler: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(&self, action: &Action, ctx: &HandlerContext<'_>) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::http::HttpRequest;
    use crate::core::score::ThreatScore;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn deferred_work_runs_on_drain() {
        let request = HttpRequest::get("/");
        let context = RequestContext::new();
        let score = ThreatScore::empty();
        let ctx = HandlerContext::new(&request, &context, &score);

        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        ctx.defer(async move {
            flag.store(true, Ordering::SeqCst);
        });

        ctx.drain_deferred().await;
        assert!(ran.load(Ordering::SeqCst));
    }
}
