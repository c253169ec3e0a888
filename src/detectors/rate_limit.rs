use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::behavior::WindowedCounter;
use crate::config::RateLimitConfig;
use crate::core::http::{HttpRequest, RequestContext};
use crate::detectors::{AttackType, Detector, DetectorResult, Evidence, Severity};
use crate::storage::KvStore;
use crate::utils::net::client_ip_string;

pub const DETECTOR_NAME: &str = "rate-limit";
pub const DEFAULT_PRIORITY: u8 = 55;

/// Per-key request budget over a sliding window.
///
/// Counts in KV via `WindowedCounter`; the read-modify-write race can
/// miscount by one at window edges, which is acceptable. KV failures fail
/// open: the request is not limited.
pub struct RateLimitDetector {
    counter: WindowedCounter,
    limit: u64,
    priority: u8,
    enabled: bool,
}

impl RateLimitDetector {
    pub fn new(kv: Arc<dyn KvStore>, config: &RateLimitConfig) -> Self {
        Self {
            counter: WindowedCounter::new(kv, config.key_prefix.clone(), config.window()),
            limit: config.limit,
            priority: config.priority.unwrap_or(DEFAULT_PRIORITY),
            enabled: config.enabled,
        }
    }

    fn key_for(&self, request: &HttpRequest, context: &RequestContext) -> Option<String> {
        context
            .client_key
            .clone()
            .or_else(|| client_ip_string(request))
    }
}

#[async_trait]
impl Detector for RateLimitDetector {
    fn name(&self) -> &str {
        DETECTOR_NAME
    }

    fn priority(&self) -> u8 {
        self.priority
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    async fn detect_request(
        &self,
        request: &HttpRequest,
        context: &RequestContext,
    ) -> Option<DetectorResult> {
        let key = self.key_for(request, context)?;
        let count = match self.counter.increment(&key).await {
            Ok(count) => count,
            Err(err) => {
                warn!(error = %err, "rate-limit counter unavailable, failing open");
                return None;
            }
        };

        if count <= self.limit {
            return None;
        }

        Some(
            DetectorResult::new(AttackType::RateLimit, Severity::Critical, 1.0).with_evidence(
                Evidence {
                    field: "client".to_string(),
                    value: key,
                    pattern: format!(
                        "{count} requests > limit {} per {}s",
                        self.limit,
                        self.counter.window().as_secs()
                    ),
                    raw_content: None,
                },
            ),
        )
    }
}
