use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use crate::behavior::ReputationStore;
use crate::config::ReputationDetectorConfig;
use crate::core::http::{HttpRequest, RequestContext};
use crate::detectors::{
    AttackType, Detector, DetectorResult, Evidence, Severity, META_SKIP_REPUTATION_UPDATE,
};
use crate::storage::KvStore;
use crate::utils::net::client_ip_string;

pub const DETECTOR_NAME: &str = "reputation";
pub const DEFAULT_PRIORITY: u8 = 60;

/// Flags clients whose stored reputation has drifted sharply negative.
///
/// Severity scales with how far below zero the score sits. Results carry
/// `skipReputationUpdate` so a reputation hit does not feed back into the
/// score that produced it.
pub struct ReputationDetector {
    store: ReputationStore,
    critical_below: i64,
    high_below: i64,
    medium_below: i64,
    low_below: i64,
    priority: u8,
    enabled: bool,
}

impl ReputationDetector {
    pub fn new(kv: Arc<dyn KvStore>, config: &ReputationDetectorConfig) -> Self {
        Self {
            store: ReputationStore::new(kv),
            critical_below: config.critical_below,
            high_below: config.high_below,
            medium_below: config.medium_below,
            low_below: config.low_below,
            priority: config.priority.unwrap_or(DEFAULT_PRIORITY),
            enabled: config.enabled,
        }
    }

    fn severity_for(&self, score: i64) -> Option<(Severity, f64)> {
        if score <= self.critical_below {
            Some((Severity::Critical, 0.9))
        } else if score <= self.high_below {
            Some((Severity::High, 0.85))
        } else if score <= self.medium_below {
            Some((Severity::Medium, 0.8))
        } else if score <= self.low_below {
            Some((Severity::Low, 0.7))
        } else {
            None
        }
    }
}

#[async_trait]
impl Detector for ReputationDetector {
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
        let key = context
            .client_key
            .clone()
            .or_else(|| client_ip_string(request))?;

        let record = match self.store.load(&key).await {
            Ok(Some(record)) => record,
            Ok(None) => return None,
            Err(err) => {
                warn!(error = %err, "reputation read failed, failing open");
                return None;
            }
        };

        let (severity, confidence) = self.severity_for(record.score)?;
        Some(
            DetectorResult::new(AttackType::SuspiciousPattern, severity, confidence)
                .with_evidence(Evidence {
                    field: "client".to_string(),
                    value: key,
                    pattern: format!("reputation score {}", record.score),
                    raw_content: None,
                })
                .with_metadata(META_SKIP_REPUTATION_UPDATE, Value::Bool(true)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryKv;

    fn detector(kv: Arc<MemoryKv>) -> ReputationDetector {
        ReputationDetector::new(kv, &ReputationDetectorConfig::default())
    }

    fn request() -> HttpRequest {
        HttpRequest::get("/").with_header("cf-connecting-ip", "1.2.3.4")
    }

    #[tokio::test]
    async fn clean_client_passes() {
        let detector = detector(Arc::new(MemoryKv::new()));
        assert!(detector
            .detect_request(&request(), &RequestContext::new())
            .await
            .is_none());
    }

    #[tokio::test]
    async fn severity_scales_with_score() {
        let kv = Arc::new(MemoryKv::new());
        let store = ReputationStore::new(kv.clone());
        store.apply_delta("1.2.3.4", -85, vec![]).await.unwrap();

        let result = detector(kv)
            .detect_request(&request(), &RequestContext::new())
            .await
            .unwrap();
        assert_eq!(result.severity, Severity::Critical);
        assert!(result.metadata_flag(META_SKIP_REPUTATION_UPDATE));
    }

    #[tokio::test]
    async fn mildly_negative_score_is_low() {
        let kv = Arc::new(MemoryKv::new());
        let store = ReputationStore::new(kv.clone());
        store.apply_delta("1.2.3.4", -25, vec![]).await.unwrap();

        let result = detector(kv)
            .detect_request(&request(), &RequestContext::new())
            .await
            .unwrap();
        assert_eq!(result.severity, Severity::Low);
    }

    #[tokio::test]
    async fn slightly_negative_score_passes() {
        let kv = Arc::new(MemoryKv::new());
        let store = ReputationStore::new(kv.clone());
        store.apply_delta("1.2.3.4", -5, vec![]).await.unwrap();

        assert!(detector(kv)
            .detect_request(&request(), &RequestContext::new())
            .await
            .is_none());
    }
}
