use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::behavior::WindowedCounter;
use crate::config::FailureThresholdConfig;
use crate::core::http::{HttpRequest, HttpResponse, RequestContext};
use crate::detectors::{AttackType, DetectionPhase, Detector, DetectorResult, Evidence, Severity};
use crate::storage::KvStore;
use crate::utils::net::client_ip_string;

pub const DETECTOR_NAME: &str = "failure-threshold";
pub const BRUTE_FORCE_DETECTOR_NAME: &str = "brute-force";
pub const DEFAULT_PRIORITY: u8 = 80;
pub const BRUTE_FORCE_PRIORITY: u8 = 90;

/// Response-phase counter over failing statuses.
///
/// Each matching response increments the caller's windowed counter; once
/// the count reaches the threshold the detector fires, and severity climbs
/// with multiples of the threshold. The brute-force preset is this detector
/// pinned to {401, 403} and reported as BRUTE_FORCE.
pub struct FailureThresholdDetector {
    name: &'static str,
    attack_type: AttackType,
    counter: WindowedCounter,
    statuses: Vec<u16>,
    threshold: u64,
    base_confidence: f64,
    priority: u8,
    enabled: bool,
}

impl FailureThresholdDetector {
    pub fn new(kv: Arc<dyn KvStore>, config: &FailureThresholdConfig) -> Self {
        Self {
            name: DETECTOR_NAME,
            attack_type: AttackType::SuspiciousPattern,
            counter: WindowedCounter::new(kv, config.key_prefix.clone(), config.window()),
            statuses: config.statuses.clone(),
            threshold: config.threshold.max(1),
            base_confidence: config.base_confidence,
            priority: config.priority.unwrap_or(DEFAULT_PRIORITY),
            enabled: config.enabled,
        }
    }

    /// The brute-force preset: authentication failures only.
    pub fn brute_force(kv: Arc<dyn KvStore>, config: &FailureThresholdConfig) -> Self {
        let mut detector = Self::new(kv, config);
        detector.name = BRUTE_FORCE_DETECTOR_NAME;
        detector.attack_type = AttackType::BruteForce;
        detector.priority = config.priority.unwrap_or(BRUTE_FORCE_PRIORITY);
        detector
    }

    fn severity_for(&self, count: u64) -> Severity {
        if count >= self.threshold * 3 {
            Severity::Critical
        } else if count >= self.threshold * 2 {
            Severity::High
        } else {
            Severity::Medium
        }
    }

    fn confidence_for(&self, count: u64) -> f64 {
        (self.base_confidence + (count.saturating_sub(self.threshold)) as f64 * 0.1).min(1.0)
    }
}

#[async_trait]
impl Detector for FailureThresholdDetector {
    fn name(&self) -> &str {
        self.name
    }

    fn phase(&self) -> DetectionPhase {
        DetectionPhase::Response
    }

    fn priority(&self) -> u8 {
        self.priority
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    async fn detect_response(
        &self,
        request: &HttpRequest,
        response: &HttpResponse,
        context: &RequestContext,
    ) -> Option<DetectorResult> {
        if !self.statuses.contains(&response.status()) {
            return None;
        }
        let key = context
            .client_key
            .clone()
            .or_else(|| client_ip_string(request))?;

        let count = match self.counter.increment(&key).await {
            Ok(count) => count,
            Err(err) => {
                warn!(error = %err, "failure counter unavailable, failing open");
                return None;
            }
        };
        if count < self.threshold {
            return None;
        }

        Some(
            DetectorResult::new(
                self.attack_type,
                self.severity_for(count),
                self.confidence_for(count),
            )
            .with_evidence(Evidence {
                field: "client".to_string(),
                value: key,
                pattern: format!(
                    "{count} failures (status {}) >= threshold {} in {}s",
                    response.status(),
                    self.threshold,
                    self.counter.window().as_secs()
                ),
                raw_content: None,
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryKv;
    use std::time::Duration;

    fn brute_force(threshold: u64) -> FailureThresholdDetector {
        let config = FailureThresholdConfig {
            threshold,
            statuses: vec![401, 403],
            ..Default::default()
        };
        FailureThresholdDetector::brute_force(Arc::new(MemoryKv::new()), &config)
    }

    fn login() -> HttpRequest {
        HttpRequest::post("/login").with_header("cf-connecting-ip", "198.51.100.7")
    }

    #[tokio::test]
    async fn fires_at_threshold_with_escalating_severity() {
        let detector = brute_force(5);
        let context = RequestContext::new();
        let denied = HttpResponse::new(401);

        for _ in 0..4 {
            assert!(detector
                .detect_response(&login(), &denied, &context)
                .await
                .is_none());
        }

        let result = detector
            .detect_response(&login(), &denied, &context)
            .await
            .expect("fifth failure hits threshold");
        assert_eq!(result.attack_type, AttackType::BruteForce);
        assert_eq!(result.severity, Severity::Medium);

        // Drive the count to 2x and 3x the threshold.
        let mut last = None;
        for _ in 0..10 {
            last = detector.detect_response(&login(), &denied, &context).await;
        }
        let result = last.unwrap();
        assert_eq!(result.severity, Severity::Critical);
        assert_eq!(result.confidence, 1.0);
    }

    #[tokio::test]
    async fn successful_responses_do_not_count() {
        let detector = brute_force(2);
        let context = RequestContext::new();
        let ok = HttpResponse::new(200);
        for _ in 0..10 {
            assert!(detector
                .detect_response(&login(), &ok, &context)
                .await
                .is_none());
        }
        // Two real failures still needed.
        let denied = HttpResponse::new(403);
        assert!(detector
            .detect_response(&login(), &denied, &context)
            .await
            .is_none());
        assert!(detector
            .detect_response(&login(), &denied, &context)
            .await
            .is_some());
    }

    #[tokio::test]
    async fn generic_preset_reports_suspicious_pattern() {
        let config = FailureThresholdConfig {
            threshold: 1,
            statuses: vec![500],
            ..Default::default()
        };
        let detector = FailureThresholdDetector::new(Arc::new(MemoryKv::new()), &config);
        assert_eq!(detector.phase(), DetectionPhase::Response);
        let result = detector
            .detect_response(
                &login(),
                &HttpResponse::new(500),
                &RequestContext::new(),
            )
            .await
            .unwrap();
        assert_eq!(result.attack_type, AttackType::SuspiciousPattern);
    }

    #[tokio::test]
    async fn counter_expires_with_window() {
        let config = FailureThresholdConfig {
            threshold: 2,
            statuses: vec![401],
            ..Default::default()
        };
        let mut detector = FailureThresholdDetector::brute_force(Arc::new(MemoryKv::new()), &config);
        detector.counter = WindowedCounter::new(
            Arc::new(MemoryKv::new()),
            "failures",
            Duration::from_millis(50),
        );
        let context = RequestContext::new();
        let denied = HttpResponse::new(401);
        assert!(detector
            .detect_response(&login(), &denied, &context)
            .await
            .is_none());
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(detector
            .detect_response(&login(), &denied, &context)
            .await
            .is_none());
    }
}
