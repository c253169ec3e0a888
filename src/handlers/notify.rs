use std::time::Duration;

use async_trait::async_trait;
use metrics::counter;
use serde_json::json;
use tracing::{debug, warn};

use crate::core::decision::Action;
use crate::handlers::{Handler, HandlerContext};
use crate::utils::error::Result;
use crate::utils::net::client_ip_string;

pub const HANDLER_NAME: &str = "notify";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_RETRIES: u32 = 2;
const RETRY_BACKOFF: Duration = Duration::from_millis(250);

/// POSTs a JSON envelope to a webhook.
///
/// Each attempt runs under a hard timeout; failures retry with a short
/// backoff and then give up quietly — notification delivery is never
/// allowed to fail the request or sibling handlers.
pub struct NotifyHandler {
    client: reqwest::Client,
    webhook_url: String,
    retries: u32,
}

impl NotifyHandler {
    pub fn new(webhook_url: impl Into<String>) -> Self {
        Self::with_timeout(webhook_url, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(webhook_url: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            client,
            webhook_url: webhook_url.into(),
            retries: DEFAULT_RETRIES,
        }
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    fn envelope(&self, ctx: &HandlerContext<'_>) -> serde_json::Value {
        let detections: Vec<serde_json::Value> = ctx
            .results
            .iter()
            .map(|r| {
                json!({
                    "detector": r.detector_name,
                    "attackType": r.attack_type.as_str(),
                    "severity": r.severity.as_str(),
                    "confidence": r.confidence,
                    "evidence": r.evidence,
                })
            })
            .collect();
        json!({
            "source": "sentinel",
            "correlationId": ctx.context.correlation_id.to_string(),
            "client": client_ip_string(ctx.request),
            "method": ctx.request.method(),
            "path": ctx.request.path(),
            "score": ctx.score.score,
            "level": ctx.score.level.as_str(),
            "detections": detections,
        })
    }
}

#[async_trait]
impl Handler for NotifyHandler {
    fn name(&self) -> &str {
        HANDLER_NAME
    }

    async fn execute(&self, _action: &Action, ctx: &HandlerContext<'_>) -> Result<()> {
        let payload = self.envelope(ctx);

        for attempt in 0..=self.retries {
            match self
                .client
                .post(&self.webhook_url)
                .json(&payload)
                .send()
                .await
            {
                Ok(response) if response.status().is_success() => {
                    debug!(attempt, "notification delivered");
                    counter!("sentinel.actions.notified", 1);
                    return Ok(());
                }
                Ok(response) => {
                    warn!(attempt, status = %response.status(), "webhook rejected notification");
                }
                Err(err) => {
                    warn!(attempt, error = %err, "webhook unreachable");
                }
            }
            if attempt < self.retries {
                tokio::time::sleep(RETRY_BACKOFF).await;
            }
        }

        counter!("sentinel.actions.notify_failed", 1);
        // Delivery failure is deliberately not an error for the pipeline.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::http::{HttpRequest, RequestContext};
    use crate::core::score::{ThreatLevel, ThreatScore};
    use crate::detectors::{AttackType, DetectorResult, Severity};

    fn score() -> ThreatScore {
        let mut result = DetectorResult::new(AttackType::Xss, Severity::High, 0.9);
        result.detector_name = "xss".to_string();
        ThreatScore {
            score: 72,
            level: ThreatLevel::High,
            results: vec![result],
        }
    }

    #[test]
    fn envelope_shape() {
        let request = HttpRequest::get("/c?x=1").with_header("cf-connecting-ip", "1.2.3.4");
        let context = RequestContext::new();
        let score = score();
        let ctx = HandlerContext::new(&request, &context, &score);
        let handler = NotifyHandler::new("https://hooks.invalid/sentinel");

        let envelope = handler.envelope(&ctx);
        assert_eq!(envelope["source"], "sentinel");
        assert_eq!(envelope["score"], 72);
        assert_eq!(envelope["level"], "high");
        assert_eq!(envelope["client"], "1.2.3.4");
        assert_eq!(envelope["detections"][0]["attackType"], "XSS");
    }

    #[tokio::test]
    async fn unreachable_webhook_does_not_error() {
        let request = HttpRequest::get("/");
        let context = RequestContext::new();
        let score = score();
        let ctx = HandlerContext::new(&request, &context, &score);
        // Reserved TEST-NET address; connection fails fast or times out.
        let handler =
            NotifyHandler::with_timeout("http://192.0.2.1:9/hook", Duration::from_millis(200))
                .with_retries(0);
        handler
            .execute(&Action::new(crate::core::decision::ActionKind::Notify), &ctx)
            .await
            .unwrap();
    }
}
