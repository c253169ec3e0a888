use async_trait::async_trait;
use once_cell::sync::Lazy;

use crate::config::ScannerConfig;
use crate::core::http::{HttpRequest, RequestContext};
use crate::detectors::patterns::{scan_request, PatternRule, ScanOptions};
use crate::detectors::{AttackType, Detector, DetectorResult, Evidence, Severity};
use crate::utils::sanitize;

pub const DETECTOR_NAME: &str = "ssrf";
pub const DEFAULT_PRIORITY: u8 = 85;

static RULES: Lazy<Vec<PatternRule>> = Lazy::new(|| {
    vec![
        PatternRule::new(
            r"(?i)https?://169\.254\.169\.254",
            "cloud metadata endpoint",
            0.99,
            Severity::Critical,
        ),
        PatternRule::new(
            r"(?i)https?://metadata\.google\.internal",
            "gcp metadata endpoint",
            0.99,
            Severity::Critical,
        ),
        PatternRule::new(
            r"(?i)https?://(localhost|127\.0\.0\.1|0\.0\.0\.0|\[::1\])",
            "loopback target",
            0.95,
            Severity::High,
        ),
        PatternRule::new(
            r"(?i)https?://10\.\d{1,3}\.\d{1,3}\.\d{1,3}",
            "rfc1918 10/8 target",
            0.9,
            Severity::High,
        ),
        PatternRule::new(
            r"(?i)https?://192\.168\.\d{1,3}\.\d{1,3}",
            "rfc1918 192.168/16 target",
            0.9,
            Severity::High,
        ),
        PatternRule::new(
            r"(?i)https?://172\.(1[6-9]|2\d|3[01])\.\d{1,3}\.\d{1,3}",
            "rfc1918 172.16/12 target",
            0.9,
            Severity::High,
        ),
        PatternRule::new(
            r"(?i)https?://0x[0-9a-f]{8}\b|https?://\d{8,10}\b",
            "obfuscated numeric address",
            0.9,
            Severity::High,
        ),
        PatternRule::new(
            r"(?i)\b(gopher|dict|ftp|tftp)://",
            "non-http internal scheme",
            0.92,
            Severity::High,
        ),
        PatternRule::new(
            r"(?i)\bfile:///",
            "file scheme fetch",
            0.95,
            Severity::High,
        ),
        PatternRule::new(
            r"(?i)https?://[^/]*@",
            "userinfo confusion",
            0.8,
            Severity::Medium,
        ),
    ]
});

fn prefilter(value: &str) -> bool {
    let lowered = value.to_ascii_lowercase();
    lowered.contains("://")
}

/// Pattern scanner for server-side request forgery targets.
pub struct SsrfDetector {
    options: ScanOptions,
    priority: u8,
    enabled: bool,
    base_confidence: Option<f64>,
}

impl SsrfDetector {
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

impl Default for SsrfDetector {
    fn default() -> Self {
        Self::new(&ScannerConfig::default())
    }
}

#[async_trait]
impl Detector for SsrfDetector {
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
            DetectorResult::new(AttackType::Ssrf, hit.rule.severity, confidence).with_evidence(
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
