use async_trait::async_trait;
use once_cell::sync::Lazy;

use crate::config::ScannerConfig;
use crate::core::http::{HttpRequest, RequestContext};
use crate::detectors::patterns::{scan_request, PatternRule, ScanOptions};
use crate::detectors::{AttackType, Detector, DetectorResult, Evidence, Severity};
use crate::utils::sanitize;

pub const DETECTOR_NAME: &str = "xss";
pub const DEFAULT_PRIORITY: u8 = 95;

static RULES: Lazy<Vec<PatternRule>> = Lazy::new(|| {
    vec![
        PatternRule::new(
            r"(?is)<script\b[^>]*>",
            "script tag",
            0.98,
            Severity::High,
        ),
        PatternRule::new(
            r"(?i)\bjavascript\s*:",
            "javascript: URI",
            0.95,
            Severity::High,
        ),
        PatternRule::new(
            r"(?i)\bon(error|load|click|mouseover|focus|blur|submit|input|pointerover)\s*=",
            "inline event handler",
            0.9,
            Severity::High,
        ),
        PatternRule::new(
            r"(?is)<(iframe|object|embed|applet)\b",
            "embedding element",
            0.9,
            Severity::High,
        ),
        PatternRule::new(
            r"(?is)<img\b[^>]*\bsrc\s*=",
            "image vector",
            0.7,
            Severity::Medium,
        ),
        PatternRule::new(
            r"(?is)<svg\b[^>]*\bon\w+",
            "svg event vector",
            0.92,
            Severity::High,
        ),
        PatternRule::new(
            r"(?i)\b(document\.(cookie|location|write)|window\.location)\b",
            "DOM access",
            0.85,
            Severity::Medium,
        ),
        PatternRule::new(
            r"(?i)\b(eval|settimeout|setinterval|function)\s*\(",
            "dynamic code evaluation",
            0.7,
            Severity::Medium,
        ),
        PatternRule::new(
            r"(?i)\bsrcdoc\s*=|\bformaction\s*=",
            "attribute injection",
            0.85,
            Severity::Medium,
        ),
        PatternRule::new(
            r"(?i)\bdata\s*:\s*text/html",
            "data: URI payload",
            0.9,
            Severity::High,
        ),
    ]
});

fn prefilter(value: &str) -> bool {
    value.contains('<')
        || value.contains("javascript")
        || value.contains("data:")
        || value.contains("on")
}

/// Pattern scanner for cross-site scripting payloads.
///
/// Candidates are percent-decoded and HTML-entity-decoded before matching,
/// so `&lt;script&gt;` and `%3Cscript%3E` both land on the same rule.
pub struct XssDetector {
    options: ScanOptions,
    priority: u8,
    enabled: bool,
    base_confidence: Option<f64>,
}

impl XssDetector {
    pub fn new(config: &ScannerConfig) -> Self {
        Self {
            options: ScanOptions {
                exclude_fields: config.exclude_fields.clone(),
                header_allowlist: config.header_allowlist.clone(),
                html_decode: true,
                ..Default::default()
            },
            priority: config.priority.unwrap_or(DEFAULT_PRIORITY),
            enabled: config.enabled,
            base_confidence: config.base_confidence,
        }
    }
}

impl Default for XssDetector {
    fn default() -> Self {
        Self::new(&ScannerConfig::default())
    }
}

#[async_trait]
impl Detector for XssDetector {
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
            DetectorResult::new(AttackType::Xss, hit.rule.severity, confidence).with_evidence(
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
