use async_trait::async_trait;
use once_cell::sync::Lazy;

use crate::config::ScannerConfig;
use crate::core::http::{HttpRequest, RequestContext};
use crate::detectors::patterns::{scan_request, PatternRule, ScanOptions};
use crate::detectors::{AttackType, Detector, DetectorResult, Evidence, Severity};
use crate::utils::sanitize;

pub const DETECTOR_NAME: &str = "open-redirect";
pub const DEFAULT_PRIORITY: u8 = 80;

// Redirect scanning only pays off on parameters that actually carry
// destinations; everything else stays untouched.
const DEFAULT_TARGET_FIELDS: [&str; 8] = [
    "url", "redirect", "redirect_uri", "return", "return_to", "next", "goto", "dest",
];

static RULES: Lazy<Vec<PatternRule>> = Lazy::new(|| {
    vec![
        PatternRule::new(
            r"(?i)^\s*//[^/]",
            "protocol-relative external target",
            0.9,
            Severity::Medium,
        ),
        PatternRule::new(
            r"(?i)^\s*https?:/{0,2}[^/]*%2f%2f",
            "encoded double-slash confusion",
            0.85,
            Severity::Medium,
        ),
        PatternRule::new(
            r"(?i)^\s*https?://[^/?#]*@",
            "userinfo redirect trick",
            0.95,
            Severity::High,
        ),
        PatternRule::new(
            r"(?i)^\s*(javascript|data)\s*:",
            "script scheme redirect",
            0.95,
            Severity::High,
        ),
        PatternRule::new(
            r"(?i)^\s*https?:\\\\",
            "backslash scheme confusion",
            0.9,
            Severity::Medium,
        ),
        PatternRule::new(
            r"(?i)^\s*https?://",
            "absolute external target",
            0.6,
            Severity::Low,
        ),
    ]
});

fn prefilter(value: &str) -> bool {
    let trimmed = value.trim_start();
    trimmed.starts_with("//")
        || trimmed.to_ascii_lowercase().starts_with("http")
        || trimmed.to_ascii_lowercase().starts_with("javascript")
        || trimmed.to_ascii_lowercase().starts_with("data")
}

/// Pattern scanner for open-redirect destinations.
///
/// Unlike the other scanners this one limits itself to redirect-shaped
/// parameter names; an absolute URL in a search box is not a signal.
pub struct OpenRedirectDetector {
    options: ScanOptions,
    priority: u8,
    enabled: bool,
    base_confidence: Option<f64>,
}

impl OpenRedirectDetector {
    pub fn new(config: &ScannerConfig) -> Self {
        let include_fields = if config.target_fields.is_empty() {
            DEFAULT_TARGET_FIELDS.iter().map(|s| s.to_string()).collect()
        } else {
            config.target_fields.clone()
        };
        Self {
            options: ScanOptions {
                exclude_fields: config.exclude_fields.clone(),
                include_fields,
                header_allowlist: config.header_allowlist.clone(),
                ..Default::default()
            },
            priority: config.priority.unwrap_or(DEFAULT_PRIORITY),
            enabled: config.enabled,
            base_confidence: config.base_confidence,
        }
    }
}

impl Default for OpenRedirectDetector {
    fn default() -> Self {
        Self::new(&ScannerConfig::default())
    }
}

#[async_trait]
impl Detector for OpenRedirectDetector {
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
            DetectorResult::new(AttackType::OpenRedirect, hit.rule.severity, confidence)
                .with_evidence(Evidence {
                    field: hit.field,
                    value: sanitize::evidence_value(&hit.value),
                    pattern: hit.rule.description.to_string(),
                    raw_content: Some(sanitize::raw_content(&hit.value)),
                }),
        )
    }
}
