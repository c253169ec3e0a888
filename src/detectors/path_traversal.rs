use async_trait::async_trait;
use once_cell::sync::Lazy;

use crate::config::ScannerConfig;
use crate::core::http::{HttpRequest, RequestContext};
use crate::detectors::patterns::{scan_request, PatternRule, ScanOptions};
use crate::detectors::{AttackType, Detector, DetectorResult, Evidence, Severity};
use crate::utils::sanitize;

pub const DETECTOR_NAME: &str = "path-traversal";
pub const DEFAULT_PRIORITY: u8 = 92;

static RULES: Lazy<Vec<PatternRule>> = Lazy::new(|| {
    vec![
        PatternRule::new(
            r"(?i)(\.\./|\.\.\\).*(etc/(passwd|shadow|hosts)|boot\.ini|win\.ini)",
            "traversal to sensitive file",
            0.99,
            Severity::Critical,
        ),
        PatternRule::new(
            r"(\.\./|\.\.\\){2,}",
            "repeated parent traversal",
            0.97,
            Severity::High,
        ),
        PatternRule::new(
            r"(?i)/etc/(passwd|shadow|group|hosts)\b",
            "direct sensitive file reference",
            0.95,
            Severity::High,
        ),
        PatternRule::new(
            r"(?i)\.\.%c0%af|\.\.%c1%9c",
            "overlong UTF-8 traversal",
            0.95,
            Severity::High,
        ),
        PatternRule::new(
            r"\.\./|\.\.\\",
            "parent directory reference",
            0.8,
            Severity::Medium,
        ),
        PatternRule::new(
            r"(?i)(/proc/self/|/windows/system32/)",
            "system path probe",
            0.9,
            Severity::High,
        ),
        PatternRule::new(
            r"(?i)\bfile://",
            "file scheme access",
            0.85,
            Severity::Medium,
        ),
    ]
});

fn prefilter(value: &str) -> bool {
    value.contains("..") || value.contains("/etc/") || value.contains("file:")
        || value.to_ascii_lowercase().contains("system32")
        || value.to_ascii_lowercase().contains("/proc/")
}

/// Pattern scanner for directory traversal, including the URL path itself.
pub struct PathTraversalDetector {
    options: ScanOptions,
    priority: u8,
    enabled: bool,
    base_confidence: Option<f64>,
}

impl PathTraversalDetector {
    pub fn new(config: &ScannerConfig) -> Self {
        Self {
            options: ScanOptions {
                exclude_fields: config.exclude_fields.clone(),
                header_allowlist: config.header_allowlist.clone(),
                scan_path: true,
                ..Default::default()
            },
            priority: config.priority.unwrap_or(DEFAULT_PRIORITY),
            enabled: config.enabled,
            base_confidence: config.base_confidence,
        }
    }
}

impl Default for PathTraversalDetector {
    fn default() -> Self {
        Self::new(&ScannerConfig::default())
    }
}

#[async_trait]
impl Detector for PathTraversalDetector {
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
            DetectorResult::new(AttackType::PathTraversal, hit.rule.severity, confidence)
                .with_evidence(Evidence {
                    field: hit.field,
                    value: sanitize::evidence_value(&hit.value),
                    pattern: hit.rule.description.to_string(),
                    raw_content: Some(sanitize::raw_content(&hit.value)),
                }),
        )
    }
}
