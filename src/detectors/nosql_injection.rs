use async_trait::async_trait;
use once_cell::sync::Lazy;

use crate::config::ScannerConfig;
use crate::core::http::{HttpRequest, RequestContext};
use crate::detectors::patterns::{scan_request, PatternRule, ScanOptions};
use crate::detectors::{AttackType, Detector, DetectorResult, Evidence, Severity};
use crate::utils::sanitize;

pub const DETECTOR_NAME: &str = "nosql-injection";
pub const DEFAULT_PRIORITY: u8 = 90;

static RULES: Lazy<Vec<PatternRule>> = Lazy::new(|| {
    vec![
        PatternRule::new(
            r"(?i)\$where\b",
            "server-side where clause",
            0.95,
            Severity::Critical,
        ),
        PatternRule::new(
            r"(?i)\$(gt|gte|lt|lte|ne|eq)\b",
            "comparison operator",
            0.9,
            Severity::High,
        ),
        PatternRule::new(
            r"(?i)\$(regex|options)\b",
            "regex operator probe",
            0.9,
            Severity::High,
        ),
        PatternRule::new(
            r"(?i)\$(in|nin|exists|type|mod|all|size|elemMatch)\b",
            "query operator",
            0.85,
            Severity::Medium,
        ),
        PatternRule::new(
            r"(?i)\bmapreduce\b|\$accumulator\b|\$function\b",
            "server-side javascript",
            0.92,
            Severity::Critical,
        ),
        PatternRule::new(
            r"(?i)sleep\s*\(\s*\d+\s*\)",
            "timing probe",
            0.85,
            Severity::High,
        ),
        PatternRule::new(
            r"(?i)\bthis\.[a-z_]+\s*(==|!=|&&|\|\|)",
            "javascript predicate",
            0.85,
            Severity::High,
        ),
    ]
});

fn prefilter(value: &str) -> bool {
    value.contains('$') || value.to_ascii_lowercase().contains("this.")
        || value.to_ascii_lowercase().contains("sleep")
        || value.to_ascii_lowercase().contains("mapreduce")
}

/// Pattern scanner for NoSQL (Mongo-style) operator injection.
///
/// Operators typically arrive as JSON keys (`{"password": {"$ne": ""}}`),
/// which the shared engine surfaces because it scans object keys too.
pub struct NoSqlInjectionDetector {
    options: ScanOptions,
    priority: u8,
    enabled: bool,
    base_confidence: Option<f64>,
}

impl NoSqlInjectionDetector {
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

impl Default for NoSqlInjectionDetector {
    fn default() -> Self {
        Self::new(&ScannerConfig::default())
    }
}

#[async_trait]
impl Detector for NoSqlInjectionDetector {
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
            DetectorResult::new(AttackType::NosqlInjection, hit.rule.severity, confidence)
                .with_evidence(Evidence {
                    field: hit.field,
                    value: sanitize::evidence_value(&hit.value),
                    pattern: hit.rule.description.to_string(),
                    raw_content: Some(sanitize::raw_content(&hit.value)),
                }),
        )
    }
}
