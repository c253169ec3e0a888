use async_trait::async_trait;
use once_cell::sync::Lazy;

use crate::config::ScannerConfig;
use crate::core::http::{HttpRequest, RequestContext};
use crate::detectors::patterns::{scan_request, PatternRule, ScanOptions};
use crate::detectors::{AttackType, Detector, DetectorResult, Evidence, Severity};
use crate::utils::sanitize;

pub const DETECTOR_NAME: &str = "ssti";
pub const DEFAULT_PRIORITY: u8 = 88;

static RULES: Lazy<Vec<PatternRule>> = Lazy::new(|| {
    vec![
        PatternRule::new(
            r"\{\{\s*[\d\s]*[\*\+]\s*[\d\s]+\}\}",
            "arithmetic probe",
            0.95,
            Severity::High,
        ),
        PatternRule::new(
            r"(?i)\{\{\s*(config|self|request|settings)\b",
            "context object access",
            0.95,
            Severity::Critical,
        ),
        PatternRule::new(
            r"(?i)__(class|mro|subclasses|globals|builtins|import)__",
            "python introspection chain",
            0.98,
            Severity::Critical,
        ),
        PatternRule::new(
            r"(?i)\$\{\s*[\w\.]+\s*\}",
            "expression language interpolation",
            0.7,
            Severity::Medium,
        ),
        PatternRule::new(
            r"(?i)<%=?\s*[\w\.\(\)]+\s*%>",
            "erb/jsp tag",
            0.85,
            Severity::High,
        ),
        PatternRule::new(
            r"(?i)\{%\s*(if|for|import|include|block)\b",
            "template statement tag",
            0.85,
            Severity::High,
        ),
        PatternRule::new(
            r"(?i)#\{\s*[\w\.]+\s*\}",
            "ruby interpolation",
            0.7,
            Severity::Medium,
        ),
        PatternRule::new(
            r"(?i)freemarker|\bnew\s*\(\s*['\x22]",
            "freemarker constructor",
            0.85,
            Severity::High,
        ),
    ]
});

fn prefilter(value: &str) -> bool {
    value.contains("{{")
        || value.contains("${")
        || value.contains("{%")
        || value.contains("#{")
        || value.contains("<%")
        || value.contains("__")
}

/// Pattern scanner for server-side template injection probes.
pub struct SstiDetector {
    options: ScanOptions,
    priority: u8,
    enabled: bool,
    base_confidence: Option<f64>,
}

impl SstiDetector {
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

impl Default for SstiDetector {
    fn default() -> Self {
        Self::new(&ScannerConfig::default())
    }
}

#[async_trait]
impl Detector for SstiDetector {
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
            DetectorResult::new(AttackType::Ssti, hit.rule.severity, confidence).with_evidence(
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
