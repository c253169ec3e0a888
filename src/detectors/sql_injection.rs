use async_trait::async_trait;
use once_cell::sync::Lazy;

use crate::config::ScannerConfig;
use crate::core::http::{HttpRequest, RequestContext};
use crate::detectors::patterns::{scan_request, PatternRule, ScanOptions};
use crate::detectors::{AttackType, Detector, DetectorResult, Evidence, Severity};
use crate::utils::sanitize;

pub const DETECTOR_NAME: &str = "sql-injection";
pub const DEFAULT_PRIORITY: u8 = 100;

// Cheap reject before any regex runs.
const PREFILTER_MARKERS: [&str; 8] = ["'", "\"", ";", "--", "/*", "(", "=", "union"];

static RULES: Lazy<Vec<PatternRule>> = Lazy::new(|| {
    vec![
        PatternRule::new(
            r"(?i)\bunion\b[\s/\*]+\bselect\b",
            "UNION-based injection",
            0.98,
            Severity::High,
        ),
        PatternRule::new(
            r#"(?i)['"]\s*(or|and)\s+['"]?\d+['"]?\s*=\s*['"]?\d+"#,
            "tautology comparison",
            0.95,
            Severity::High,
        ),
        PatternRule::new(
            r"(?i)\b(or|and)\s+\d+\s*=\s*\d+\s*(--|#|/\*)",
            "tautology with comment terminator",
            0.97,
            Severity::High,
        ),
        PatternRule::new(
            r"(?i)'\s*(or|and)\s+'[^']*'\s*=\s*'",
            "quoted tautology",
            0.95,
            Severity::High,
        ),
        PatternRule::new(
            r"(?i)\b(select|insert|update|delete|drop|truncate|alter)\b.+\b(from|into|table|set|where)\b",
            "stacked SQL statement",
            0.9,
            Severity::High,
        ),
        PatternRule::new(
            r"(?i);\s*(select|insert|update|delete|drop|shutdown)\b",
            "query stacking after terminator",
            0.95,
            Severity::Critical,
        ),
        PatternRule::new(
            r"(?i)\b(sleep|benchmark|pg_sleep|waitfor\s+delay)\s*\(",
            "time-based blind probe",
            0.95,
            Severity::High,
        ),
        PatternRule::new(
            r"(?i)\b(extractvalue|updatexml|exp)\s*\(.*\b(select|concat)\b",
            "error-based extraction",
            0.92,
            Severity::High,
        ),
        PatternRule::new(
            r"(?i)\binformation_schema\b|\bsysobjects\b|\bpg_catalog\b",
            "schema enumeration",
            0.9,
            Severity::Medium,
        ),
        PatternRule::new(
            r"(?i)\bload_file\s*\(|\binto\s+(out|dump)file\b",
            "filesystem access",
            0.95,
            Severity::Critical,
        ),
        PatternRule::new(
            r"(?i)'\s*(--|#)\s*$",
            "trailing comment after quote",
            0.85,
            Severity::Medium,
        ),
        PatternRule::new(
            r"(?i)\bcast\s*\(.+\bas\b.+\)|\bconvert\s*\(.+,",
            "type coercion probe",
            0.7,
            Severity::Low,
        ),
    ]
});

fn prefilter(value: &str) -> bool {
    let lowered = value.to_ascii_lowercase();
    PREFILTER_MARKERS.iter().any(|m| lowered.contains(m))
}

/// Pattern scanner for SQL injection in query, body, and headers.
pub struct SqlInjectionDetector {
    options: ScanOptions,
    priority: u8,
    enabled: bool,
    base_confidence: Option<f64>,
}

impl SqlInjectionDetector {
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

impl Default for SqlInjectionDetector {
    fn default() -> Self {
        Self::new(&ScannerConfig::default())
    }
}

#[async_trait]
impl Detector for SqlInjectionDetector {
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
            DetectorResult::new(AttackType::SqlInjection, hit.rule.severity, confidence)
                .with_evidence(Evidence {
                    field: hit.field,
                    value: sanitize::evidence_value(&hit.value),
                    pattern: hit.rule.description.to_string(),
                    raw_content: Some(sanitize::raw_content(&hit.value)),
                }),
        )
    }
}
