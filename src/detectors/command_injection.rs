use async_trait::async_trait;
use once_cell::sync::Lazy;

use crate::config::ScannerConfig;
use crate::core::http::{HttpRequest, RequestContext};
use crate::detectors::patterns::{scan_request, PatternRule, ScanOptions};
use crate::detectors::{AttackType, Detector, DetectorResult, Evidence, Severity};
use crate::utils::sanitize;

pub const DETECTOR_NAME: &str = "command-injection";
pub const DEFAULT_PRIORITY: u8 = 95;

// Shell metacharacters gate the regex pass.
const PREFILTER_MARKERS: [char; 7] = [';', '|', '&', '`', '$', '\n', '<'];

static RULES: Lazy<Vec<PatternRule>> = Lazy::new(|| {
    vec![
        PatternRule::new(
            r"(?i)[;|&`]\s*(cat|ls|id|whoami|uname|pwd|curl|wget|nc|bash|sh|python|perl)\b",
            "chained shell command",
            0.96,
            Severity::Critical,
        ),
        PatternRule::new(
            r"\$\((?s).+\)|`(?s).+`",
            "command substitution",
            0.92,
            Severity::High,
        ),
        PatternRule::new(
            r"(?i)\b(cat|head|tail)\s+/(etc|proc|var)/",
            "file disclosure command",
            0.95,
            Severity::Critical,
        ),
        PatternRule::new(
            r"(?i)(\|\||&&)\s*\S+",
            "conditional command chain",
            0.8,
            Severity::Medium,
        ),
        PatternRule::new(
            r"(?i)\b(curl|wget)\s+(-\S+\s+)*(https?|ftp)://",
            "remote fetch",
            0.9,
            Severity::High,
        ),
        PatternRule::new(
            r"(?i)\bnc\s+(-\S+\s+)*\d{1,3}(\.\d{1,3}){3}\s+\d+",
            "reverse shell probe",
            0.97,
            Severity::Critical,
        ),
        PatternRule::new(
            r"(?i)/dev/(tcp|udp)/",
            "bash network redirection",
            0.95,
            Severity::Critical,
        ),
        PatternRule::new(
            r"(?i)\$\{IFS\}|\$IFS",
            "IFS obfuscation",
            0.93,
            Severity::High,
        ),
        PatternRule::new(
            r"(?i)\b(rm|chmod|chown|mkfifo)\s+-",
            "destructive flag invocation",
            0.85,
            Severity::High,
        ),
    ]
});

fn prefilter(value: &str) -> bool {
    value.chars().any(|c| PREFILTER_MARKERS.contains(&c))
}

/// Pattern scanner for OS command injection.
pub struct CommandInjectionDetector {
    options: ScanOptions,
    priority: u8,
    enabled: bool,
    base_confidence: Option<f64>,
}

impl CommandInjectionDetector {
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

impl Default for CommandInjectionDetector {
    fn default() -> Self {
        Self::new(&ScannerConfig::default())
    }
}

#[async_trait]
impl Detector for CommandInjectionDetector {
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
            DetectorResult::new(AttackType::CommandInjection, hit.rule.severity, confidence)
                .with_evidence(Evidence {
                    field: hit.field,
                    value: sanitize::evidence_value(&hit.value),
                    pattern: hit.rule.description.to_string(),
                    raw_content: Some(sanitize::raw_content(&hit.value)),
                }),
        )
    }
}
