use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::SmugglingConfig;
use crate::core::http::{HttpRequest, RequestContext};
use crate::detectors::{AttackType, Detector, DetectorResult, Evidence, Severity};
use crate::utils::sanitize;

pub const DETECTOR_NAME: &str = "http-smuggling";
pub const DEFAULT_PRIORITY: u8 = 85;

// Headers probed for CRLF / null injection.
const INJECTION_HEADERS: [&str; 6] = [
    "host",
    "x-forwarded-host",
    "x-forwarded-for",
    "x-original-url",
    "x-rewrite-url",
    "referer",
];

const KNOWN_TRANSFER_ENCODINGS: [&str; 5] = ["chunked", "identity", "gzip", "deflate", "compress"];

const MAX_FORWARDED_CHAIN: usize = 10;

static CRLF_MARKERS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)(\r|\n|%0d|%0a)").unwrap());

static INTERNAL_IP_LITERAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(127\.|10\.|192\.168\.|172\.(1[6-9]|2\d|3[01])\.|169\.254\.|0\.0\.0\.0)").unwrap()
});

/// Structural request-smuggling checks on the raw header set.
///
/// Everything here is a malformed-framing signal: CL/TE coexistence,
/// header injection characters, nonsense Content-Length values, Host
/// authority abuse, and forged forwarding chains.
pub struct SmugglingDetector {
    priority: u8,
    enabled: bool,
}

impl SmugglingDetector {
    pub fn new(config: &SmugglingConfig) -> Self {
        Self {
            priority: config.priority.unwrap_or(DEFAULT_PRIORITY),
            enabled: config.enabled,
        }
    }

    fn result(
        &self,
        field: &str,
        value: &str,
        marker: &str,
        severity: Severity,
        confidence: f64,
    ) -> DetectorResult {
        DetectorResult::new(AttackType::HttpSmuggling, severity, confidence).with_evidence(
            Evidence {
                field: format!("header.{field}"),
                value: sanitize::evidence_value(value),
                pattern: marker.to_string(),
                raw_content: None,
            },
        )
    }

    fn check_content_length(&self, value: &str) -> Option<DetectorResult> {
        let trimmed = value.trim();
        if trimmed.contains(',') {
            return Some(self.result(
                "content-length",
                value,
                "comma-separated content-length",
                Severity::High,
                0.95,
            ));
        }
        let valid = !trimmed.is_empty()
            && trimmed.chars().all(|c| c.is_ascii_digit())
            && !(trimmed.len() > 1 && trimmed.starts_with('0'));
        if !valid {
            return Some(self.result(
                "content-length",
                value,
                "invalid content-length value",
                Severity::High,
                0.9,
            ));
        }
        None
    }

    fn check_transfer_encoding(&self, value: &str) -> Option<DetectorResult> {
        for token in value.split(',') {
            let token = token.trim().to_ascii_lowercase();
            if !token.is_empty() && !KNOWN_TRANSFER_ENCODINGS.contains(&token.as_str()) {
                return Some(self.result(
                    "transfer-encoding",
                    value,
                    "unknown transfer-encoding",
                    Severity::High,
                    0.9,
                ));
            }
        }
        None
    }

    fn check_host(&self, value: &str) -> Option<DetectorResult> {
        let marker = if value.matches(':').count() > 1 && !value.contains('[') {
            Some("multiple ports in host")
        } else if value.contains('@') {
            Some("userinfo in host")
        } else if value.contains('/') {
            Some("path characters in host")
        } else if value.trim() != value || value.contains(' ') || value.contains('\t') {
            Some("whitespace in host")
        } else {
            None
        };
        marker.map(|m| self.result("host", value, m, Severity::High, 0.9))
    }

    fn check_forwarded_chain(&self, value: &str) -> Option<DetectorResult> {
        let hops: Vec<&str> = value.split(',').map(str::trim).collect();
        if hops.len() > MAX_FORWARDED_CHAIN {
            return Some(self.result(
                "x-forwarded-for",
                value,
                "excessive forwarding chain",
                Severity::Medium,
                0.8,
            ));
        }
        // A spoofed internal hop is an attempt to reach trust-gated paths.
        if hops.iter().any(|hop| INTERNAL_IP_LITERAL.is_match(hop)) {
            return Some(self.result(
                "x-forwarded-for",
                value,
                "internal address in forwarding chain",
                Severity::Medium,
                0.75,
            ));
        }
        None
    }
}

impl Default for SmugglingDetector {
    fn default() -> Self {
        Self::new(&SmugglingConfig::default())
    }
}

#[async_trait]
impl Detector for SmugglingDetector {
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
        let content_length = request.header("content-length");
        let transfer_encoding = request.header("transfer-encoding");

        if let (Some(cl), Some(_te)) = (content_length, transfer_encoding) {
            return Some(self.result(
                "transfer-encoding",
                cl,
                "content-length and transfer-encoding coexist",
                Severity::Critical,
                0.95,
            ));
        }

        for name in INJECTION_HEADERS {
            if let Some(value) = request.header(name) {
                if CRLF_MARKERS.is_match(value) {
                    return Some(self.result(
                        name,
                        value,
                        "crlf injection in header",
                        Severity::Critical,
                        0.95,
                    ));
                }
                if value.contains('\0') || value.contains("%00") {
                    return Some(self.result(
                        name,
                        value,
                        "null byte in header",
                        Severity::Critical,
                        0.95,
                    ));
                }
            }
        }

        if let Some(value) = content_length {
            if let Some(result) = self.check_content_length(value) {
                return Some(result);
            }
        }
        if let Some(value) = transfer_encoding {
            if let Some(result) = self.check_transfer_encoding(value) {
                return Some(result);
            }
            if value.matches("chunked").count() > 1 {
                return Some(self.result(
                    "transfer-encoding",
                    value,
                    "duplicate chunked encoding",
                    Severity::High,
                    0.9,
                ));
            }
        }
        if let Some(value) = request.header("host") {
            if let Some(result) = self.check_host(value) {
                return Some(result);
            }
        }
        if let Some(value) = request.header("x-forwarded-for") {
            if let Some(result) = self.check_forwarded_chain(value) {
                return Some(result);
            }
        }

        None
    }
}
