//! Detector capability and the built-in detector set.
//!
//! A detector inspects one request (or response) and optionally returns a
//! structured result. Detectors never throw for "no signal": unparseable
//! bodies are skipped, and storage failures inside a detector degrade to
//! `None` — the request path fails open.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::http::{HttpRequest, HttpResponse, RequestContext};

pub mod blocklist;
pub mod command_injection;
pub mod entropy;
pub mod failure_threshold;
pub mod jwt;
pub mod nosql_injection;
pub mod open_redirect;
pub mod path_traversal;
pub mod patterns;
pub mod rate_limit;
pub mod reputation;
pub mod smuggling;
pub mod sql_injection;
pub mod ssrf;
pub mod ssti;
pub mod xss;
pub mod xxe;

pub use blocklist::BlocklistDetector;
pub use command_injection::CommandInjectionDetector;
pub use entropy::EntropyDetector;
pub use failure_threshold::FailureThresholdDetector;
pub use jwt::JwtDetector;
pub use nosql_injection::NoSqlInjectionDetector;
pub use open_redirect::OpenRedirectDetector;
pub use path_traversal::PathTraversalDetector;
pub use rate_limit::RateLimitDetector;
pub use reputation::ReputationDetector;
pub use smuggling::SmugglingDetector;
pub use sql_injection::SqlInjectionDetector;
pub use ssrf::SsrfDetector;
pub use ssti::SstiDetector;
pub use xss::XssDetector;
pub use xxe::XxeDetector;

// Reserved metadata keys
pub const META_SKIP_BLOCKLIST_UPDATE: &str = "skipBlocklistUpdate";
pub const META_SKIP_REPUTATION_UPDATE: &str = "skipReputationUpdate";
pub const META_BLOCK_KEY: &str = "key";

/// Attack classes the built-in detectors report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttackType {
    SqlInjection,
    Xss,
    PathTraversal,
    Ssrf,
    NosqlInjection,
    CommandInjection,
    Xxe,
    Ssti,
    JwtAttack,
    OpenRedirect,
    HttpSmuggling,
    ObfuscatedPayload,
    BruteForce,
    RateLimit,
    Blocklist,
    SuspiciousPattern,
}

impl AttackType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttackType::SqlInjection => "SQL_INJECTION",
            AttackType::Xss => "XSS",
            AttackType::PathTraversal => "PATH_TRAVERSAL",
            AttackType::Ssrf => "SSRF",
            AttackType::NosqlInjection => "NOSQL_INJECTION",
            AttackType::CommandInjection => "COMMAND_INJECTION",
            AttackType::Xxe => "XXE",
            AttackType::Ssti => "SSTI",
            AttackType::JwtAttack => "JWT_ATTACK",
            AttackType::OpenRedirect => "OPEN_REDIRECT",
            AttackType::HttpSmuggling => "HTTP_SMUGGLING",
            AttackType::ObfuscatedPayload => "OBFUSCATED_PAYLOAD",
            AttackType::BruteForce => "BRUTE_FORCE",
            AttackType::RateLimit => "RATE_LIMIT",
            AttackType::Blocklist => "BLOCKLIST",
            AttackType::SuspiciousPattern => "SUSPICIOUS_PATTERN",
        }
    }
}

impl std::fmt::Display for AttackType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Detection severity, ordered weakest to strongest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Base score before confidence weighting.
    pub fn base_score(&self) -> u8 {
        match self {
            Severity::Low => 25,
            Severity::Medium => 50,
            Severity::High => 80,
            Severity::Critical => 100,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        }
    }
}

/// Where in the request a detection anchored, sanitized for logging.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Evidence {
    /// Dotted path: `query.q`, `body.user.comment`, `header.host`, `path`.
    pub field: String,
    /// Matched value, truncated and masked.
    pub value: String,
    /// Regex source or structural marker that fired.
    pub pattern: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_content: Option<String>,
}

/// Canonical output of one detector invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorResult {
    pub detected: bool,
    pub attack_type: AttackType,
    pub severity: Severity,
    pub confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evidence: Option<Evidence>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, Value>,
    /// Set by the pipeline, not the detector.
    #[serde(default)]
    pub detector_name: String,
}

impl DetectorResult {
    pub fn new(attack_type: AttackType, severity: Severity, confidence: f64) -> Self {
        Self {
            detected: true,
            attack_type,
            severity,
            confidence: confidence.clamp(0.0, 1.0),
            evidence: None,
            metadata: serde_json::Map::new(),
            detector_name: String::new(),
        }
    }

    pub fn with_evidence(mut self, evidence: Evidence) -> Self {
        self.evidence = Some(evidence);
        self
    }

    pub fn with_metadata(mut self, key: &str, value: Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    /// Whether a reserved boolean metadata flag is set.
    pub fn metadata_flag(&self, key: &str) -> bool {
        self.metadata
            .get(key)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

/// Which traffic direction a detector inspects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionPhase {
    Request,
    Response,
}

/// A named inspection capability.
///
/// `priority` orders execution (0–100, higher first); the pipeline stops at
/// the first positive result. Implementations must not consume the request
/// body destructively and must catch their own I/O failures.
#[async_trait]
pub trait Detector: Send + Sync {
    fn name(&self) -> &str;

    fn phase(&self) -> DetectionPhase {
        DetectionPhase::Request
    }

    fn priority(&self) -> u8 {
        50
    }

    fn enabled(&self) -> bool {
        true
    }

    async fn detect_request(
        &self,
        _request: &HttpRequest,
        _context: &RequestContext,
    ) -> Option<DetectorResult> {
        None
    }

    async fn detect_response(
        &self,
        _request: &HttpRequest,
        _response: &HttpResponse,
        _context: &RequestContext,
    ) -> Option<DetectorResult> {
        None
    }
}

/// Name directory for the built-in detector set.
pub struct DetectorRegistry;

impl DetectorRegistry {
    /// Names of every built-in detector, for CLI listings and route
    /// override validation.
    pub fn builtin_names() -> Vec<&'static str> {
        vec![
            blocklist::DETECTOR_NAME,
            sql_injection::DETECTOR_NAME,
            xss::DETECTOR_NAME,
            path_traversal::DETECTOR_NAME,
            command_injection::DETECTOR_NAME,
            nosql_injection::DETECTOR_NAME,
            ssrf::DETECTOR_NAME,
            xxe::DETECTOR_NAME,
            ssti::DETECTOR_NAME,
            open_redirect::DETECTOR_NAME,
            jwt::DETECTOR_NAME,
            smuggling::DETECTOR_NAME,
            entropy::DETECTOR_NAME,
            rate_limit::DETECTOR_NAME,
            reputation::DETECTOR_NAME,
            failure_threshold::DETECTOR_NAME,
            failure_threshold::BRUTE_FORCE_DETECTOR_NAME,
        ]
    }
}

/// Shared severity map for reputation deltas.
pub fn severity_delta(severity: Severity) -> i64 {
    match severity {
        Severity::Low => -5,
        Severity::Medium => -10,
        Severity::High => -15,
        Severity::Critical => -25,
    }
}

/// Renders the distinct attack types of a batch, insertion-ordered.
pub fn attack_type_csv(results: &[DetectorResult]) -> String {
    let mut seen = HashMap::new();
    let mut ordered = Vec::new();
    for result in results {
        if seen.insert(result.attack_type, ()).is_none() {
            ordered.push(result.attack_type.as_str());
        }
    }
    ordered.join(", ")
}
