use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Shared knobs for the pattern scanners (SQLi, XSS, traversal, …).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    pub enabled: bool,
    /// Overrides the detector's default priority (0–100, higher first).
    pub priority: Option<u8>,
    /// When set, replaces each rule's own confidence.
    pub base_confidence: Option<f64>,
    /// Field names never scanned (exact, case-insensitive).
    pub exclude_fields: Vec<String>,
    /// Headers scanned in addition to query/body, lowercase names.
    pub header_allowlist: Vec<String>,
    /// Open-redirect only: parameter names treated as destinations.
    pub target_fields: Vec<String>,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            priority: None,
            base_confidence: None,
            exclude_fields: Vec::new(),
            header_allowlist: Vec::new(),
            target_fields: Vec::new(),
        }
    }
}

/// JWT structural checks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JwtConfig {
    pub enabled: bool,
    pub priority: Option<u8>,
    /// Headers searched for `Bearer` tokens.
    pub headers: Vec<String>,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            priority: None,
            headers: vec!["authorization".to_string()],
        }
    }
}

/// Request-smuggling structural checks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SmugglingConfig {
    pub enabled: bool,
    pub priority: Option<u8>,
}

impl Default for SmugglingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            priority: None,
        }
    }
}

/// Shannon-entropy detector.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EntropyConfig {
    pub enabled: bool,
    pub priority: Option<u8>,
    /// Bits per character; 0..=8.
    pub entropy_threshold: f64,
    /// Minimum candidate length in characters.
    pub min_length: usize,
    /// When non-empty, a candidate must match one of these too.
    pub signal_patterns: Vec<String>,
    pub exclude_fields: Vec<String>,
}

impl Default for EntropyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            priority: None,
            entropy_threshold: 5.0,
            min_length: 16,
            signal_patterns: Vec::new(),
            exclude_fields: Vec::new(),
        }
    }
}

/// Per-key request budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub priority: Option<u8>,
    pub limit: u64,
    pub window_secs: u64,
    pub key_prefix: String,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            priority: None,
            limit: 100,
            window_secs: 60,
            key_prefix: "ratelimit".to_string(),
        }
    }
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs.max(1))
    }
}

/// Response-phase failure counting (and its brute-force preset).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FailureThresholdConfig {
    pub enabled: bool,
    pub priority: Option<u8>,
    /// Response statuses that count as failures.
    pub statuses: Vec<u16>,
    pub threshold: u64,
    pub window_secs: u64,
    pub key_prefix: String,
    pub base_confidence: f64,
}

impl Default for FailureThresholdConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            priority: None,
            statuses: vec![401, 403],
            threshold: 5,
            window_secs: 60,
            key_prefix: "failures".to_string(),
            base_confidence: 0.7,
        }
    }
}

impl FailureThresholdConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs.max(1))
    }
}

/// Reputation-driven detection thresholds (scores are negative).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReputationDetectorConfig {
    pub enabled: bool,
    pub priority: Option<u8>,
    pub critical_below: i64,
    pub high_below: i64,
    pub medium_below: i64,
    pub low_below: i64,
}

impl Default for ReputationDetectorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            priority: None,
            critical_below: -80,
            high_below: -60,
            medium_below: -40,
            low_below: -20,
        }
    }
}

/// Reputation write side.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReputationHandlerConfig {
    /// Scale each severity delta by the detection's confidence.
    pub use_confidence: bool,
    /// Floor for the summed per-batch delta.
    pub min_delta: i64,
    pub ttl_secs: u64,
}

impl Default for ReputationHandlerConfig {
    fn default() -> Self {
        Self {
            use_confidence: true,
            min_delta: -50,
            ttl_secs: 86400,
        }
    }
}

impl ReputationHandlerConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs.max(1))
    }
}

/// Webhook notifications.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    pub enabled: bool,
    pub webhook_url: String,
    pub timeout_secs: u64,
    pub retries: u32,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            webhook_url: String::new(),
            timeout_secs: 5,
            retries: 2,
        }
    }
}

impl NotifyConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

/// Tuning for the whole built-in detector set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub sql_injection: ScannerConfig,
    pub xss: ScannerConfig,
    pub path_traversal: ScannerConfig,
    pub command_injection: ScannerConfig,
    pub nosql_injection: ScannerConfig,
    pub ssrf: ScannerConfig,
    pub xxe: ScannerConfig,
    pub ssti: ScannerConfig,
    pub open_redirect: ScannerConfig,
    pub jwt: JwtConfig,
    pub smuggling: SmugglingConfig,
    pub entropy: EntropyConfig,
    pub rate_limit: RateLimitConfig,
    pub brute_force: FailureThresholdConfig,
    /// Generic failure counting beyond auth; off by default so it does not
    /// double-count with the brute-force preset.
    pub failure_threshold: FailureThresholdConfig,
    pub reputation: ReputationDetectorConfig,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            sql_injection: ScannerConfig::default(),
            xss: ScannerConfig::default(),
            path_traversal: ScannerConfig::default(),
            command_injection: ScannerConfig::default(),
            nosql_injection: ScannerConfig::default(),
            ssrf: ScannerConfig::default(),
            xxe: ScannerConfig::default(),
            ssti: ScannerConfig::default(),
            open_redirect: ScannerConfig::default(),
            jwt: JwtConfig::default(),
            smuggling: SmugglingConfig::default(),
            entropy: EntropyConfig::default(),
            rate_limit: RateLimitConfig::default(),
            brute_force: FailureThresholdConfig {
                key_prefix: "bruteforce".to_string(),
                ..Default::default()
            },
            failure_threshold: FailureThresholdConfig {
                enabled: false,
                statuses: vec![500, 502, 503],
                ..Default::default()
            },
            reputation: ReputationDetectorConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = DetectorConfig::default();
        assert!(config.sql_injection.enabled);
        assert_eq!(config.rate_limit.limit, 100);
        assert_eq!(config.rate_limit.window(), Duration::from_secs(60));
        assert_eq!(config.brute_force.statuses, vec![401, 403]);
        assert_eq!(config.brute_force.threshold, 5);
        assert!(!config.failure_threshold.enabled);
        assert_eq!(config.entropy.entropy_threshold, 5.0);
        assert_eq!(config.entropy.min_length, 16);
    }

    #[test]
    fn scanner_config_deserializes_partial_toml() {
        let config: ScannerConfig =
            toml::from_str("enabled = false\nexclude_fields = [\"token\"]").unwrap();
        assert!(!config.enabled);
        assert_eq!(config.exclude_fields, vec!["token"]);
        assert!(config.priority.is_none());
    }
}
