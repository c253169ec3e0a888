use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;

use crate::config::EntropyConfig;
use crate::core::http::{HttpRequest, RequestContext};
use crate::detectors::{AttackType, Detector, DetectorResult, Evidence, Severity};
use crate::utils::decode::url_decode_deep;
use crate::utils::sanitize;

pub const DETECTOR_NAME: &str = "entropy";
pub const DEFAULT_PRIORITY: u8 = 50;

const MAX_JSON_DEPTH: usize = 32;

/// Shannon entropy in bits per character, 0..=8 over byte alphabets.
pub fn shannon_entropy(value: &str) -> f64 {
    if value.is_empty() {
        return 0.0;
    }
    let mut counts = [0usize; 256];
    let bytes = value.as_bytes();
    for &b in bytes {
        counts[b as usize] += 1;
    }
    let len = bytes.len() as f64;
    counts
        .iter()
        .filter(|&&c| c > 0)
        .map(|&c| {
            let p = c as f64 / len;
            -p * p.log2()
        })
        .sum()
}

struct Finding {
    field: String,
    value: String,
    entropy: f64,
}

/// Flags high-entropy values that look like packed or encoded payloads.
///
/// Entropy alone is noisy (tokens, hashes, ids), so when signal patterns
/// are configured a candidate must also match one of them. Among multiple
/// qualifying values the highest-entropy one is reported.
pub struct EntropyDetector {
    threshold: f64,
    min_length: usize,
    signal_patterns: Vec<Regex>,
    exclude_fields: Vec<String>,
    priority: u8,
    enabled: bool,
}

impl EntropyDetector {
    pub fn new(config: &EntropyConfig) -> Self {
        let signal_patterns = config
            .signal_patterns
            .iter()
            .filter_map(|source| Regex::new(source).ok())
            .collect();
        Self {
            threshold: config.entropy_threshold,
            min_length: config.min_length,
            signal_patterns,
            exclude_fields: config.exclude_fields.clone(),
            priority: config.priority.unwrap_or(DEFAULT_PRIORITY),
            enabled: config.enabled,
        }
    }

    fn qualify(&self, field: &str, raw: &str) -> Option<Finding> {
        let value = url_decode_deep(raw);
        if value.chars().count() < self.min_length {
            return None;
        }
        let entropy = shannon_entropy(&value);
        if entropy < self.threshold {
            return None;
        }
        if !self.signal_patterns.is_empty()
            && !self.signal_patterns.iter().any(|p| p.is_match(&value))
        {
            return None;
        }
        Some(Finding {
            field: field.to_string(),
            value,
            entropy,
        })
    }

    fn excluded(&self, name: &str) -> bool {
        self.exclude_fields.iter().any(|f| f.eq_ignore_ascii_case(name))
    }

    fn collect(&self, request: &HttpRequest) -> Option<Finding> {
        let mut best: Option<Finding> = None;
        let mut consider = |finding: Option<Finding>| {
            if let Some(finding) = finding {
                let better = best
                    .as_ref()
                    .is_none_or(|current| finding.entropy > current.entropy);
                if better {
                    best = Some(finding);
                }
            }
        };

        for (name, value) in request.query_pairs() {
            if !self.excluded(&name) {
                consider(self.qualify(&format!("query.{name}"), &value));
            }
        }

        if request.has_inspectable_body() {
            if let Some(json) = request.json_body() {
                let mut path = vec!["body".to_string()];
                self.walk(&json, &mut path, 0, &mut consider);
            } else {
                for (name, value) in request.form_pairs() {
                    if !self.excluded(&name) {
                        consider(self.qualify(&format!("body.{name}"), &value));
                    }
                }
            }
        }

        best
    }

    fn walk(
        &self,
        value: &Value,
        path: &mut Vec<String>,
        depth: usize,
        consider: &mut dyn FnMut(Option<Finding>),
    ) {
        if depth > MAX_JSON_DEPTH {
            return;
        }
        match value {
            Value::Object(map) => {
                for (key, child) in map {
                    if self.excluded(key) {
                        continue;
                    }
                    path.push(key.clone());
                    self.walk(child, path, depth + 1, consider);
                    path.pop();
                }
            }
            Value::Array(items) => {
                for (index, child) in items.iter().enumerate() {
                    path.push(index.to_string());
                    self.walk(child, path, depth + 1, consider);
                    path.pop();
                }
            }
            Value::String(text) => consider(self.qualify(&path.join("."), text)),
            _ => {}
        }
    }
}

impl Default for EntropyDetector {
    fn default() -> Self {
        Self::new(&EntropyConfig::default())
    }
}

#[async_trait]
impl Detector for EntropyDetector {
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
        let finding = self.collect(request)?;
        // Confidence grows with how far past the threshold the value sits.
        let confidence = (0.6 + (finding.entropy - self.threshold) * 0.15).clamp(0.0, 0.95);
        Some(
            DetectorResult::new(AttackType::ObfuscatedPayload, Severity::Medium, confidence)
                .with_evidence(Evidence {
                    field: finding.field,
                    value: sanitize::evidence_value(&finding.value),
                    pattern: format!("entropy {:.2} >= {:.2}", finding.entropy, self.threshold),
                    raw_content: Some(sanitize::raw_content(&finding.value)),
                }),
        )
    }
}
