use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::detectors::DetectorResult;

/// Threat level buckets over the 0–100 score range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreatLevel {
    None,
    Low,
    Medium,
    High,
    Critical,
}

impl ThreatLevel {
    /// Deterministic bucket mapping: 0–19 none, 20–39 low, 40–59 medium,
    /// 60–79 high, 80+ critical.
    pub fn from_score(score: u8) -> Self {
        match score {
            0..=19 => ThreatLevel::None,
            20..=39 => ThreatLevel::Low,
            40..=59 => ThreatLevel::Medium,
            60..=79 => ThreatLevel::High,
            _ => ThreatLevel::Critical,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ThreatLevel::None => "none",
            ThreatLevel::Low => "low",
            ThreatLevel::Medium => "medium",
            ThreatLevel::High => "high",
            ThreatLevel::Critical => "critical",
        }
    }
}

/// Aggregated threat assessment for one pipeline run.
#[derive(Debug, Clone, Serialize)]
pub struct ThreatScore {
    pub score: u8,
    pub level: ThreatLevel,
    pub results: Vec<DetectorResult>,
}

impl ThreatScore {
    pub fn empty() -> Self {
        Self {
            score: 0,
            level: ThreatLevel::None,
            results: Vec::new(),
        }
    }
}

/// Turns detector output into a ThreatScore.
pub trait ScoreAggregator: Send + Sync {
    fn aggregate(&self, results: Vec<DetectorResult>) -> ThreatScore;
}

fn weighted_score(result: &DetectorResult, weight: f64) -> f64 {
    result.severity.base_score() as f64 * result.confidence * weight
}

/// Scores by the strongest single detection.
#[derive(Debug, Clone, Default)]
pub struct MaxScoreAggregator;

impl ScoreAggregator for MaxScoreAggregator {
    fn aggregate(&self, results: Vec<DetectorResult>) -> ThreatScore {
        if results.is_empty() {
            return ThreatScore::empty();
        }
        let score = results
            .iter()
            .map(|r| weighted_score(r, 1.0))
            .fold(0.0f64, f64::max)
            .round()
            .clamp(0.0, 100.0) as u8;
        ThreatScore {
            score,
            level: ThreatLevel::from_score(score),
            results,
        }
    }
}

/// Scores by the weighted mean across detections, with per-detector
/// weights (defaulting to 1.0; weights above 1 amplify).
#[derive(Debug, Clone, Default)]
pub struct WeightedAggregator {
    weights: HashMap<String, f64>,
}

impl WeightedAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_weight(mut self, detector_name: &str, weight: f64) -> Self {
        self.weights.insert(detector_name.to_string(), weight);
        self
    }

    fn weight_for(&self, detector_name: &str) -> f64 {
        self.weights.get(detector_name).copied().unwrap_or(1.0)
    }
}

impl ScoreAggregator for WeightedAggregator {
    fn aggregate(&self, results: Vec<DetectorResult>) -> ThreatScore {
        if results.is_empty() {
            return ThreatScore::empty();
        }
        let sum: f64 = results
            .iter()
            .map(|r| weighted_score(r, self.weight_for(&r.detector_name)))
            .sum();
        let score = (sum / results.len() as f64).round().clamp(0.0, 100.0) as u8;
        ThreatScore {
            score,
            level: ThreatLevel::from_score(score),
            results,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detectors::{AttackType, Severity};

    fn result(severity: Severity, confidence: f64, name: &str) -> DetectorResult {
        let mut result = DetectorResult::new(AttackType::SqlInjection, severity, confidence);
        result.detector_name = name.to_string();
        result
    }

    #[test]
    fn level_buckets_are_exact() {
        assert_eq!(ThreatLevel::from_score(0), ThreatLevel::None);
        assert_eq!(ThreatLevel::from_score(19), ThreatLevel::None);
        assert_eq!(ThreatLevel::from_score(20), ThreatLevel::Low);
        assert_eq!(ThreatLevel::from_score(39), ThreatLevel::Low);
        assert_eq!(ThreatLevel::from_score(40), ThreatLevel::Medium);
        assert_eq!(ThreatLevel::from_score(59), ThreatLevel::Medium);
        assert_eq!(ThreatLevel::from_score(60), ThreatLevel::High);
        assert_eq!(ThreatLevel::from_score(79), ThreatLevel::High);
        assert_eq!(ThreatLevel::from_score(80), ThreatLevel::Critical);
        assert_eq!(ThreatLevel::from_score(100), ThreatLevel::Critical);
    }

    #[test]
    fn empty_input_scores_zero() {
        let score = MaxScoreAggregator.aggregate(vec![]);
        assert_eq!(score.score, 0);
        assert_eq!(score.level, ThreatLevel::None);
        assert!(score.results.is_empty());
    }

    #[test]
    fn max_aggregator_takes_strongest() {
        let score = MaxScoreAggregator.aggregate(vec![
            result(Severity::Low, 1.0, "a"),    // 25
            result(Severity::High, 0.95, "b"),  // 76
            result(Severity::Medium, 0.5, "c"), // 25
        ]);
        assert_eq!(score.score, 76);
        assert_eq!(score.level, ThreatLevel::High);
    }

    #[test]
    fn critical_full_confidence_is_100() {
        let score = MaxScoreAggregator.aggregate(vec![result(Severity::Critical, 1.0, "x")]);
        assert_eq!(score.score, 100);
        assert_eq!(score.level, ThreatLevel::Critical);
    }

    #[test]
    fn weighted_aggregator_averages_with_weights() {
        let aggregator = WeightedAggregator::new().with_weight("blocklist", 2.0);
        let score = aggregator.aggregate(vec![
            result(Severity::Medium, 1.0, "blocklist"), // 50 * 2 = 100
            result(Severity::Medium, 1.0, "other"),     // 50
        ]);
        // (100 + 50) / 2 = 75
        assert_eq!(score.score, 75);
        assert_eq!(score.level, ThreatLevel::High);
    }
}
