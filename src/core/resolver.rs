use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::decision::{Action, ActionKind};
use crate::core::score::ThreatScore;
use crate::utils::error::{Result, SentinelError};

/// One threshold bucket: the highest score it covers and the actions it
/// contributes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdLevel {
    pub max_score: u8,
    pub actions: Vec<ActionKind>,
}

impl ThresholdLevel {
    pub fn new(max_score: u8, actions: &[&str]) -> Self {
        Self {
            max_score,
            actions: actions.iter().map(|a| ActionKind::from_name(a)).collect(),
        }
    }
}

/// Maps a ThreatScore to actions via cascading threshold levels.
///
/// Each level inherits every action of the levels below it, so reaching a
/// higher bucket can only add responses, never drop one. The cascaded sets
/// are precomputed at construction; resolution is a bucket pick.
#[derive(Debug, Clone)]
pub struct Resolver {
    levels: Vec<ThresholdLevel>,
    cascaded: Vec<Vec<ActionKind>>,
}

impl Resolver {
    /// Validates and precomputes the cascade. Levels must be non-empty,
    /// strictly ascending in `max_score`, and end at 100.
    pub fn new(levels: Vec<ThresholdLevel>) -> Result<Self> {
        if levels.is_empty() {
            return Err(SentinelError::config("threshold levels are empty"));
        }
        for pair in levels.windows(2) {
            if pair[1].max_score <= pair[0].max_score {
                return Err(SentinelError::config(format!(
                    "threshold levels not ascending: {} then {}",
                    pair[0].max_score, pair[1].max_score
                )));
            }
        }
        if levels.last().map(|l| l.max_score) != Some(100) {
            return Err(SentinelError::config(
                "highest threshold level must cover score 100",
            ));
        }

        let mut cascaded: Vec<Vec<ActionKind>> = Vec::with_capacity(levels.len());
        let mut running: Vec<ActionKind> = Vec::new();
        for level in &levels {
            for action in &level.actions {
                if !running.contains(action) {
                    running.push(action.clone());
                }
            }
            cascaded.push(running.clone());
        }

        Ok(Self { levels, cascaded })
    }

    pub fn levels(&self) -> &[ThresholdLevel] {
        &self.levels
    }

    /// Emits the cascaded action set for the score's bucket, in
    /// first-occurrence order. A zero score emits nothing.
    pub fn resolve(&self, score: &ThreatScore) -> Vec<Action> {
        if score.score == 0 {
            return Vec::new();
        }
        let selected = self
            .levels
            .iter()
            .position(|level| level.max_score >= score.score);
        let Some(index) = selected else {
            return Vec::new();
        };
        debug!(
            score = score.score,
            bucket = self.levels[index].max_score,
            "threshold level selected"
        );
        self.cascaded[index]
            .iter()
            .map(|kind| Action::new(kind.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::score::{ThreatLevel, ThreatScore};

    fn levels() -> Vec<ThresholdLevel> {
        vec![
            ThresholdLevel::new(30, &["log"]),
            ThresholdLevel::new(60, &["log", "notify"]),
            ThresholdLevel::new(100, &["block", "notify"]),
        ]
    }

    fn score(value: u8) -> ThreatScore {
        ThreatScore {
            score: value,
            level: ThreatLevel::from_score(value),
            results: vec![],
        }
    }

    fn kinds(actions: &[Action]) -> Vec<&str> {
        actions.iter().map(|a| a.kind.name()).collect()
    }

    #[test]
    fn cascade_inherits_lower_levels() {
        let resolver = Resolver::new(levels()).unwrap();
        // 75 falls in the 100 bucket: {log} ∪ {log,notify} ∪ {block,notify}.
        let actions = resolver.resolve(&score(75));
        assert_eq!(kinds(&actions), vec!["log", "notify", "block"]);
    }

    #[test]
    fn low_score_gets_first_bucket_only() {
        let resolver = Resolver::new(levels()).unwrap();
        assert_eq!(kinds(&resolver.resolve(&score(25))), vec!["log"]);
    }

    #[test]
    fn mid_score_gets_first_two() {
        let resolver = Resolver::new(levels()).unwrap();
        assert_eq!(kinds(&resolver.resolve(&score(45))), vec!["log", "notify"]);
    }

    #[test]
    fn zero_score_emits_nothing() {
        let resolver = Resolver::new(levels()).unwrap();
        assert!(resolver.resolve(&score(0)).is_empty());
    }

    #[test]
    fn full_score_emits_everything() {
        let resolver = Resolver::new(levels()).unwrap();
        assert_eq!(
            kinds(&resolver.resolve(&score(100))),
            vec!["log", "notify", "block"]
        );
    }

    #[test]
    fn validation_rejects_bad_tables() {
        assert!(Resolver::new(vec![]).is_err());
        assert!(Resolver::new(vec![
            ThresholdLevel::new(60, &["log"]),
            ThresholdLevel::new(30, &["notify"]),
        ])
        .is_err());
        assert!(Resolver::new(vec![ThresholdLevel::new(90, &["log"])]).is_err());
    }

    #[test]
    fn inheritance_property_holds_for_all_buckets() {
        let resolver = Resolver::new(levels()).unwrap();
        // If level i contains A, every selected level j >= i contains A.
        let low_resolved = resolver.resolve(&score(10));
        let mid_resolved = resolver.resolve(&score(50));
        let high_resolved = resolver.resolve(&score(90));
        let low = kinds(&low_resolved);
        let mid = kinds(&mid_resolved);
        let high = kinds(&high_resolved);
        for action in &low {
            assert!(mid.contains(action) && high.contains(action));
        }
        for action in &mid {
            assert!(high.contains(action));
        }
    }
}
