use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::score::ThreatScore;

// Wire names for the built-in action kinds.
const LOG: &str = "log";
const NOTIFY: &str = "notify";
const BLOCK: &str = "block";
const UPDATE_REPUTATION: &str = "update_reputation";

/// Action discriminator. Built-ins get variants; anything else flows
/// through `Custom` so handler registration stays open-ended.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Log,
    Notify,
    Block,
    UpdateReputation,
    Custom(String),
}

impl ActionKind {
    pub fn from_name(name: &str) -> Self {
        match name {
            LOG => ActionKind::Log,
            NOTIFY => ActionKind::Notify,
            BLOCK => ActionKind::Block,
            UPDATE_REPUTATION => ActionKind::UpdateReputation,
            other => ActionKind::Custom(other.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            ActionKind::Log => LOG,
            ActionKind::Notify => NOTIFY,
            ActionKind::Block => BLOCK,
            ActionKind::UpdateReputation => UPDATE_REPUTATION,
            ActionKind::Custom(name) => name,
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl Serialize for ActionKind {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for ActionKind {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(ActionKind::from_name(&name))
    }
}

/// One resolved action with its dispatch payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    #[serde(rename = "type")]
    pub kind: ActionKind,
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl Action {
    pub fn new(kind: ActionKind) -> Self {
        Self {
            kind,
            data: Map::new(),
        }
    }

    pub fn with_data(mut self, key: &str, value: Value) -> Self {
        self.data.insert(key.to_string(), value);
        self
    }
}

/// Caller-facing outcome of one pipeline run: the emitted actions plus the
/// score that produced them. Immutable once built.
#[derive(Debug, Clone, Serialize)]
pub struct Decision {
    actions: Vec<Action>,
    score: ThreatScore,
}

impl Decision {
    pub fn new(actions: Vec<Action>, score: ThreatScore) -> Self {
        Self { actions, score }
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    pub fn score(&self) -> &ThreatScore {
        &self.score
    }

    /// Whether an action of this kind was emitted.
    pub fn has(&self, kind: &ActionKind) -> bool {
        self.actions.iter().any(|a| &a.kind == kind)
    }

    /// Payload of the first action of this kind, if any.
    pub fn get(&self, kind: &ActionKind) -> Option<&Map<String, Value>> {
        self.actions.iter().find(|a| &a.kind == kind).map(|a| &a.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::score::ThreatLevel;

    #[test]
    fn kind_roundtrips_names() {
        for name in ["log", "notify", "block", "update_reputation", "webhook2"] {
            assert_eq!(ActionKind::from_name(name).name(), name);
        }
        assert_eq!(ActionKind::from_name("block"), ActionKind::Block);
        assert_eq!(
            ActionKind::from_name("quarantine"),
            ActionKind::Custom("quarantine".into())
        );
    }

    #[test]
    fn decision_queries() {
        let score = ThreatScore {
            score: 100,
            level: ThreatLevel::Critical,
            results: vec![],
        };
        let decision = Decision::new(
            vec![
                Action::new(ActionKind::Log),
                Action::new(ActionKind::Block)
                    .with_data("ttl", Value::from(3600)),
            ],
            score,
        );
        assert!(decision.has(&ActionKind::Block));
        assert!(!decision.has(&ActionKind::Notify));
        assert_eq!(
            decision
                .get(&ActionKind::Block)
                .unwrap()
                .get("ttl")
                .unwrap()
                .as_i64(),
            Some(3600)
        );
        assert!(decision.get(&ActionKind::Notify).is_none());
    }
}
