use serde::{Deserialize, Serialize};

use crate::core::resolver::{Resolver, ThresholdLevel};
use crate::core::route::{RouteMatcher, RouteRule};
use crate::utils::error::Result;

/// Built-in threshold tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ThresholdPreset {
    /// Blocks only at critical scores; high scores log and notify.
    #[default]
    Standard,
    /// Blocks from the medium band up.
    Strict,
}

impl ThresholdPreset {
    pub fn levels(&self) -> Vec<ThresholdLevel> {
        match self {
            ThresholdPreset::Standard => vec![
                ThresholdLevel::new(30, &["log"]),
                ThresholdLevel::new(79, &["log", "notify"]),
                ThresholdLevel::new(100, &["block", "notify"]),
            ],
            ThresholdPreset::Strict => vec![
                ThresholdLevel::new(20, &["log"]),
                ThresholdLevel::new(39, &["log", "notify"]),
                ThresholdLevel::new(100, &["block", "notify"]),
            ],
        }
    }
}

/// Threshold table selection plus per-route overrides.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ThresholdConfig {
    pub preset: ThresholdPreset,
    /// Explicit levels override the preset entirely.
    pub levels: Option<Vec<ThresholdLevel>>,
    /// First-match route overrides (detector sets, threshold tables).
    pub routes: Vec<RouteRule>,
}

impl ThresholdConfig {
    pub fn resolver(&self) -> Result<Resolver> {
        let levels = match &self.levels {
            Some(levels) => levels.clone(),
            None => self.preset.levels(),
        };
        Resolver::new(levels)
    }

    pub fn route_matcher(&self) -> RouteMatcher {
        RouteMatcher::new(self.routes.clone())
    }
}
