use serde::{Deserialize, Serialize};

use crate::core::resolver::ThresholdLevel;

/// Per-route override of the detector set and threshold table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteRule {
    /// Glob over the request path: `*` within a segment, `**` across
    /// segments, `?` for one character.
    pub pattern: String,
    /// When set, only these detectors run for the route.
    #[serde(default)]
    pub detectors: Option<Vec<String>>,
    /// When set, replaces the global threshold table for the route.
    #[serde(default)]
    pub thresholds: Option<Vec<ThresholdLevel>>,
}

/// First-match route table.
///
/// Rules are evaluated in declaration order; the first pattern that matches
/// the request path wins, so specific routes belong before catch-alls.
#[derive(Debug, Clone, Default)]
pub struct RouteMatcher {
    rules: Vec<RouteRule>,
}

impl RouteMatcher {
    pub fn new(rules: Vec<RouteRule>) -> Self {
        Self { rules }
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Finds the first rule whose pattern matches `path`.
    pub fn match_route(&self, path: &str) -> Option<&RouteRule> {
        self.rules.iter().find(|rule| glob_match(&rule.pattern, path))
    }
}

/// Segment-aware glob match.
pub fn glob_match(pattern: &str, path: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let path: Vec<char> = path.chars().collect();
    glob_at(&pattern, 0, &path, 0)
}

fn glob_at(pattern: &[char], pi: usize, path: &[char], si: usize) -> bool {
    if pi == pattern.len() {
        return si == path.len();
    }
    match pattern[pi] {
        '*' => {
            // `**` spans segments, `*` stops at `/`.
            if pattern.get(pi + 1) == Some(&'*') {
                let mut next = pi + 2;
                // Collapse `**/` so it can also match zero segments.
                if pattern.get(next) == Some(&'/') && si == path.len() {
                    next += 1;
                }
                if glob_at(pattern, next, path, si) {
                    return true;
                }
                (si < path.len()) && glob_at(pattern, pi, path, si + 1)
            } else {
                if glob_at(pattern, pi + 1, path, si) {
                    return true;
                }
                si < path.len() && path[si] != '/' && glob_at(pattern, pi, path, si + 1)
            }
        }
        '?' => si < path.len() && path[si] != '/' && glob_at(pattern, pi + 1, path, si + 1),
        c => si < path.len() && path[si] == c && glob_at(pattern, pi + 1, path, si + 1),
    }
}
