//! Shared scan engine for the pattern-based detectors.
//!
//! Every pattern scanner walks the same request surfaces in the same
//! order — query parameters (names and values), optionally the URL path,
//! the body for methods that carry one (JSON walked recursively with a
//! depth bound, form bodies as pairs), then an allow-listed set of
//! headers — and stops at the first rule hit. Candidate values are
//! percent-decoded up to twice before matching; XSS additionally decodes
//! HTML entities. JSON object keys are scanned alongside string leaves so
//! operator-style payloads (`{"$where": …}`) surface.

use regex::Regex;
use serde_json::Value;

use crate::core::http::HttpRequest;
use crate::detectors::Severity;
use crate::utils::decode::{html_entity_decode, url_decode_deep};

// Default bound on the recursive JSON walk.
pub const DEFAULT_MAX_JSON_DEPTH: usize = 32;

/// One compiled detection rule.
#[derive(Debug)]
pub struct PatternRule {
    pub regex: Regex,
    pub description: &'static str,
    pub confidence: f64,
    pub severity: Severity,
}

impl PatternRule {
    /// Compiles a rule table entry. Pattern sources are crate constants;
    /// a failure here is a programming error surfaced at first use.
    pub fn new(
        source: &str,
        description: &'static str,
        confidence: f64,
        severity: Severity,
    ) -> Self {
        Self {
            regex: Regex::new(source).unwrap_or_else(|e| panic!("bad pattern {source:?}: {e}")),
            description,
            confidence,
            severity,
        }
    }
}

/// Per-scanner knobs for the shared engine.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Query/body field names skipped entirely (exact, case-insensitive).
    pub exclude_fields: Vec<String>,
    /// When non-empty, only these query/body field names are scanned
    /// (exact, case-insensitive). Headers and path are unaffected.
    pub include_fields: Vec<String>,
    /// Headers whose values are scanned, lowercase names.
    pub header_allowlist: Vec<String>,
    /// Also scan the URL path (path traversal wants this).
    pub scan_path: bool,
    /// Decode HTML entities after percent-decoding (XSS wants this).
    pub html_decode: bool,
    pub max_json_depth: usize,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            exclude_fields: Vec::new(),
            include_fields: Vec::new(),
            header_allowlist: Vec::new(),
            scan_path: false,
            html_decode: false,
            max_json_depth: DEFAULT_MAX_JSON_DEPTH,
        }
    }
}

impl ScanOptions {
    fn excluded(&self, field_name: &str) -> bool {
        if self
            .exclude_fields
            .iter()
            .any(|f| f.eq_ignore_ascii_case(field_name))
        {
            return true;
        }
        !self.include_fields.is_empty()
            && !self
                .include_fields
                .iter()
                .any(|f| f.eq_ignore_ascii_case(field_name))
    }
}

/// First rule hit for a request, with the decoded value that matched.
#[derive(Debug, Clone)]
pub struct PatternMatch<'r> {
    pub rule: &'r PatternRule,
    /// Dotted location: `query.q`, `path`, `body.user.comment`, `header.host`.
    pub field: String,
    /// Decoded candidate value; the caller sanitizes before logging.
    pub value: String,
}

/// Runs a rule table over every candidate surface of a request.
///
/// `prefilter` is the scanner's cheap reject (a substring test) applied to
/// each decoded candidate before any regex runs.
pub fn scan_request<'r>(
    request: &HttpRequest,
    rules: &'r [PatternRule],
    options: &ScanOptions,
    prefilter: &dyn Fn(&str) -> bool,
) -> Option<PatternMatch<'r>> {
    // 1. Query parameters, names and values.
    for (name, value) in request.query_pairs() {
        if options.excluded(&name) {
            continue;
        }
        let field = format!("query.{name}");
        for candidate in [name.as_str(), value.as_str()] {
            if let Some(hit) = check(candidate, &field, rules, options, prefilter) {
                return Some(hit);
            }
        }
    }

    // 2. URL path.
    if options.scan_path {
        if let Some(hit) = check(request.path(), "path", rules, options, prefilter) {
            return Some(hit);
        }
    }

    // 3. Body, for methods that carry one.
    if request.has_inspectable_body() {
        if let Some(json) = request.json_body() {
            if let Some(hit) = scan_json(&json, rules, options, prefilter) {
                return Some(hit);
            }
        } else {
            for (name, value) in request.form_pairs() {
                if options.excluded(&name) {
                    continue;
                }
                let field = format!("body.{name}");
                for candidate in [name.as_str(), value.as_str()] {
                    if let Some(hit) = check(candidate, &field, rules, options, prefilter) {
                        return Some(hit);
                    }
                }
            }
        }
    }

    // 4. Allow-listed headers.
    for name in &options.header_allowlist {
        if let Some(value) = request.header(name) {
            let field = format!("header.{name}");
            if let Some(hit) = check(value, &field, rules, options, prefilter) {
                return Some(hit);
            }
        }
    }

    None
}

fn scan_json<'r>(
    root: &Value,
    rules: &'r [PatternRule],
    options: &ScanOptions,
    prefilter: &dyn Fn(&str) -> bool,
) -> Option<PatternMatch<'r>> {
    let mut path = vec!["body".to_string()];
    walk_json(root, &mut path, 0, rules, options, prefilter)
}

fn walk_json<'r>(
    value: &Value,
    path: &mut Vec<String>,
    depth: usize,
    rules: &'r [PatternRule],
    options: &ScanOptions,
    prefilter: &dyn Fn(&str) -> bool,
) -> Option<PatternMatch<'r>> {
    if depth > options.max_json_depth {
        return None;
    }
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                if options.excluded(key) {
                    continue;
                }
                path.push(key.clone());
                let field = path.join(".");
                if let Some(hit) = check(key, &field, rules, options, prefilter) {
                    path.pop();
                    return Some(hit);
                }
                if let Some(hit) = walk_json(child, path, depth + 1, rules, options, prefilter) {
                    path.pop();
                    return Some(hit);
                }
                path.pop();
            }
            None
        }
        Value::Array(items) => {
            for (index, child) in items.iter().enumerate() {
                path.push(index.to_string());
                if let Some(hit) = walk_json(child, path, depth + 1, rules, options, prefilter) {
                    path.pop();
                    return Some(hit);
                }
                path.pop();
            }
            None
        }
        Value::String(text) => check(text, &path.join("."), rules, options, prefilter),
        _ => None,
    }
}

fn check<'r>(
    raw: &str,
    field: &str,
    rules: &'r [PatternRule],
    options: &ScanOptions,
    prefilter: &dyn Fn(&str) -> bool,
) -> Option<PatternMatch<'r>> {
    if raw.is_empty() {
        return None;
    }
    let mut decoded = url_decode_deep(raw);
    if options.html_decode {
        decoded = html_entity_decode(&decoded);
    }
    if !prefilter(&decoded) {
        return None;
    }
    for rule in rules {
        if rule.regex.is_match(&decoded) {
            return Some(PatternMatch {
                rule,
                field: field.to_string(),
                value: decoded,
            });
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules() -> Vec<PatternRule> {
        vec![
            PatternRule::new(r"(?i)evil", "evil marker", 0.9, Severity::High),
            PatternRule::new(r"(?i)worse", "worse marker", 0.95, Severity::Critical),
        ]
    }

    fn accept_all(_: &str) -> bool {
        true
    }

    #[test]
    fn first_rule_wins_in_query() {
        let request = HttpRequest::get("/a?x=evil+and+worse");
        let rules = rules();
        let hit = scan_request(&request, &rules, &ScanOptions::default(), &accept_all).unwrap();
        assert_eq!(hit.field, "query.x");
        assert_eq!(hit.rule.description, "evil marker");
    }

    #[test]
    fn decoded_values_match() {
        let request = HttpRequest::get("/a?x=%2565vil");
        let rules = rules();
        let hit = scan_request(&request, &rules, &ScanOptions::default(), &accept_all).unwrap();
        assert_eq!(hit.value, "evil");
    }

    #[test]
    fn excluded_fields_are_skipped() {
        let request = HttpRequest::get("/a?Token=evil&q=worse");
        let rules = rules();
        let options = ScanOptions {
            exclude_fields: vec!["token".into()],
            ..Default::default()
        };
        let hit = scan_request(&request, &rules, &options, &accept_all).unwrap();
        assert_eq!(hit.field, "query.q");
    }

    #[test]
    fn json_body_walk_produces_dotted_paths() {
        let body = serde_json::json!({
            "user": {"comments": [{"text": "quite evil"}]}
        });
        let request = HttpRequest::post("/submit").with_json_body(&body);
        let rules = rules();
        let hit = scan_request(&request, &rules, &ScanOptions::default(), &accept_all).unwrap();
        assert_eq!(hit.field, "body.user.comments.0.text");
    }

    #[test]
    fn json_keys_are_candidates() {
        let body = serde_json::json!({"filter": {"evil": 1}});
        let request = HttpRequest::post("/q").with_json_body(&body);
        let rules = rules();
        let hit = scan_request(&request, &rules, &ScanOptions::default(), &accept_all).unwrap();
        assert_eq!(hit.field, "body.filter.evil");
    }

    #[test]
    fn depth_bound_stops_pathological_nesting() {
        let mut value = serde_json::json!("evil");
        for _ in 0..80 {
            value = serde_json::json!({ "n": value });
        }
        let request = HttpRequest::post("/x").with_json_body(&value);
        let rules = rules();
        assert!(scan_request(&request, &rules, &ScanOptions::default(), &accept_all).is_none());
    }

    #[test]
    fn headers_only_from_allowlist() {
        let request = HttpRequest::get("/")
            .with_header("x-custom", "evil")
            .with_header("referer", "worse");
        let rules = rules();
        let options = ScanOptions {
            header_allowlist: vec!["referer".into()],
            ..Default::default()
        };
        let hit = scan_request(&request, &rules, &options, &accept_all).unwrap();
        assert_eq!(hit.field, "header.referer");
    }

    #[test]
    fn get_bodies_are_ignored() {
        let request = HttpRequest::new("GET", "/x").with_body("application/json", r#"{"a":"evil"}"#);
        let rules = rules();
        assert!(scan_request(&request, &rules, &ScanOptions::default(), &accept_all).is_none());
    }

    #[test]
    fn prefilter_short_circuits() {
        let request = HttpRequest::get("/a?x=evil");
        let rules = rules();
        let reject_all = |_: &str| false;
        assert!(scan_request(&request, &rules, &ScanOptions::default(), &reject_all).is_none());
    }
}
