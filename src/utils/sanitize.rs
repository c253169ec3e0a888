use once_cell::sync::Lazy;
use regex::Regex;

// Constants for evidence sanitization
pub const MAX_EVIDENCE_VALUE_LENGTH: usize = 100;
pub const MAX_RAW_CONTENT_LENGTH: usize = 200;
const MASK: &str = "***";

static SENSITIVE_PATHS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(/etc/shadow|/etc/passwd|/root/)").unwrap());

static CREDENTIAL_PAIRS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\b(password|passwd|pwd|token|api[_-]?key|secret|authorization)\s*[=:]\s*[^&\s"']+"#)
        .unwrap()
});

static SCRIPT_BODY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<script\b[^>]*>.*?</script>").unwrap());

/// Masks secrets and dangerous path references inside captured evidence.
///
/// The sanitized value is safe to log and ship in notification payloads:
/// credential pairs keep their key but lose their value, sensitive filesystem
/// paths are blanked, and inline script bodies are collapsed.
pub fn sanitize_evidence(value: &str) -> String {
    let masked = SENSITIVE_PATHS.replace_all(value, MASK);
    let masked = CREDENTIAL_PAIRS.replace_all(&masked, |caps: &regex::Captures<'_>| {
        format!("{}={}", &caps[1], MASK)
    });
    let masked = SCRIPT_BODY.replace_all(&masked, "<script>***</script>");
    masked.into_owned()
}

/// Sanitizes and truncates a matched value for `evidence.value`.
pub fn evidence_value(value: &str) -> String {
    truncate(&sanitize_evidence(value), MAX_EVIDENCE_VALUE_LENGTH)
}

/// Sanitizes and truncates surrounding content for `evidence.raw_content`.
pub fn raw_content(value: &str) -> String {
    truncate(&sanitize_evidence(value), MAX_RAW_CONTENT_LENGTH)
}

/// Truncates on a char boundary without panicking on multibyte input.
pub fn truncate(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        value.to_string()
    } else {
        value.chars().take(max_chars).collect()
    }
}
