use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::config::JwtConfig;
use crate::core::http::{HttpRequest, RequestContext};
use crate::detectors::{AttackType, Detector, DetectorResult, Evidence, Severity};
use crate::utils::net::is_internal_host;
use crate::utils::sanitize;

pub const DETECTOR_NAME: &str = "jwt";
pub const DEFAULT_PRIORITY: u8 = 75;

// Injection markers inside `kid`: traversal, SQL, shell.
static KID_INJECTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)(\.\./|\.\.\\|['\x22;]|--|\||\$\(|`)"#).unwrap());

/// Structural JWT abuse checks: `alg=none`, poisoned `kid`, attacker-pointed
/// `jku`/`x5u`. Signatures and expiry are never verified here; that belongs
/// to the application.
pub struct JwtDetector {
    headers: Vec<String>,
    priority: u8,
    enabled: bool,
}

impl JwtDetector {
    pub fn new(config: &JwtConfig) -> Self {
        Self {
            headers: config.headers.clone(),
            priority: config.priority.unwrap_or(DEFAULT_PRIORITY),
            enabled: config.enabled,
        }
    }

    fn inspect_token(&self, token: &str, header_name: &str) -> Option<DetectorResult> {
        let parts: Vec<&str> = token.split('.').collect();
        let header_json: Value = URL_SAFE_NO_PAD
            .decode(parts[0])
            .ok()
            .and_then(|bytes| serde_json::from_slice(&bytes).ok())?;

        // JWT-shaped header but not the compact three-segment form.
        if parts.len() != 3 || parts[1].is_empty() {
            return Some(self.structural_result(
                header_name,
                token,
                "malformed token structure",
                Severity::Medium,
                0.7,
            ));
        }
        let signature = parts[2];

        // alg:none family, case-insensitive, including JSON null.
        let alg_is_none = match header_json.get("alg") {
            Some(Value::String(alg)) => alg.eq_ignore_ascii_case("none"),
            Some(Value::Null) => true,
            _ => false,
        };
        if alg_is_none {
            return Some(self.structural_result(
                header_name,
                token,
                "alg=none signature bypass",
                Severity::Critical,
                0.98,
            ));
        }
        if signature.is_empty() {
            return Some(self.structural_result(
                header_name,
                token,
                "unsigned token",
                Severity::High,
                0.9,
            ));
        }

        if let Some(kid) = header_json.get("kid").and_then(Value::as_str) {
            if KID_INJECTION.is_match(kid) {
                return Some(self.structural_result(
                    header_name,
                    kid,
                    "kid header injection",
                    Severity::Critical,
                    0.95,
                ));
            }
        }

        for claim in ["jku", "x5u"] {
            if let Some(url) = header_json.get(claim).and_then(Value::as_str) {
                if url.starts_with("file://") {
                    return Some(self.structural_result(
                        header_name,
                        url,
                        "key set from file scheme",
                        Severity::Critical,
                        0.95,
                    ));
                }
                if let Some(host) = host_of(url) {
                    if is_internal_host(&host) {
                        return Some(self.structural_result(
                            header_name,
                            url,
                            "key set pointed at internal host",
                            Severity::High,
                            0.9,
                        ));
                    }
                }
            }
        }

        None
    }

    fn structural_result(
        &self,
        header_name: &str,
        value: &str,
        marker: &str,
        severity: Severity,
        confidence: f64,
    ) -> DetectorResult {
        DetectorResult::new(AttackType::JwtAttack, severity, confidence).with_evidence(Evidence {
            field: format!("header.{header_name}"),
            value: sanitize::evidence_value(value),
            pattern: marker.to_string(),
            raw_content: None,
        })
    }
}

fn host_of(url: &str) -> Option<String> {
    let rest = url.split_once("://")?.1;
    let authority = rest.split(['/', '?', '#']).next()?;
    let host = authority.rsplit_once('@').map_or(authority, |(_, h)| h);
    Some(host.to_string())
}

impl Default for JwtDetector {
    fn default() -> Self {
        Self::new(&JwtConfig::default())
    }
}

#[async_trait]
impl Detector for JwtDetector {
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
        for header_name in &self.headers {
            let Some(value) = request.header(header_name) else {
                continue;
            };
            let token = match value.strip_prefix("Bearer ").or_else(|| value.strip_prefix("bearer ")) {
                Some(token) => token.trim(),
                None => continue,
            };
            if !token.contains('.') {
                continue;
            }
            if let Some(result) = self.inspect_token(token, header_name) {
                return Some(result);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(header: &Value, signature: &str) -> String {
        let header = URL_SAFE_NO_PAD.encode(header.to_string());
        let payload = URL_SAFE_NO_PAD.encode(r#"{"sub":"user1"}"#);
        format!("{header}.{payload}.{signature}")
    }

    async fn detect(request: HttpRequest) -> Option<DetectorResult> {
        JwtDetector::default()
            .detect_request(&request, &RequestContext::new())
            .await
    }

    fn bearer(token: String) -> HttpRequest {
        HttpRequest::get("/api").with_header("authorization", format!("Bearer {token}"))
    }

    #[tokio::test]
    async fn alg_none_is_critical() {
        let jwt = token(&serde_json::json!({"alg": "none", "typ": "JWT"}), "");
        let result = detect(bearer(jwt)).await.unwrap();
        assert_eq!(result.attack_type, AttackType::JwtAttack);
        assert_eq!(result.severity, Severity::Critical);
        assert_eq!(
            result.evidence.as_ref().unwrap().pattern,
            "alg=none signature bypass"
        );
    }

    #[tokio::test]
    async fn alg_none_mixed_case() {
        let jwt = token(&serde_json::json!({"alg": "NoNe"}), "x");
        assert!(detect(bearer(jwt)).await.is_some());
    }

    #[tokio::test]
    async fn kid_traversal() {
        let jwt = token(
            &serde_json::json!({"alg": "HS256", "kid": "../../../../dev/null"}),
            "sig",
        );
        let result = detect(bearer(jwt)).await.unwrap();
        assert_eq!(result.evidence.as_ref().unwrap().pattern, "kid header injection");
    }

    #[tokio::test]
    async fn jku_internal_host() {
        let jwt = token(
            &serde_json::json!({"alg": "RS256", "jku": "http://169.254.169.254/keys"}),
            "sig",
        );
        let result = detect(bearer(jwt)).await.unwrap();
        assert_eq!(result.severity, Severity::High);
    }

    #[tokio::test]
    async fn x5u_file_scheme() {
        let jwt = token(
            &serde_json::json!({"alg": "RS256", "x5u": "file:///etc/keys.pem"}),
            "sig",
        );
        assert!(detect(bearer(jwt)).await.is_some());
    }

    #[tokio::test]
    async fn wellformed_token_passes() {
        let jwt = token(&serde_json::json!({"alg": "RS256", "typ": "JWT"}), "signature");
        assert!(detect(bearer(jwt)).await.is_none());
    }

    #[tokio::test]
    async fn non_bearer_header_ignored() {
        let request = HttpRequest::get("/api").with_header("authorization", "Basic dXNlcjpwdw==");
        assert!(detect(request).await.is_none());
    }
}
