use std::collections::HashMap;
use std::net::IpAddr;

use time::OffsetDateTime;
use uuid::Uuid;

// Methods whose bodies detectors inspect.
const BODY_METHODS: [&str; 3] = ["POST", "PUT", "PATCH"];

/// The request view detectors inspect.
///
/// Header names are lowercased at insertion; query parameters stay exactly
/// as they arrived — decoding is a detector concern (spec'd double-decode).
/// The body is owned bytes, so detectors can parse it repeatedly without
/// consuming anything.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    method: String,
    path: String,
    query: String,
    headers: HashMap<String, String>,
    body: Option<Vec<u8>>,
    remote_addr: Option<IpAddr>,
}

impl HttpRequest {
    /// Builds a request from a method and a path with optional query string.
    pub fn new(method: impl Into<String>, path_and_query: &str) -> Self {
        let (path, query) = match path_and_query.split_once('?') {
            Some((p, q)) => (p.to_string(), q.to_string()),
            None => (path_and_query.to_string(), String::new()),
        };
        Self {
            method: method.into().to_ascii_uppercase(),
            path,
            query,
            headers: HashMap::new(),
            body: None,
            remote_addr: None,
        }
    }

    pub fn get(path_and_query: &str) -> Self {
        Self::new("GET", path_and_query)
    }

    pub fn post(path_and_query: &str) -> Self {
        Self::new("POST", path_and_query)
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_body(mut self, content_type: &str, body: impl Into<Vec<u8>>) -> Self {
        self.headers
            .insert("content-type".to_string(), content_type.to_string());
        self.body = Some(body.into());
        self
    }

    pub fn with_json_body(self, value: &serde_json::Value) -> Self {
        self.with_body("application/json", value.to_string().into_bytes())
    }

    pub fn with_remote_addr(mut self, addr: IpAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Raw query string, without the leading `?`.
    pub fn query_string(&self) -> &str {
        &self.query
    }

    /// Query parameters as raw (still percent-encoded) name/value pairs.
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        parse_pairs(&self.query)
    }

    /// Header lookup by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(|v| v.as_str())
    }

    pub fn headers(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn body(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }

    pub fn remote_addr(&self) -> Option<IpAddr> {
        self.remote_addr
    }

    /// Media type from `content-type`, lowercased, parameters stripped.
    pub fn content_type(&self) -> Option<String> {
        self.header("content-type")
            .map(|v| v.split(';').next().unwrap_or("").trim().to_ascii_lowercase())
    }

    /// Whether this method carries a body detectors should scan.
    pub fn has_inspectable_body(&self) -> bool {
        BODY_METHODS.contains(&self.method.as_str()) && self.body.is_some()
    }

    /// Parses the body as JSON. `None` for absent bodies, wrong content
    /// types, or unparseable payloads (BAD_INPUT is silent skip).
    pub fn json_body(&self) -> Option<serde_json::Value> {
        if self.content_type().as_deref() != Some("application/json") {
            return None;
        }
        self.body
            .as_deref()
            .and_then(|bytes| serde_json::from_slice(bytes).ok())
    }

    /// Form body as raw name/value pairs, for urlencoded payloads.
    pub fn form_pairs(&self) -> Vec<(String, String)> {
        if self.content_type().as_deref() != Some("application/x-www-form-urlencoded") {
            return Vec::new();
        }
        self.body
            .as_deref()
            .map(|bytes| parse_pairs(&String::from_utf8_lossy(bytes)))
            .unwrap_or_default()
    }
}

fn parse_pairs(encoded: &str) -> Vec<(String, String)> {
    encoded
        .split('&')
        .filter(|part| !part.is_empty())
        .map(|part| match part.split_once('=') {
            Some((name, value)) => (name.to_string(), value.to_string()),
            None => (part.to_string(), String::new()),
        })
        .collect()
}

/// The response view consumed by response-phase detectors.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    status: u16,
    headers: HashMap<String, String>,
}

impl HttpResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: HashMap::new(),
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(|v| v.as_str())
    }
}

/// Per-request state threaded through detectors and handlers.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub correlation_id: Uuid,
    pub received_at: OffsetDateTime,
    /// Overrides the client-IP blocklist/counter key when set (custom
    /// extractors, tests).
    pub client_key: Option<String>,
    /// Route-matcher annotations and free-form shell data.
    pub attributes: HashMap<String, String>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self {
            correlation_id: Uuid::new_v4(),
            received_at: OffsetDateTime::now_utc(),
            client_key: None,
            attributes: HashMap::new(),
        }
    }

    pub fn with_client_key(mut self, key: impl Into<String>) -> Self {
        self.client_key = Some(key.into());
        self
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}
