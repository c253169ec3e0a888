use std::net::IpAddr;

use crate::core::http::HttpRequest;

// Headers consulted for the client address, in trust order.
const CLIENT_IP_HEADERS: [&str; 3] = ["cf-connecting-ip", "x-real-ip", "x-forwarded-for"];

/// Extracts the client IP for a request.
///
/// Proxy headers win over the socket address because the core runs behind an
/// edge; `x-forwarded-for` contributes only its first hop. Returns `None`
/// when nothing parseable is present.
pub fn client_ip(request: &HttpRequest) -> Option<IpAddr> {
    for name in CLIENT_IP_HEADERS {
        if let Some(value) = request.header(name) {
            let candidate = match name {
                "x-forwarded-for" => value.split(',').next().unwrap_or("").trim(),
                _ => value.trim(),
            };
            if let Ok(ip) = candidate.parse::<IpAddr>() {
                return Some(ip);
            }
        }
    }
    request.remote_addr()
}

/// String form of the client IP, the default blocklist/reputation key.
pub fn client_ip_string(request: &HttpRequest) -> Option<String> {
    client_ip(request).map(|ip| ip.to_string())
}

/// Whether an address falls in a private, loopback, or link-local range.
pub fn is_internal_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            let octets = v4.octets();
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_unspecified()
                || octets[0] == 100 && (octets[1] & 0xc0) == 64 // 100.64/10 CGNAT
        }
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.is_unspecified()
                || (v6.segments()[0] & 0xfe00) == 0xfc00 // fc00::/7 ULA
                || (v6.segments()[0] & 0xffc0) == 0xfe80 // fe80::/10 link-local
        }
    }
}

/// Whether a host string targets internal infrastructure.
///
/// Used by the SSRF and JWT detectors on attacker-controlled URLs, so it is
/// deliberately loose: names, bracketed v6 literals, and the cloud metadata
/// address all count.
pub fn is_internal_host(host: &str) -> bool {
    let trimmed = host.trim();
    // Bracketed IPv6 keeps everything inside the brackets; otherwise a
    // single trailing `:digits` is a port. Bare IPv6 has multiple colons
    // and is left alone.
    let host = if let Some(rest) = trimmed.strip_prefix('[') {
        rest.split(']').next().unwrap_or(rest)
    } else {
        match trimmed.rsplit_once(':') {
            Some((h, port))
                if !port.is_empty()
                    && port.chars().all(|c| c.is_ascii_digit())
                    && !h.contains(':') =>
            {
                h
            }
            _ => trimmed,
        }
    };

    if host.is_empty() {
        return false;
    }
    let lowered = host.to_ascii_lowercase();
    if lowered == "localhost"
        || lowered.ends_with(".localhost")
        || lowered.ends_with(".internal")
        || lowered.ends_with(".local")
        || lowered == "metadata.google.internal"
    {
        return true;
    }
    if lowered == "169.254.169.254" {
        return true;
    }
    match lowered.parse::<IpAddr>() {
        Ok(ip) => is_internal_ip(&ip),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::http::HttpRequest;

    #[test]
    fn prefers_cf_connecting_ip() {
        let request = HttpRequest::get("/")
            .with_header("cf-connecting-ip", "203.0.113.9")
            .with_header("x-forwarded-for", "198.51.100.1, 10.0.0.1");
        assert_eq!(client_ip_string(&request).unwrap(), "203.0.113.9");
    }

    #[test]
    fn forwarded_for_uses_first_hop() {
        let request =
            HttpRequest::get("/").with_header("x-forwarded-for", "198.51.100.1, 10.0.0.1");
        assert_eq!(client_ip_string(&request).unwrap(), "198.51.100.1");
    }

    #[test]
    fn garbage_header_falls_through() {
        let request = HttpRequest::get("/").with_header("x-real-ip", "not-an-ip");
        assert!(client_ip(&request).is_none());
    }

    #[test]
    fn internal_hosts() {
        for host in [
            "localhost",
            "127.0.0.1",
            "10.1.2.3",
            "172.16.0.1",
            "192.168.1.1",
            "169.254.169.254",
            "[::1]",
            "db.internal",
            "localhost:8080",
        ] {
            assert!(is_internal_host(host), "{host} should be internal");
        }
        for host in ["example.com", "8.8.8.8", "203.0.113.7"] {
            assert!(!is_internal_host(host), "{host} should be external");
        }
    }
}
