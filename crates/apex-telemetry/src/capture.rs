//! Conversion of the host's request/response into redacted payload records

use crate::redaction::{cap_structured, cap_text, Redactor};
use apex_core::config::CollectorConfig;
use apex_core::http::{HeaderMap, HttpRequest, HttpResponse};
use apex_core::models::{CapturedRequest, CapturedResponse};
use serde_json::{Map, Value};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Proxy headers consulted for the client address, in priority order
pub const REAL_IP_HEADERS: &[&str] = &[
    "cf-connecting-ip",
    "x-forwarded-for",
    "x-real-ip",
    "x-client-ip",
];

/// Redaction rules for one unit's request and response, built from config
#[derive(Debug, Clone)]
pub struct CaptureRules {
    headers: Redactor,
    body: Redactor,
    response: Redactor,
    max_size: usize,
}

impl CaptureRules {
    pub fn from_config(config: &CollectorConfig) -> Self {
        let headers = if config.headers.include_sensitive {
            Redactor::passthrough()
        } else {
            Redactor::new(&config.headers.exclude, Vec::<String>::new())
        };

        Self {
            headers,
            body: Redactor::new(&config.body.exclude, &config.body.mask),
            response: Redactor::new(&config.response.exclude, &config.response.mask),
            max_size: config.body.max_size,
        }
    }

    pub fn capture_request(&self, request: &HttpRequest) -> CapturedRequest {
        CapturedRequest {
            method: request.method.as_str().to_string(),
            uri: request.path_and_query().to_string(),
            headers: self.headers.filter(&headers_to_map(&request.headers)),
            payload: cap_structured(
                Value::Object(self.body.filter(&request.body)),
                self.max_size,
            ),
            ip_address: resolve_client_ip(request),
            user_agent: request.header("user-agent").map(str::to_string),
        }
    }

    pub fn capture_response(
        &self,
        response: Option<&HttpResponse>,
        duration_ms: u64,
    ) -> CapturedResponse {
        CapturedResponse {
            status_code: response.map(|r| r.status.as_u16()),
            response: response.map(|r| self.response_body(r)),
            duration: duration_ms,
        }
    }

    /// JSON bodies are decoded and redacted; anything else is kept as capped text
    fn response_body(&self, response: &HttpResponse) -> Value {
        if response.is_json() {
            if let Ok(decoded) = serde_json::from_str::<Value>(&response.body) {
                return cap_structured(self.response.filter_value(&decoded), self.max_size);
            }
        }

        Value::String(cap_text(&response.body, self.max_size))
    }
}

/// Group header values per lower-cased name, in arrival order
fn headers_to_map(headers: &HeaderMap) -> Map<String, Value> {
    headers
        .keys()
        .map(|name| {
            let values = headers
                .get_all(name)
                .iter()
                .map(|value| Value::String(String::from_utf8_lossy(value.as_bytes()).into_owned()))
                .collect();
            (name.as_str().to_string(), Value::Array(values))
        })
        .collect()
}

/// Best-effort client address: the first public address announced by a proxy
/// header, else the connected peer
pub fn resolve_client_ip(request: &HttpRequest) -> Option<String> {
    REAL_IP_HEADERS
        .iter()
        .filter_map(|name| request.header(name))
        .filter_map(|value| value.split(',').next())
        .filter_map(|first| first.trim().parse::<IpAddr>().ok())
        .find(is_public)
        .or(request.peer_addr)
        .map(|ip| ip.to_string())
}

fn is_public(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_public_v4(v4),
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => is_public_v4(&v4),
            None => is_public_v6(v6),
        },
    }
}

fn is_public_v4(ip: &Ipv4Addr) -> bool {
    let [a, b, ..] = ip.octets();
    let shared = a == 100 && (64..128).contains(&b);
    let reserved = a >= 240;

    !(ip.is_private()
        || ip.is_loopback()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
        || ip.is_documentation()
        || shared
        || reserved
        || a == 0)
}

fn is_public_v6(ip: &Ipv6Addr) -> bool {
    let first = ip.segments()[0];
    let unique_local = (first & 0xfe00) == 0xfc00;
    let link_local = (first & 0xffc0) == 0xfe80;
    let documentation = first == 0x2001 && ip.segments()[1] == 0x0db8;

    !(ip.is_loopback() || ip.is_unspecified() || unique_local || link_local || documentation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use apex_core::http::{HeaderValue, Method, StatusCode, Uri};
    use serde_json::json;

    fn body(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[test]
    fn test_sensitive_headers_excluded_by_default() {
        let rules = CaptureRules::from_config(&CollectorConfig::default());
        let request = HttpRequest::new(Method::GET, Uri::from_static("/api/users"))
            .with_header("Authorization", HeaderValue::from_static("Bearer secret"))
            .with_header("Cookie", HeaderValue::from_static("session=abc"))
            .with_header("Accept", HeaderValue::from_static("application/json"));

        let captured = rules.capture_request(&request);
        assert!(!captured.headers.contains_key("authorization"));
        assert!(!captured.headers.contains_key("cookie"));
        assert_eq!(captured.headers["accept"], json!(["application/json"]));
    }

    #[test]
    fn test_repeated_headers_and_query_kept() {
        let rules = CaptureRules::from_config(&CollectorConfig::default());
        let request = HttpRequest::new(Method::DELETE, Uri::from_static("/api/carts/3?notify=0"))
            .with_header("Accept", HeaderValue::from_static("text/html"))
            .with_header("accept", HeaderValue::from_static("application/json"));

        let captured = rules.capture_request(&request);
        assert_eq!(captured.method, "DELETE");
        assert_eq!(captured.uri, "/api/carts/3?notify=0");
        assert_eq!(captured.headers["accept"], json!(["text/html", "application/json"]));
    }

    #[test]
    fn test_include_sensitive_keeps_headers() {
        let mut config = CollectorConfig::default();
        config.headers.include_sensitive = true;
        let rules = CaptureRules::from_config(&config);

        let request = HttpRequest::new(Method::GET, Uri::from_static("/"))
            .with_header("Authorization", HeaderValue::from_static("Bearer secret"));
        let captured = rules.capture_request(&request);
        assert!(captured.headers.contains_key("authorization"));
    }

    #[test]
    fn test_body_redacted_and_capped() {
        let mut config = CollectorConfig::default();
        config.body.mask = vec!["email".to_string()];
        let rules = CaptureRules::from_config(&config);

        let request = HttpRequest::new(Method::POST, Uri::from_static("/api/login")).with_body(body(json!({
            "email": "ada@example.com",
            "password": "hunter2",
            "remember": true
        })));
        let captured = rules.capture_request(&request);
        assert_eq!(captured.payload, json!({ "email": "*******", "remember": true }));

        config.body.max_size = 16;
        let rules = CaptureRules::from_config(&config);
        let request = HttpRequest::new(Method::POST, Uri::from_static("/api/upload"))
            .with_body(body(json!({ "data": "x".repeat(64) })));
        let captured = rules.capture_request(&request);
        assert_eq!(captured.payload, json!({ "_truncated": "Body too large, truncated" }));
    }

    #[test]
    fn test_json_response_redacted() {
        let mut config = CollectorConfig::default();
        config.response.exclude = vec!["api_token".to_string()];
        let rules = CaptureRules::from_config(&config);

        let response = HttpResponse::new(StatusCode::OK)
            .with_header("Content-Type", HeaderValue::from_static("application/json"))
            .with_body(r#"{"id": 7, "api_token": "t0k3n"}"#);
        let captured = rules.capture_response(Some(&response), 12);

        assert_eq!(captured.status_code, Some(200));
        assert_eq!(captured.response, Some(json!({ "id": 7 })));
        assert_eq!(captured.duration, 12);
    }

    #[test]
    fn test_text_response_truncated() {
        let mut config = CollectorConfig::default();
        config.body.max_size = 5;
        let rules = CaptureRules::from_config(&config);

        let response = HttpResponse::new(StatusCode::OK)
            .with_header("Content-Type", HeaderValue::from_static("text/html"))
            .with_body("<html>hello</html>");
        let captured = rules.capture_response(Some(&response), 1);
        assert_eq!(captured.response, Some(json!("<html...[truncated]")));

        let missing = rules.capture_response(None, 3);
        assert_eq!(missing.status_code, None);
        assert_eq!(missing.response, None);
    }

    #[test]
    fn test_real_ip_prefers_public_proxy_address() {
        let request = HttpRequest::new(Method::GET, Uri::from_static("/"))
            .with_header("X-Forwarded-For", HeaderValue::from_static("203.0.114.7, 10.0.0.1"))
            .with_peer_addr("10.0.0.2".parse().unwrap());
        assert_eq!(resolve_client_ip(&request).as_deref(), Some("203.0.114.7"));
    }

    #[test]
    fn test_real_ip_ignores_private_proxy_address() {
        let request = HttpRequest::new(Method::GET, Uri::from_static("/"))
            .with_header("X-Forwarded-For", HeaderValue::from_static("192.168.1.10"))
            .with_header("X-Real-IP", HeaderValue::from_static("127.0.0.1"))
            .with_peer_addr("10.0.0.2".parse().unwrap());
        assert_eq!(resolve_client_ip(&request).as_deref(), Some("10.0.0.2"));

        let no_peer = HttpRequest::new(Method::GET, Uri::from_static("/"))
            .with_header("X-Real-IP", HeaderValue::from_static("garbage"));
        assert_eq!(resolve_client_ip(&no_peer), None);
    }

    #[test]
    fn test_cloudflare_header_wins() {
        let request = HttpRequest::new(Method::GET, Uri::from_static("/"))
            .with_header("X-Forwarded-For", HeaderValue::from_static("8.8.8.8"))
            .with_header("CF-Connecting-IP", HeaderValue::from_static("1.1.1.1"));
        assert_eq!(resolve_client_ip(&request).as_deref(), Some("1.1.1.1"));
    }
}
