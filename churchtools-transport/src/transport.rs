use async_trait::async_trait;
use churchtools_core::Params;
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::MultipartForm;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    Connect(String),
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Failed to read response body: {0}")]
    Body(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default)]
pub enum RequestBody {
    #[default]
    Empty,
    Json(Value),
    Multipart(MultipartForm),
}

impl RequestBody {
    pub fn is_multipart(&self) -> bool {
        matches!(self, RequestBody::Multipart(_))
    }
}

impl From<Value> for RequestBody {
    fn from(value: Value) -> Self {
        RequestBody::Json(value)
    }
}

impl From<Params> for RequestBody {
    fn from(params: Params) -> Self {
        RequestBody::Json(Value::Object(params))
    }
}

impl From<MultipartForm> for RequestBody {
    fn from(form: MultipartForm) -> Self {
        RequestBody::Multipart(form)
    }
}

/// A fully described request. Cloneable so it can be re-issued verbatim
/// after a backoff or a re-login.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub query: Params,
    pub headers: Vec<(String, String)>,
    pub body: RequestBody,
    pub timeout: Duration,
}

impl HttpRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        HttpRequest {
            method,
            url: url.into(),
            query: Params::new(),
            headers: Vec::new(),
            body: RequestBody::Empty,
            timeout: Duration::from_secs(15),
        }
    }

    pub fn with_query(mut self, query: Params) -> Self {
        self.query = query;
        self
    }

    pub fn with_body(mut self, body: RequestBody) -> Self {
        self.body = body;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.set_header(name, value);
        self
    }

    /// Set a header, replacing any existing one with the same name.
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        self.remove_header(name);
        self.headers.push((name.to_string(), value.into()));
    }

    pub fn remove_header(&mut self, name: &str) {
        self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// True when a query parameter is present and truthy (`true` or `"true"`).
    pub fn query_flag(&self, name: &str) -> bool {
        match self.query.get(name) {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => s == "true" || s == "1",
            _ => false,
        }
    }
}

/// A decoded response. `body` is the parsed JSON, or the raw text as a JSON
/// string when the payload was not JSON.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    /// Final URL after redirects.
    pub url: String,
    pub body: Value,
    pub is_json: bool,
}

impl HttpResponse {
    pub fn new(status: u16, url: impl Into<String>, body: Value) -> Self {
        HttpResponse {
            status,
            url: url.into(),
            body,
            is_json: true,
        }
    }

    pub fn from_bytes(status: u16, url: impl Into<String>, bytes: &[u8]) -> Self {
        let url = url.into();
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return HttpResponse::new(status, url, Value::Null);
        }
        match serde_json::from_slice::<Value>(bytes) {
            Ok(body) => HttpResponse::new(status, url, body),
            Err(_) => HttpResponse {
                status,
                url,
                body: Value::String(String::from_utf8_lossy(bytes).into_owned()),
                is_json: false,
            },
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_headers_replace_case_insensitive() {
        let mut req = HttpRequest::new(Method::Post, "https://x/api/files")
            .with_header("CSRF-Token", "a");
        req.set_header("csrf-token", "b");
        assert_eq!(req.headers.len(), 1);
        assert_eq!(req.header("Csrf-Token"), Some("b"));
        req.remove_header("CSRF-TOKEN");
        assert_eq!(req.header("CSRF-Token"), None);
    }

    #[test]
    fn test_query_flag() {
        let mut query = Params::new();
        query.insert("X-retry-login".into(), json!(true));
        query.insert("other".into(), json!("false"));
        let req = HttpRequest::new(Method::Get, "u").with_query(query);
        assert!(req.query_flag("X-retry-login"));
        assert!(!req.query_flag("other"));
        assert!(!req.query_flag("missing"));
    }

    #[test]
    fn test_response_decoding() {
        let json = HttpResponse::from_bytes(200, "u", br#"{"data": 1}"#);
        assert!(json.is_json);
        assert_eq!(json.body, json!({"data": 1}));

        let text = HttpResponse::from_bytes(200, "u", b"<html>");
        assert!(!text.is_json);
        assert_eq!(text.body, json!("<html>"));

        let empty = HttpResponse::from_bytes(204, "u", b"");
        assert_eq!(empty.body, Value::Null);
        assert!(empty.is_success());
        assert!(!HttpResponse::new(429, "u", Value::Null).is_success());
    }

    #[test]
    fn test_method_display() {
        assert_eq!(Method::Patch.to_string(), "PATCH");
        assert_eq!(Method::Delete.as_str(), "DELETE");
    }
}
