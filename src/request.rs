//! Request snapshot handed to mock handlers.

use axum::body::Bytes;
use std::collections::HashMap;

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Owned view of an intercepted request.
///
/// Built once by the dispatcher after the body has been buffered. Handlers
/// only ever see this type, never the host's HTTP request.
#[derive(Debug, Clone, Default)]
pub struct MockRequest {
    /// HTTP method, upper case
    pub method: String,
    /// Request path without the query string
    pub path: String,
    /// Raw query string, if any
    pub query_string: Option<String>,
    /// Decoded query parameters
    pub query: HashMap<String, String>,
    /// Named parameters captured by a parameterized route
    pub params: HashMap<String, String>,
    /// Request headers (first value per name, lower-cased names)
    pub headers: HashMap<String, String>,
    /// Buffered request body
    pub body: Bytes,
}

impl MockRequest {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into().to_uppercase(),
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn with_query(mut self, query_string: &str) -> Self {
        self.query = serde_urlencoded::from_str(query_string).unwrap_or_default();
        self.query_string = Some(query_string.to_string());
        self
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_lowercase(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Body as UTF-8 text, if it is valid UTF-8 and non-empty.
    pub fn body_text(&self) -> Option<&str> {
        if self.body.is_empty() {
            return None;
        }
        std::str::from_utf8(&self.body).ok()
    }

    /// Body parsed as JSON, if it parses.
    pub fn json(&self) -> Option<serde_json::Value> {
        self.body_text().and_then(|s| serde_json::from_str(s).ok())
    }

    /// Fields of an `application/x-www-form-urlencoded` body.
    ///
    /// `None` unless the content type says the body is a form.
    pub fn form(&self) -> Option<HashMap<String, String>> {
        let content_type = self.headers.get("content-type")?;
        let mime = content_type.split(';').next().unwrap_or_default().trim();
        if !mime.eq_ignore_ascii_case(FORM_CONTENT_TYPE) {
            return None;
        }
        serde_urlencoded::from_bytes(&self.body).ok()
    }
}
