use std::collections::HashMap;
use std::time::Instant;

use bytes::Bytes;

use crate::http::{header::HeaderMap, method::Method, version::Version};

/// A fully parsed HTTP request, owned by the connection that received it.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub version: Version,
    /// Request path, always non-empty and starting with `/`.
    pub path: String,
    /// Captures from a parameterized route, filled in by the router.
    pub path_params: HashMap<String, String>,
    /// Decoded `key=value` pairs from the query string.
    pub query_params: HashMap<String, String>,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// Body length announced by the request; zero unless the method
    /// carries a body.
    pub content_length: usize,
    /// Monotonic timestamp taken when the request line arrived.
    pub receive_time: Instant,
}

impl Request {
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key)
    }

    pub fn path_param(&self, key: &str) -> Option<&str> {
        self.path_params.get(key).map(String::as_str)
    }

    pub fn query_param(&self, key: &str) -> Option<&str> {
        self.query_params.get(key).map(String::as_str)
    }

    /// Whether the connection should close after the response.
    ///
    /// `Connection: close` always closes; HTTP/1.0 closes unless the
    /// client asked for `Keep-Alive`.
    pub fn wants_close(&self) -> bool {
        let connection = self.headers.get("Connection");
        match connection {
            Some("close") => true,
            other => self.version == Version::Http10 && other != Some("Keep-Alive"),
        }
    }
}
