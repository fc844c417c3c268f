use std::fmt::Display;

use bytes::{BufMut, Bytes, BytesMut};

use crate::http::header::HeaderMap;
use crate::http::version::Version;

/// An HTTP status code. `StatusCode::UNKNOWN` (0) marks a response that
/// has not been filled in yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusCode(pub u16);

impl StatusCode {
    pub const UNKNOWN: Self = Self(0);
    pub const OK: Self = Self(200);
    pub const NO_CONTENT: Self = Self(204);
    pub const MOVED_PERMANENTLY: Self = Self(301);
    pub const FOUND: Self = Self(302);
    pub const BAD_REQUEST: Self = Self(400);
    pub const UNAUTHORIZED: Self = Self(401);
    pub const FORBIDDEN: Self = Self(403);
    pub const NOT_FOUND: Self = Self(404);
    pub const INTERNAL_SERVER_ERROR: Self = Self(500);

    pub const fn as_u16(&self) -> u16 {
        self.0
    }

    pub const fn canonical_reason(&self) -> Option<&'static str> {
        Some(match self.0 {
            200 => "OK",
            204 => "No Content",
            301 => "Moved Permanently",
            302 => "Found",
            400 => "Bad Request",
            401 => "Unauthorized",
            403 => "Forbidden",
            404 => "Not Found",
            500 => "Internal Server Error",
            _ => return None,
        })
    }
}

impl Display for StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// An HTTP response under construction by middleware and handlers.
///
/// The serializer does not compute `Content-Length`; whoever fills the
/// body supplies it (or uses [`Response::set_body`], which does both).
#[derive(Debug, Clone)]
pub struct Response {
    pub version: Version,
    pub status: StatusCode,
    pub status_message: String,
    /// Drives the synthesized `Connection` header and whether the server
    /// shuts the connection down after sending.
    pub close_connection: bool,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Response {
    pub fn new(close_connection: bool) -> Self {
        Self {
            version: Version::Http11,
            status: StatusCode::UNKNOWN,
            status_message: String::new(),
            close_connection,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// Sets the status code and its canonical reason phrase.
    pub fn set_status(&mut self, status: StatusCode) {
        self.status = status;
        self.status_message = status.canonical_reason().unwrap_or_default().to_string();
    }

    pub fn set_status_message(&mut self, message: impl Into<String>) {
        self.status_message = message.into();
    }

    pub fn set_header(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.headers.set(key, value);
    }

    pub fn set_content_type(&mut self, content_type: &str) {
        self.headers.set("Content-Type", content_type);
    }

    /// Stores the body and sets `Content-Length` to match.
    pub fn set_body(&mut self, body: impl Into<Bytes>) {
        self.body = body.into();
        self.headers
            .set("Content-Length", self.body.len().to_string());
    }

    /// Serializes the response onto `out` in wire order: status line,
    /// synthesized `Connection` header, user headers in insertion order,
    /// blank line, body.
    pub fn append_to(&self, out: &mut BytesMut) {
        out.extend_from_slice(b"HTTP/1.1 ");
        out.extend_from_slice(self.status.as_u16().to_string().as_bytes());
        out.put_u8(b' ');
        out.extend_from_slice(self.status_message.as_bytes());
        out.extend_from_slice(b"\r\n");

        if self.close_connection {
            out.extend_from_slice(b"Connection: close\r\n");
        } else {
            out.extend_from_slice(b"Connection: Keep-Alive\r\n");
        }

        for (key, value) in self.headers.iter() {
            out.extend_from_slice(key.as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(value.as_bytes());
            out.extend_from_slice(b"\r\n");
        }

        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(&self.body);
    }
}
