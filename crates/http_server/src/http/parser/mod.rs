//! Incremental request parsing.
//!
//! One [`Context`] lives for the lifetime of a connection and is driven
//! every time bytes arrive. It resumes from its stored state, so a request
//! may be split across arbitrarily many reads and the result is the same
//! as if it had arrived in one piece.

use std::collections::HashMap;
use std::time::Instant;

use bytes::{Buf, Bytes, BytesMut};
use memchr::{memchr, memmem};

use crate::http::{header::HeaderMap, method::Method, request::Request, version::Version};

mod error;
pub use error::ParseError;

/// Parse progress for the request currently on the wire.
///
/// SPEC: RFC 9112 - 2.1. Message Format
/// HTTP-message = start-line CRLF *( field-line CRLF ) CRLF [ message-body ]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseState {
    RequestLine,
    Headers,
    Body,
    Complete,
}

/// Per-connection parser state machine.
///
/// Accumulates the fields of the request under construction; once
/// [`Context::got_all`] reports true, [`Context::take_request`] yields the
/// finished [`Request`] and re-arms the machine for the next one.
pub struct Context {
    state: ParseState,
    method: Option<Method>,
    version: Option<Version>,
    path: String,
    query_params: HashMap<String, String>,
    headers: HeaderMap,
    content_length: usize,
    receive_time: Option<Instant>,
    body: Bytes,
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Context {
    pub fn new() -> Self {
        Self {
            state: ParseState::RequestLine,
            method: None,
            version: None,
            path: String::new(),
            query_params: HashMap::new(),
            headers: HeaderMap::new(),
            content_length: 0,
            receive_time: None,
            body: Bytes::new(),
        }
    }

    /// Consumes as much of `buf` as the current state allows.
    ///
    /// `Err` means the bytes are not a well-formed request. `Ok` with
    /// [`Context::got_all`] false means more data is needed; with true,
    /// the request is ready to dispatch.
    pub fn parse(&mut self, buf: &mut BytesMut, receive_time: Instant) -> Result<(), ParseError> {
        loop {
            match self.state {
                ParseState::RequestLine => {
                    let Some(line_end) = find_crlf(buf) else {
                        return Ok(());
                    };
                    self.process_request_line(&buf[..line_end])?;
                    self.receive_time = Some(receive_time);
                    buf.advance(line_end + 2);
                    self.state = ParseState::Headers;
                }
                ParseState::Headers => {
                    let Some(line_end) = find_crlf(buf) else {
                        return Ok(());
                    };
                    if line_end == 0 {
                        // Blank line: the header block is over.
                        buf.advance(2);
                        self.finish_headers()?;
                        if self.state != ParseState::Body {
                            return Ok(());
                        }
                    } else {
                        let line = &buf[..line_end];
                        let colon = memchr(b':', line).ok_or(ParseError::MalformedHeader)?;
                        self.add_header(&line[..colon], &line[colon + 1..]);
                        buf.advance(line_end + 2);
                    }
                }
                ParseState::Body => {
                    if buf.len() < self.content_length {
                        // Suspend until the rest of the body arrives.
                        return Ok(());
                    }
                    self.body = buf.split_to(self.content_length).freeze();
                    self.state = ParseState::Complete;
                    return Ok(());
                }
                ParseState::Complete => return Ok(()),
            }
        }
    }

    pub fn got_all(&self) -> bool {
        self.state == ParseState::Complete
    }

    /// Hands out the completed request and re-arms the parser.
    ///
    /// Must only be called after [`Context::got_all`] reports true.
    pub fn take_request(&mut self) -> Request {
        debug_assert!(self.got_all());
        let request = Request {
            method: self.method.take().expect("request line was parsed"),
            version: self.version.take().expect("request line was parsed"),
            path: std::mem::take(&mut self.path),
            path_params: HashMap::new(),
            query_params: std::mem::take(&mut self.query_params),
            headers: std::mem::take(&mut self.headers),
            body: std::mem::take(&mut self.body),
            content_length: self.content_length,
            receive_time: self.receive_time.take().expect("request line was parsed"),
        };
        self.reset();
        request
    }

    /// Returns to the initial state with a fresh request under
    /// construction.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// SPEC: RFC 9112 - 3. Request Line
    /// request-line = method SP request-target SP HTTP-version
    fn process_request_line(&mut self, line: &[u8]) -> Result<(), ParseError> {
        let line = std::str::from_utf8(line).map_err(|_| ParseError::MalformedRequestLine)?;
        let mut parts = line.splitn(3, ' ');
        let method = parts.next().ok_or(ParseError::MalformedRequestLine)?;
        let target = parts.next().ok_or(ParseError::MalformedRequestLine)?;
        let version = parts.next().ok_or(ParseError::MalformedRequestLine)?;

        self.method = Some(method.parse().map_err(|_| ParseError::UnknownMethod)?);

        let path = match target.split_once('?') {
            Some((path, query)) => {
                self.parse_query(query);
                path
            }
            None => target,
        };
        if path.is_empty() || !path.starts_with('/') {
            return Err(ParseError::MalformedRequestLine);
        }
        self.path = path.to_string();

        self.version = Some(version.parse().map_err(|_| ParseError::InvalidVersion)?);
        Ok(())
    }

    /// Splits `a=1&b=2` pairs out of the query string. Pairs without an
    /// equals sign are dropped, as is a trailing ampersand.
    fn parse_query(&mut self, query: &str) {
        for pair in query.split('&') {
            if let Some((key, value)) = pair.split_once('=') {
                self.query_params
                    .insert(key.to_string(), value.to_string());
            }
        }
    }

    /// SPEC: RFC 9112 - 5. Field Syntax
    /// field-line = field-name ":" OWS field-value OWS
    ///
    /// Keys keep their exact bytes; only the value has surrounding
    /// whitespace removed.
    fn add_header(&mut self, key: &[u8], value: &[u8]) {
        let key = String::from_utf8_lossy(key).into_owned();
        let start = value
            .iter()
            .position(|b| !b.is_ascii_whitespace())
            .unwrap_or(value.len());
        let end = value
            .iter()
            .rposition(|b| !b.is_ascii_whitespace())
            .map_or(start, |pos| pos + 1);
        let value = String::from_utf8_lossy(&value[start..end]).into_owned();
        self.headers.set(key, value);
    }

    /// Runs at the header terminator and decides whether a body follows.
    fn finish_headers(&mut self) -> Result<(), ParseError> {
        let method = self.method.expect("request line was parsed");
        if !method.expects_body() {
            self.state = ParseState::Complete;
            return Ok(());
        }

        let length = self
            .headers
            .get("Content-Length")
            .ok_or(ParseError::MissingContentLength(method))?;
        self.content_length = length
            .parse()
            .map_err(|_| ParseError::InvalidContentLength)?;
        self.state = if self.content_length > 0 {
            ParseState::Body
        } else {
            ParseState::Complete
        };
        Ok(())
    }
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    memmem::find(buf, b"\r\n")
}
