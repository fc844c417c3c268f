//! Request dispatch.
//!
//! Routes come in two flavors, object handlers and plain callbacks, each
//! registered either for an exact `(method, path)` or for a parameterized
//! pattern such as `/users/:id`. Exact routes win over patterns; within
//! each pattern list the earliest registration wins. The router is built
//! during server setup and only read while serving.

use std::collections::HashMap;
use std::sync::Arc;

use regex::Regex;

use crate::http::{method::Method, request::Request, response::Response};
use crate::HandlerError;

/// An object-style endpoint, for handlers that carry state or group
/// related operations.
pub trait RouteHandler: Send + Sync {
    fn handle(&self, request: &Request, response: &mut Response) -> Result<(), HandlerError>;
}

/// Function-style endpoint.
pub type HandlerCallback =
    Arc<dyn Fn(&Request, &mut Response) -> Result<(), HandlerError> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RouteKey {
    method: Method,
    path: String,
}

struct PatternHandler {
    method: Method,
    pattern: Regex,
    handler: Arc<dyn RouteHandler>,
}

struct PatternCallback {
    method: Method,
    pattern: Regex,
    callback: HandlerCallback,
}

#[derive(Default)]
pub struct Router {
    handlers: HashMap<RouteKey, Arc<dyn RouteHandler>>,
    callbacks: HashMap<RouteKey, HandlerCallback>,
    pattern_handlers: Vec<PatternHandler>,
    pattern_callbacks: Vec<PatternCallback>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an exact route; a later registration for the same
    /// `(method, path)` replaces the earlier one.
    pub fn register_handler(
        &mut self,
        method: Method,
        path: impl Into<String>,
        handler: Arc<dyn RouteHandler>,
    ) {
        let key = RouteKey {
            method,
            path: path.into(),
        };
        self.handlers.insert(key, handler);
    }

    pub fn register_callback<F>(&mut self, method: Method, path: impl Into<String>, callback: F)
    where
        F: Fn(&Request, &mut Response) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        let key = RouteKey {
            method,
            path: path.into(),
        };
        self.callbacks.insert(key, Arc::new(callback));
    }

    /// Registers a parameterized route. Each `:name` segment matches one
    /// path segment; registration order sets precedence.
    pub fn add_regex_handler(
        &mut self,
        method: Method,
        pattern: &str,
        handler: Arc<dyn RouteHandler>,
    ) {
        self.pattern_handlers.push(PatternHandler {
            method,
            pattern: compile_pattern(pattern),
            handler,
        });
    }

    pub fn add_regex_callback<F>(&mut self, method: Method, pattern: &str, callback: F)
    where
        F: Fn(&Request, &mut Response) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.pattern_callbacks.push(PatternCallback {
            method,
            pattern: compile_pattern(pattern),
            callback: Arc::new(callback),
        });
    }

    /// Dispatches the request, trying exact handlers, exact callbacks,
    /// pattern handlers, then pattern callbacks. Returns `Ok(false)` when
    /// nothing matched.
    pub fn route(&self, request: &Request, response: &mut Response) -> Result<bool, HandlerError> {
        let key = RouteKey {
            method: request.method,
            path: request.path.clone(),
        };

        if let Some(handler) = self.handlers.get(&key) {
            handler.handle(request, response)?;
            return Ok(true);
        }

        if let Some(callback) = self.callbacks.get(&key) {
            callback(request, response)?;
            return Ok(true);
        }

        for entry in &self.pattern_handlers {
            if entry.method != request.method {
                continue;
            }
            if let Some(captures) = entry.pattern.captures(&request.path) {
                let matched = with_path_params(request, &captures);
                entry.handler.handle(&matched, response)?;
                return Ok(true);
            }
        }

        for entry in &self.pattern_callbacks {
            if entry.method != request.method {
                continue;
            }
            if let Some(captures) = entry.pattern.captures(&request.path) {
                let matched = with_path_params(request, &captures);
                (entry.callback)(&matched, response)?;
                return Ok(true);
            }
        }

        Ok(false)
    }
}

/// Translates `/users/:id/posts/:pid` into an anchored regex where every
/// `:name` segment becomes a `([^/]+)` capture group.
fn compile_pattern(pattern: &str) -> Regex {
    let translated: Vec<String> = pattern
        .split('/')
        .map(|segment| {
            if segment.starts_with(':') && segment.len() > 1 {
                "([^/]+)".to_string()
            } else {
                regex::escape(segment)
            }
        })
        .collect();
    Regex::new(&format!("^{}$", translated.join("/")))
        .expect("escaped route pattern is a valid regex")
}

/// Clones the request and fills `path_params` with the captures, keyed
/// `param1`, `param2`, ... in capture order.
fn with_path_params(request: &Request, captures: &regex::Captures<'_>) -> Request {
    let mut matched = request.clone();
    for index in 1..captures.len() {
        if let Some(capture) = captures.get(index) {
            matched
                .path_params
                .insert(format!("param{index}"), capture.as_str().to_string());
        }
    }
    matched
}
