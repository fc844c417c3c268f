//! Cross-origin resource sharing.
//!
//! The `before` hook answers `OPTIONS` preflights outright so they never
//! reach the router; the `after` hook stamps the allow headers onto every
//! outgoing response, since browsers also check them on the actual
//! request.

use crate::http::{method::Method, request::Request, response::Response, response::StatusCode};
use crate::middleware::{Flow, Middleware};
use crate::HandlerError;

/// Allow-list configuration for [`CorsMiddleware`].
///
/// An empty `allowed_origins` list means no origin restriction.
#[derive(Debug, Clone)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
    pub allowed_methods: Vec<String>,
    pub allowed_headers: Vec<String>,
    pub allow_credentials: bool,
    /// Preflight cache lifetime in seconds.
    pub max_age: u32,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["*".to_string()],
            allowed_methods: ["GET", "POST", "PUT", "DELETE", "OPTIONS"]
                .map(String::from)
                .to_vec(),
            allowed_headers: ["Content-Type", "Authorization"].map(String::from).to_vec(),
            allow_credentials: false,
            max_age: 3600,
        }
    }
}

pub struct CorsMiddleware {
    config: CorsConfig,
}

impl CorsMiddleware {
    pub fn new(config: CorsConfig) -> Self {
        Self { config }
    }

    fn origin_allowed(&self, origin: &str) -> bool {
        self.config.allowed_origins.is_empty()
            || self.config.allowed_origins.iter().any(|o| o == "*")
            || self.config.allowed_origins.iter().any(|o| o == origin)
    }

    fn preflight(&self, request: &Request) -> Response {
        let origin = request.header("Origin").unwrap_or_default();
        let mut response = Response::new(false);
        if !self.origin_allowed(origin) {
            log::warn!("origin not allowed: {origin}");
            response.set_status(StatusCode::FORBIDDEN);
            return response;
        }
        self.apply_headers(&mut response, origin);
        response.set_status(StatusCode::NO_CONTENT);
        response
    }

    fn apply_headers(&self, response: &mut Response, origin: &str) {
        response.set_header("Access-Control-Allow-Origin", origin);
        if self.config.allow_credentials {
            response.set_header("Access-Control-Allow-Credentials", "true");
        }
        if !self.config.allowed_methods.is_empty() {
            response.set_header(
                "Access-Control-Allow-Methods",
                self.config.allowed_methods.join(", "),
            );
        }
        if !self.config.allowed_headers.is_empty() {
            response.set_header(
                "Access-Control-Allow-Headers",
                self.config.allowed_headers.join(", "),
            );
        }
        response.set_header("Access-Control-Max-Age", self.config.max_age.to_string());
    }
}

impl Middleware for CorsMiddleware {
    fn before(&self, request: &mut Request) -> Result<Flow, HandlerError> {
        if request.method == Method::Options {
            log::info!("answering CORS preflight for {}", request.path);
            return Ok(Flow::Respond(self.preflight(request)));
        }
        Ok(Flow::Continue)
    }

    fn after(&self, response: &mut Response) -> Result<(), HandlerError> {
        if self.config.allowed_origins.is_empty() {
            return Ok(());
        }
        let origin = if self.config.allowed_origins.iter().any(|o| o == "*") {
            "*"
        } else {
            self.config.allowed_origins[0].as_str()
        };
        self.apply_headers(response, origin);
        Ok(())
    }
}
