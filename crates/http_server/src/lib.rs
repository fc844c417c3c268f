//! A non-blocking HTTP/1.x application server with optional TLS
//! termination.
//!
//! Connections are parsed incrementally by a per-connection state machine,
//! dispatched through an ordered middleware pipeline into a router with
//! exact and parameterized routes, and answered over the same transport.
//! With TLS enabled, a memory-buffered rustls bridge sits between the
//! socket and the parser so the crypto engine never blocks the
//! connection's task.
//!
//! ```no_run
//! use ember_http_server::{HttpServer, HttpServerConfig, StatusCode};
//!
//! let mut server = HttpServer::new(HttpServerConfig::default());
//! server.get("/", |_req, resp| {
//!     resp.set_status(StatusCode::OK);
//!     resp.set_content_type("text/plain");
//!     resp.set_body("hello");
//!     Ok(())
//! });
//! server.start();
//! ```

pub mod http;
pub mod middleware;
pub mod router;
pub mod server;
pub mod session;
pub mod tls;

pub use crate::http::header::HeaderMap;
pub use crate::http::method::Method;
pub use crate::http::parser::{Context, ParseError};
pub use crate::http::request::Request;
pub use crate::http::response::{Response, StatusCode};
pub use crate::http::Version;
pub use crate::middleware::cors::{CorsConfig, CorsMiddleware};
pub use crate::middleware::{Flow, Middleware, MiddlewareChain};
pub use crate::router::{RouteHandler, Router};
pub use crate::server::HttpServer;
pub use crate::session::{MemorySessionStorage, Session, SessionManager, SessionStorage};
pub use crate::tls::{SecureConn, TlsConfig, TlsContext, TlsError, TlsIo, TlsState, TlsVersion};

/// Errors surfaced by route handlers and middleware `before` hooks; the
/// server reports them as `500 Internal Server Error`.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Top-level server settings.
#[derive(Debug, Clone)]
pub struct HttpServerConfig {
    /// TCP port the accept loop binds.
    pub port: u16,
    /// Worker thread count of the runtime that owns the connections.
    pub thread_num: usize,
    /// Enables the TLS bridge when present.
    pub tls: Option<tls::TlsConfig>,
    /// Installs the CORS middleware when present.
    pub cors: Option<CorsConfig>,
}

impl Default for HttpServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            thread_num: 4,
            tls: None,
            cors: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Tls(#[from] tls::TlsError),
}

pub fn init_logger() {
    env_logger::init();
}
