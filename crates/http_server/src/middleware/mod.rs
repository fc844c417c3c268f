//! Request/response pipeline.
//!
//! Middlewares run their `before` hooks in registration order ahead of
//! routing and their `after` hooks in reverse order behind it. A `before`
//! hook can short-circuit the pipeline by answering with a response of its
//! own, in which case routing is skipped but the `after` hooks of every
//! middleware that already ran still observe the outgoing response.

use std::sync::Arc;

use crate::http::{request::Request, response::Response};
use crate::HandlerError;

pub mod cors;

/// Outcome of a middleware's request-phase hook.
pub enum Flow {
    /// Hand the request to the next middleware, then the router.
    Continue,
    /// Answer immediately with this response and skip routing.
    Respond(Response),
}

pub trait Middleware: Send + Sync {
    fn before(&self, request: &mut Request) -> Result<Flow, HandlerError>;

    fn after(&self, response: &mut Response) -> Result<(), HandlerError>;
}

/// Ordered middleware pipeline, assembled at setup and read-only while
/// serving.
#[derive(Default)]
pub struct MiddlewareChain {
    middlewares: Vec<Arc<dyn Middleware>>,
}

impl MiddlewareChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, middleware: Arc<dyn Middleware>) {
        self.middlewares.push(middleware);
    }

    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }

    /// Runs `before` hooks in registration order.
    ///
    /// Returns how many hooks ran and, if one of them answered early, its
    /// response. An `Err` aborts the pipeline and is reported as an
    /// internal error by the caller.
    pub fn process_before(
        &self,
        request: &mut Request,
    ) -> Result<(usize, Option<Response>), HandlerError> {
        for (index, middleware) in self.middlewares.iter().enumerate() {
            match middleware.before(request)? {
                Flow::Continue => {}
                Flow::Respond(response) => return Ok((index + 1, Some(response))),
            }
        }
        Ok((self.middlewares.len(), None))
    }

    /// Runs `after` hooks of the first `ran` middlewares in reverse
    /// registration order. A failing hook is logged and skipped so the
    /// remaining hooks still observe the response.
    pub fn process_after(&self, ran: usize, response: &mut Response) {
        for middleware in self.middlewares[..ran].iter().rev() {
            if let Err(err) = middleware.after(response) {
                log::error!("middleware after hook failed: {err}");
            }
        }
    }
}
