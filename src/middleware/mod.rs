//! Middleware layer.
//!
//! A middleware takes the next handler and returns a handler wrapping it,
//! so it can act before the request goes down and after the response comes
//! back up, or answer on its own without calling `next` at all.
//!
//! # Lifecycle
//!
//! ```text
//! Request → Cors → Tracing → LogRequest → Handler
//!                                            ↓
//! Response ← Cors ← Tracing ← LogRequest ←───┘
//! ```
//!
//! The first middleware registered on a [`Router`](crate::Router) is the
//! outermost one.
//!
//! # Built-in middleware
//!
//! - [`Cors`]: origin allow-list and preflight answers
//! - [`Tracing`]: trace context and a request span carrying `trace_id`
//! - [`LogRequest`]: one debug event per request
//! - [`TraceIdHeader`]: echoes the trace id as `X-Trace-ID`

mod cors;
mod log_request;
mod trace;
mod trace_header;

use std::sync::Arc;

use crate::handler::BoxedHandler;

pub use cors::Cors;
pub use log_request::LogRequest;
pub use trace::Tracing;
pub use trace_header::{TRACE_ID_HEADER, TraceIdHeader};

/// Wraps a handler with cross-cutting behavior.
///
/// ```rust
/// use plumb::handler::{self, BoxedHandler};
/// use plumb::middleware::Middleware;
/// use plumb::Request;
///
/// struct Deny;
///
/// impl Middleware for Deny {
///     fn name(&self) -> &'static str { "deny" }
///
///     fn wrap(&self, _next: BoxedHandler) -> BoxedHandler {
///         handler::boxed(|_req: Request| async { http::StatusCode::FORBIDDEN })
///     }
/// }
/// ```
pub trait Middleware: Send + Sync + 'static {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    fn wrap(&self, next: BoxedHandler) -> BoxedHandler;
}

/// Middleware applied in registration order, first is outermost.
#[derive(Clone, Default)]
pub struct Chain {
    middlewares: Vec<Arc<dyn Middleware>>,
}

impl Chain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, middleware: Arc<dyn Middleware>) {
        self.middlewares.push(middleware);
    }

    /// Appends every middleware of `inner`, which ends up inside this chain's.
    pub fn extend(&mut self, inner: &Chain) {
        self.middlewares.extend(inner.middlewares.iter().cloned());
    }

    /// Middleware names, outermost first.
    pub fn names(&self) -> Vec<&'static str> {
        self.middlewares.iter().map(|m| m.name()).collect()
    }

    /// Wraps `handler` so a request crosses the chain front to back.
    pub fn wrap(&self, handler: BoxedHandler) -> BoxedHandler {
        self.middlewares
            .iter()
            .rev()
            .fold(handler, |next, middleware| middleware.wrap(next))
    }
}

impl std::fmt::Debug for Chain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
