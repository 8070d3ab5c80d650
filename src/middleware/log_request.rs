//! Debug logging of incoming requests.

use tracing::{Span, debug};

use super::Middleware;
use crate::handler::{self, BoxedHandler};
use crate::request::Request;

/// Logs method, host, URL and headers of every request at debug level.
///
/// The event goes to the request span when [`Tracing`](super::Tracing)
/// ran first, to the injected root span otherwise.
#[derive(Clone, Debug)]
pub struct LogRequest {
    root: Span,
}

impl LogRequest {
    pub fn new(root: Span) -> Self {
        Self { root }
    }
}

impl Middleware for LogRequest {
    fn name(&self) -> &'static str {
        "log_request"
    }

    fn wrap(&self, next: BoxedHandler) -> BoxedHandler {
        let root = self.root.clone();
        handler::boxed(move |req: Request| {
            debug!(
                parent: req.context().logger(&root),
                method = %req.method(),
                host = req.host(),
                url = %req.uri(),
                headers = ?req.headers(),
                "handling HTTP request"
            );
            next.call(req)
        })
    }
}
