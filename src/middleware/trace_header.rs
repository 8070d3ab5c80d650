//! `X-Trace-ID` response header.

use std::sync::Arc;

use http::header::{HeaderName, HeaderValue};
use tracing::{Span, error};

use super::Middleware;
use crate::error::Error;
use crate::handler::{self, BoxedHandler};
use crate::request::Request;
use crate::response::Response;

pub const TRACE_ID_HEADER: &str = "x-trace-id";

/// Echoes the request's trace id as `X-Trace-ID`.
///
/// Needs [`Tracing`](super::Tracing) further out in the chain. A request
/// without a trace context is logged and answered with a `500`.
#[derive(Clone, Debug)]
pub struct TraceIdHeader {
    root: Span,
}

impl TraceIdHeader {
    pub fn new(root: Span) -> Self {
        Self { root }
    }
}

impl Middleware for TraceIdHeader {
    fn name(&self) -> &'static str {
        "trace_id_header"
    }

    fn wrap(&self, next: BoxedHandler) -> BoxedHandler {
        let root = self.root.clone();
        handler::boxed(move |req: Request| {
            let next = Arc::clone(&next);
            let root = root.clone();
            async move {
                let trace_id = req.context().trace_id();
                let Some(value) = trace_id.and_then(|id| HeaderValue::from_str(id).ok()) else {
                    error!(
                        parent: &root,
                        method = %req.method(),
                        path = req.path(),
                        "trace is not present in request but should have been"
                    );
                    return Response::error(req.context(), &Error::internal("missing trace context"));
                };

                let mut res = next.call(req).await;
                res.headers_mut().insert(HeaderName::from_static(TRACE_ID_HEADER), value);
                res
            }
        })
    }
}
