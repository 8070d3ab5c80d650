//! Request tracing: trace context plus a request span.

use tracing::{Instrument, Span, info_span};

use super::Middleware;
use crate::context::Context;
use crate::handler::{self, BoxedHandler};
use crate::request::Request;
use crate::trace_context::TraceContext;

/// Attaches a [`Context`] to every request.
///
/// The trace is continued from `traceparent` or `X-Cloud-Trace-Context`,
/// or started fresh. The request span is a child of the injected root span
/// and carries `trace_id`, so every event logged under it, or through
/// [`Context::logger`], can be correlated. Downstream handlers and
/// middleware run inside that span.
#[derive(Clone, Debug)]
pub struct Tracing {
    root: Span,
}

impl Tracing {
    pub fn new(root: Span) -> Self {
        Self { root }
    }
}

impl Middleware for Tracing {
    fn name(&self) -> &'static str {
        "tracing"
    }

    fn wrap(&self, next: BoxedHandler) -> BoxedHandler {
        let root = self.root.clone();
        handler::boxed(move |mut req: Request| {
            let trace = TraceContext::from_headers(req.headers());
            let span = info_span!(
                parent: &root,
                "http_request",
                trace_id = %trace.trace_id,
                sampled = trace.is_sampled(),
                method = %req.method(),
                path = req.path(),
            );

            req.set_context(Context::new(trace, span.clone()));
            next.call(req).instrument(span)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::Response;
    use bytes::Bytes;

    fn echo_trace_id() -> BoxedHandler {
        handler::boxed(|req: Request| async move {
            Response::text(req.context().trace_id().unwrap_or("none").to_owned())
        })
    }

    #[tokio::test]
    async fn continues_incoming_trace() {
        let endpoint = Tracing::new(Span::none()).wrap(echo_trace_id());
        let req = http::Request::builder()
            .header("traceparent", "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01")
            .body(Bytes::new())
            .unwrap();

        let body = endpoint.call(Request::new(req)).await.into_body_bytes().await.unwrap();
        assert_eq!(&body[..], b"4bf92f3577b34da6a3ce929d0e0e4736");
    }

    #[tokio::test]
    async fn starts_trace_when_none_is_propagated() {
        let endpoint = Tracing::new(Span::none()).wrap(echo_trace_id());

        let first = endpoint
            .call(Request::new(http::Request::new(Bytes::new())))
            .await
            .into_body_bytes()
            .await
            .unwrap();
        let second = endpoint
            .call(Request::new(http::Request::new(Bytes::new())))
            .await
            .into_body_bytes()
            .await
            .unwrap();

        assert_eq!(first.len(), 32);
        assert_ne!(first, second);
    }
}
