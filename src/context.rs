//! Per-request context.

use tracing::Span;

use crate::trace_context::TraceContext;

/// Trace identifier and request logger of one request.
///
/// Attached by the [`Tracing`](crate::middleware::Tracing) middleware and
/// moved along with the [`Request`](crate::Request). A request that never
/// went through that middleware carries an empty context.
#[derive(Clone, Debug)]
pub struct Context {
    trace: Option<TraceContext>,
    span: Span,
}

impl Context {
    pub fn new(trace: TraceContext, span: Span) -> Self {
        Self {
            trace: Some(trace),
            span,
        }
    }

    pub fn trace(&self) -> Option<&TraceContext> {
        self.trace.as_ref()
    }

    pub fn trace_id(&self) -> Option<&str> {
        self.trace.as_ref().map(|t| t.trace_id.as_str())
    }

    /// The request span, enriched with `trace_id`.
    pub fn span(&self) -> &Span {
        &self.span
    }

    /// The request logger, or `root` when no request span was attached.
    pub fn logger<'a>(&'a self, root: &'a Span) -> &'a Span {
        if self.span.is_none() { root } else { &self.span }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self {
            trace: None,
            span: Span::none(),
        }
    }
}
