//! Distributed trace identifiers.
//!
//! Incoming requests may carry a W3C `traceparent` header
//! (`00-{trace-id}-{parent-id}-{flags}`) or Google's
//! `X-Cloud-Trace-Context` header (`{trace-id}/{decimal-span-id};o={0|1}`).
//! `traceparent` wins when both are present. Requests with neither get a
//! fresh random trace id so every request can still be correlated.

use std::fmt;

use http::HeaderMap;
use uuid::Uuid;

pub const TRACEPARENT: &str = "traceparent";
pub const CLOUD_TRACE_CONTEXT: &str = "x-cloud-trace-context";

const FLAG_SAMPLED: u8 = 0x01;

/// Trace id, span id and flags of one request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TraceContext {
    /// 16 bytes as 32 lowercase hex chars.
    pub trace_id: String,
    /// This request's span, 8 bytes as 16 hex chars.
    pub span_id: String,
    /// Span of the caller, when the trace was propagated.
    pub parent_span_id: Option<String>,
    pub flags: u8,
}

impl TraceContext {
    /// A new root trace.
    pub fn new() -> Self {
        Self {
            trace_id: Uuid::new_v4().simple().to_string(),
            span_id: generate_span_id(),
            parent_span_id: None,
            flags: FLAG_SAMPLED,
        }
    }

    /// Continues the trace found in `headers`, or starts a new one.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let header = |name| headers.get(name).and_then(|v| v.to_str().ok());

        header(TRACEPARENT)
            .and_then(Self::parse_traceparent)
            .or_else(|| header(CLOUD_TRACE_CONTEXT).and_then(Self::parse_cloud_trace))
            .unwrap_or_default()
    }

    /// Parses a W3C `traceparent` value. Only version `00` is accepted.
    pub fn parse_traceparent(value: &str) -> Option<Self> {
        let mut parts = value.trim().split('-');
        let (version, trace_id, parent_id, flags) =
            (parts.next()?, parts.next()?, parts.next()?, parts.next()?);
        if parts.next().is_some() || version != "00" {
            return None;
        }

        if !is_hex_id(trace_id, 32) || !is_hex_id(parent_id, 16) {
            return None;
        }
        if flags.len() != 2 {
            return None;
        }
        let flags = u8::from_str_radix(flags, 16).ok()?;

        Some(Self {
            trace_id: trace_id.to_ascii_lowercase(),
            span_id: generate_span_id(),
            parent_span_id: Some(parent_id.to_ascii_lowercase()),
            flags,
        })
    }

    /// Parses an `X-Cloud-Trace-Context` value. The span id and the options
    /// part are optional; the span id is decimal on the wire.
    pub fn parse_cloud_trace(value: &str) -> Option<Self> {
        let (ids, options) = match value.trim().split_once(';') {
            Some((ids, options)) => (ids, Some(options)),
            None => (value.trim(), None),
        };
        let (trace_id, span_id) = match ids.split_once('/') {
            Some((trace_id, span_id)) => (trace_id, Some(span_id)),
            None => (ids, None),
        };

        if !is_hex_id(trace_id, 32) {
            return None;
        }

        let parent_span_id = match span_id {
            Some(raw) => match raw.parse::<u64>() {
                Ok(0) | Err(_) => None,
                Ok(id) => Some(format!("{id:016x}")),
            },
            None => None,
        };

        let flags = match options {
            Some("o=0") => 0,
            _ => FLAG_SAMPLED,
        };

        Some(Self {
            trace_id: trace_id.to_ascii_lowercase(),
            span_id: generate_span_id(),
            parent_span_id,
            flags,
        })
    }

    #[inline]
    pub fn is_sampled(&self) -> bool {
        self.flags & FLAG_SAMPLED != 0
    }
}

impl Default for TraceContext {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TraceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.trace_id)
    }
}

/// Low half of a v4 UUID. The variant bits live there, so it is never zero.
fn generate_span_id() -> String {
    format!("{:016x}", Uuid::new_v4().as_u128() as u64)
}

fn is_hex_id(s: &str, len: usize) -> bool {
    s.len() == len && s.bytes().all(|b| b.is_ascii_hexdigit()) && s.bytes().any(|b| b != b'0')
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    #[test]
    fn parses_traceparent() {
        let ctx = TraceContext::parse_traceparent(
            "00-0AF7651916CD43DD8448EB211C80319C-b7ad6b7169203331-01",
        )
        .unwrap();

        assert_eq!(ctx.trace_id, "0af7651916cd43dd8448eb211c80319c");
        assert_eq!(ctx.parent_span_id.as_deref(), Some("b7ad6b7169203331"));
        assert_ne!(ctx.span_id, "b7ad6b7169203331");
        assert!(ctx.is_sampled());
    }

    #[test]
    fn rejects_malformed_traceparent() {
        for value in [
            "01-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01",
            "00-00000000000000000000000000000000-b7ad6b7169203331-01",
            "00-0af7651916cd43dd8448eb211c80319c-0000000000000000-01",
            "00-0af7651916cd43dd-b7ad6b7169203331-01",
            "00-zzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzz-b7ad6b7169203331-01",
            "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01-extra",
        ] {
            assert!(TraceContext::parse_traceparent(value).is_none(), "{value}");
        }
    }

    #[test]
    fn parses_cloud_trace_context() {
        let ctx =
            TraceContext::parse_cloud_trace("105445aa7843bc8bf206b12000100000/1;o=1").unwrap();
        assert_eq!(ctx.trace_id, "105445aa7843bc8bf206b12000100000");
        assert_eq!(ctx.parent_span_id.as_deref(), Some("0000000000000001"));
        assert!(ctx.is_sampled());

        let ctx = TraceContext::parse_cloud_trace("105445aa7843bc8bf206b12000100000;o=0").unwrap();
        assert!(ctx.parent_span_id.is_none());
        assert!(!ctx.is_sampled());
    }

    #[test]
    fn traceparent_wins_over_cloud_trace() {
        let mut headers = HeaderMap::new();
        headers.insert(
            CLOUD_TRACE_CONTEXT,
            HeaderValue::from_static("105445aa7843bc8bf206b12000100000/1;o=1"),
        );
        headers.insert(
            TRACEPARENT,
            HeaderValue::from_static("00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01"),
        );

        let ctx = TraceContext::from_headers(&headers);
        assert_eq!(ctx.trace_id, "0af7651916cd43dd8448eb211c80319c");
    }

    #[test]
    fn generates_a_trace_when_none_is_propagated() {
        let ctx = TraceContext::from_headers(&HeaderMap::new());
        assert_eq!(ctx.trace_id.len(), 32);
        assert_eq!(ctx.span_id.len(), 16);
        assert!(ctx.parent_span_id.is_none());
        assert!(ctx.is_sampled());
    }
}
