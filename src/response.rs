//! Outgoing HTTP response type and the [`IntoResponse`] conversion trait.
//!
//! Every constructor is one-shot: it sets the content type and produces the
//! payload. Nothing here retries. Once hyper starts writing a response there
//! is no channel left to report a failure to, so write failures are logged
//! and swallowed (see [`log_write_error`]).

use std::error::Error as StdError;
use std::io;

use bytes::Bytes;
use futures_util::TryStreamExt;
use http::header::{CONTENT_TYPE, HeaderName, HeaderValue};
use http::{HeaderMap, StatusCode};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Empty, Full, StreamBody};
use hyper::body::Frame;
use serde::Serialize;
use tokio::io::AsyncRead;
use tokio_util::io::ReaderStream;
use tracing::{debug, error, warn};

use crate::context::Context;
use crate::error::Error;

/// Body type handed to hyper.
pub type ResponseBody = UnsyncBoxBody<Bytes, io::Error>;

// ── ContentType ───────────────────────────────────────────────────────────────

/// Content types for [`ResponseBuilder::bytes`].
#[derive(Clone, Copy, Debug)]
pub enum ContentType {
    Html,
    Json,
    Text,
}

impl ContentType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Html => "text/html; charset=utf-8",
            Self::Json => "application/json",
            Self::Text => "text/plain; charset=utf-8",
        }
    }
}

// ── Response ─────────────────────────────────────────────────────────────────

enum Body {
    Empty,
    Full(Bytes),
    Stream(ResponseBody),
}

/// An outgoing HTTP response.
///
/// ```rust
/// use plumb::Response;
/// use serde_json::json;
///
/// Response::json(&json!({ "healthy": true }));
/// Response::text("hello");
/// Response::html("<h1>hello</h1>");
/// ```
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: Body,
}

impl Response {
    /// `200 OK`, `application/json`, `value` serialized with serde_json.
    ///
    /// A value that fails to serialize is logged and answered with a `500`.
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Self {
        Self::builder().json(value)
    }

    /// `200 OK`, `application/json`, body sent as given.
    pub fn json_string(body: impl Into<String>) -> Self {
        Self::builder().bytes(ContentType::Json, body.into())
    }

    /// `200 OK`, `text/plain; charset=utf-8`.
    pub fn text(body: impl Into<String>) -> Self {
        Self::builder().text(body)
    }

    /// `200 OK`, `text/html; charset=utf-8`.
    pub fn html(body: impl Into<String>) -> Self {
        Self::builder().bytes(ContentType::Html, body.into())
    }

    /// Renders `template` with `ctx` as an HTML response.
    ///
    /// ```rust
    /// use minijinja::{Environment, context};
    /// use plumb::Response;
    ///
    /// let mut env = Environment::new();
    /// env.add_template("hello", "<h1>Hello {{ name }}</h1>").unwrap();
    /// let tpl = env.get_template("hello").unwrap();
    /// Response::html_template(&tpl, context! { name => "alice" });
    /// ```
    pub fn html_template<S: Serialize>(template: &minijinja::Template<'_, '_>, ctx: S) -> Self {
        match template.render(ctx) {
            Ok(body) => Self::html(body),
            Err(err) => {
                error!(template = template.name(), error = %err, "failed writing HTML response");
                Self::status(StatusCode::INTERNAL_SERVER_ERROR)
            }
        }
    }

    /// `200 OK` with raw bytes and no content type.
    pub fn bytes(body: impl Into<Bytes>) -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: Body::Full(body.into()),
        }
    }

    /// `200 OK` streaming everything `reader` yields.
    ///
    /// The body owns the reader: it is dropped, and so closed, when the
    /// body finishes, fails, or the client goes away mid-transfer.
    pub fn reader<R>(reader: R) -> Self
    where
        R: AsyncRead + Send + 'static,
    {
        let stream = ReaderStream::new(reader)
            .inspect_err(|err| log_write_error("unable to copy to client", err))
            .map_ok(Frame::data);

        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: Body::Stream(StreamBody::new(stream).boxed_unsync()),
        }
    }

    /// Response with no body.
    pub fn status(code: StatusCode) -> Self {
        Self {
            status: code,
            headers: HeaderMap::new(),
            body: Body::Empty,
        }
    }

    /// JSON error response for `err`, correlated with the request's trace id.
    ///
    /// Server-side errors are logged at error level, client errors at debug.
    pub fn error(ctx: &Context, err: &Error) -> Self {
        let status = err.status();
        if status.is_server_error() {
            error!(trace_id = ctx.trace_id(), code = err.code(), error = %err, "unable to fulfill request");
        } else {
            debug!(trace_id = ctx.trace_id(), code = err.code(), error = %err, "request rejected");
        }

        let body = ErrorBody {
            code: err.code(),
            trace_id: ctx.trace_id(),
            message: err.public_message(),
            details: err.details(),
        };
        Self::builder().status(status).json(&body)
    }

    /// Builder for responses that need a custom status or extra headers.
    pub fn builder() -> ResponseBuilder {
        ResponseBuilder {
            headers: HeaderMap::new(),
            status: StatusCode::OK,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        self.status
    }

    pub fn set_status(&mut self, code: StatusCode) {
        self.status = code;
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Header value as text.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Sets `name`, replacing any previous value.
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Converts into the `http` type hyper writes.
    pub fn into_http(self) -> http::Response<ResponseBody> {
        let body = match self.body {
            Body::Empty => Empty::<Bytes>::new().map_err(|never| match never {}).boxed_unsync(),
            Body::Full(bytes) => Full::new(bytes).map_err(|never| match never {}).boxed_unsync(),
            Body::Stream(body) => body,
        };

        let mut res = http::Response::new(body);
        *res.status_mut() = self.status;
        *res.headers_mut() = self.headers;
        res
    }

    /// Reads the whole body, draining streams.
    pub async fn into_body_bytes(self) -> io::Result<Bytes> {
        match self.body {
            Body::Empty => Ok(Bytes::new()),
            Body::Full(bytes) => Ok(bytes),
            Body::Stream(body) => Ok(body.collect().await?.to_bytes()),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    code: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    trace_id: Option<&'a str>,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

// ── ResponseBuilder ───────────────────────────────────────────────────────────

/// Fluent builder for [`Response`].
///
/// Obtain via [`Response::builder()`]. Defaults to `200 OK`, terminated by a
/// typed body method.
pub struct ResponseBuilder {
    headers: HeaderMap,
    status: StatusCode,
}

impl ResponseBuilder {
    pub fn status(mut self, code: StatusCode) -> Self {
        self.status = code;
        self
    }

    /// Appends a header. Names or values that are not valid HTTP are
    /// dropped with a warning.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        match (HeaderName::try_from(name), HeaderValue::try_from(value)) {
            (Ok(name), Ok(value)) => {
                self.headers.append(name, value);
            }
            _ => warn!(header = name, "dropping invalid response header"),
        }
        self
    }

    pub fn json<T: Serialize + ?Sized>(self, value: &T) -> Response {
        match serde_json::to_vec(value) {
            Ok(body) => self.bytes(ContentType::Json, body),
            Err(err) => {
                error!(value_type = std::any::type_name::<T>(), error = %err, "failed encoding JSON response");
                Response::status(StatusCode::INTERNAL_SERVER_ERROR)
            }
        }
    }

    pub fn text(self, body: impl Into<String>) -> Response {
        self.bytes(ContentType::Text, body.into())
    }

    /// Terminate with a typed body.
    pub fn bytes(mut self, content_type: ContentType, body: impl Into<Bytes>) -> Response {
        self.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static(content_type.as_str()));
        Response {
            status: self.status,
            headers: self.headers,
            body: Body::Full(body.into()),
        }
    }

    /// Terminate with no body, e.g. for `204` or `405`.
    pub fn no_body(self) -> Response {
        Response {
            status: self.status,
            headers: self.headers,
            body: Body::Empty,
        }
    }
}

// ── IntoResponse ──────────────────────────────────────────────────────────────

/// Conversion into an HTTP [`Response`].
///
/// Route handlers return any type implementing it.
pub trait IntoResponse {
    fn into_response(self) -> Response;
}

impl IntoResponse for Response {
    fn into_response(self) -> Response { self }
}

impl IntoResponse for &'static str {
    fn into_response(self) -> Response { Response::text(self) }
}

impl IntoResponse for String {
    fn into_response(self) -> Response { Response::text(self) }
}

impl IntoResponse for StatusCode {
    fn into_response(self) -> Response { Response::status(self) }
}

// ── Write failures ────────────────────────────────────────────────────────────

/// Logs a failure to deliver a response.
///
/// A client hanging up mid-response is routine and goes to debug; anything
/// else is an error.
pub fn log_write_error(message: &str, err: &(dyn StdError + 'static)) {
    if is_client_disconnect(err) {
        debug!(error = %err, "{message}");
    } else {
        error!(error = %err, "{message}");
    }
}

/// Whether `err`, or any error in its source chain, means the peer went away.
pub fn is_client_disconnect(err: &(dyn StdError + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(err) = current {
        if let Some(io) = err.downcast_ref::<io::Error>() {
            if matches!(
                io.kind(),
                io::ErrorKind::BrokenPipe
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::UnexpectedEof
            ) {
                return true;
            }
        }
        if let Some(hyper) = err.downcast_ref::<hyper::Error>() {
            if hyper.is_canceled()
                || hyper.is_incomplete_message()
                || hyper.is_closed()
                || hyper.is_body_write_aborted()
            {
                return true;
            }
        }
        current = err.source();
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace_context::TraceContext;
    use std::pin::Pin;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::task::{Context as TaskContext, Poll};
    use tokio::io::ReadBuf;

    #[derive(Serialize)]
    struct Health {
        healthy: bool,
    }

    #[tokio::test]
    async fn json_sets_content_type() {
        let res = Response::json(&Health { healthy: true });
        assert_eq!(res.status_code(), StatusCode::OK);
        assert_eq!(res.header("content-type"), Some("application/json"));
        assert_eq!(res.into_body_bytes().await.unwrap(), r#"{"healthy":true}"#);
    }

    #[tokio::test]
    async fn text_and_html() {
        let res = Response::text("hi");
        assert_eq!(res.header("content-type"), Some("text/plain; charset=utf-8"));

        let res = Response::html("<b>hi</b>");
        assert_eq!(res.header("content-type"), Some("text/html; charset=utf-8"));
        assert_eq!(res.into_body_bytes().await.unwrap(), "<b>hi</b>");
    }

    #[tokio::test]
    async fn renders_templates() {
        let mut env = minijinja::Environment::new();
        env.add_template("hello", "<h1>Hello {{ name }}</h1>").unwrap();
        let tpl = env.get_template("hello").unwrap();

        let res = Response::html_template(&tpl, minijinja::context! { name => "alice" });
        assert_eq!(res.into_body_bytes().await.unwrap(), "<h1>Hello alice</h1>");
    }

    #[tokio::test]
    async fn failing_template_is_a_server_error() {
        let mut env = minijinja::Environment::new();
        env.add_template("broken", "{{ missing.field }}").unwrap();
        env.set_undefined_behavior(minijinja::UndefinedBehavior::Strict);
        let tpl = env.get_template("broken").unwrap();

        let res = Response::html_template(&tpl, minijinja::context! {});
        assert_eq!(res.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn bytes_carry_no_content_type() {
        let res = Response::bytes(&b"raw"[..]);
        assert!(res.header("content-type").is_none());
        assert_eq!(res.into_body_bytes().await.unwrap(), "raw");
    }

    #[tokio::test]
    async fn error_body_carries_trace_id_and_details() {
        let trace = TraceContext::parse_traceparent(
            "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01",
        )
        .unwrap();
        let ctx = Context::new(trace, tracing::Span::none());

        let res = Response::error(&ctx, &Error::MissingBody);
        assert_eq!(res.status_code(), StatusCode::BAD_REQUEST);

        let body: serde_json::Value =
            serde_json::from_slice(&res.into_body_bytes().await.unwrap()).unwrap();
        assert_eq!(
            body,
            serde_json::json!({
                "code": "missing_body_error",
                "trace_id": "0af7651916cd43dd8448eb211c80319c",
                "message": "The request body is required",
            })
        );
    }

    struct CountingReader {
        data: &'static [u8],
        drops: Arc<AtomicUsize>,
    }

    impl AsyncRead for CountingReader {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut TaskContext<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            let n = self.data.len().min(buf.remaining());
            buf.put_slice(&self.data[..n]);
            self.data = &self.data[n..];
            Poll::Ready(Ok(()))
        }
    }

    impl Drop for CountingReader {
        fn drop(&mut self) {
            self.drops.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn reader_is_streamed_and_closed() {
        let drops = Arc::new(AtomicUsize::new(0));
        let res = Response::reader(CountingReader {
            data: b"streamed body",
            drops: Arc::clone(&drops),
        });

        assert_eq!(res.into_body_bytes().await.unwrap(), "streamed body");
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn reader_is_closed_when_response_is_abandoned() {
        let drops = Arc::new(AtomicUsize::new(0));
        let res = Response::reader(CountingReader {
            data: b"never sent",
            drops: Arc::clone(&drops),
        });

        drop(res.into_http());
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn classifies_client_disconnects() {
        let reset = io::Error::new(io::ErrorKind::ConnectionReset, "reset by peer");
        assert!(is_client_disconnect(&reset));

        let wrapped = Error::Io(io::Error::new(io::ErrorKind::BrokenPipe, "pipe"));
        assert!(is_client_disconnect(&wrapped));

        let other = io::Error::new(io::ErrorKind::PermissionDenied, "nope");
        assert!(!is_client_disconnect(&other));
    }
}
