//! Outgoing HTTP with request/response logging.
//!
//! [`LoggingTransport`] wraps a hyper client. With `debug` enabled each
//! exchange logs one line for the request (method, URL, headers) and one for
//! the response (status, size). With `trace` enabled both sides are dumped in
//! full, bodies included. The response body is then buffered so it can be
//! logged and still handed back to the caller.

use bytes::Bytes;
use http::HeaderMap;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::Body;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use tracing::{Level, Span, debug};

use crate::error::Error;

/// Body of a response returned by [`LoggingTransport::send`].
pub type ClientBody = UnsyncBoxBody<Bytes, hyper::Error>;

/// A hyper client that logs what it sends and receives.
///
/// ```rust,no_run
/// use bytes::Bytes;
/// use http_body_util::Full;
/// use plumb::LoggingTransport;
///
/// # async fn run() -> Result<(), plumb::Error> {
/// let transport = LoggingTransport::new(tracing::info_span!("upstream"));
/// let req = http::Request::get("http://127.0.0.1:8080/healthz")
///     .body(Full::new(Bytes::new()))
///     .map_err(|e| plumb::Error::internal(e.to_string()))?;
/// let res = transport.send(req).await?;
/// println!("{}", res.status());
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct LoggingTransport {
    client: Client<HttpConnector, Full<Bytes>>,
    root: Span,
}

impl LoggingTransport {
    /// Plain HTTP client, logging under `root` outside of request spans.
    pub fn new(root: Span) -> Self {
        let client = Client::builder(TokioExecutor::new()).build_http();
        Self::with_client(client, root)
    }

    pub fn with_client(client: Client<HttpConnector, Full<Bytes>>, root: Span) -> Self {
        Self { client, root }
    }

    /// Sends `req` and returns the response head with its body.
    ///
    /// Events attach to the current span when there is one, so calls made
    /// from a handler carry the request's `trace_id`.
    pub async fn send(
        &self,
        req: http::Request<Full<Bytes>>,
    ) -> Result<http::Response<ClientBody>, Error> {
        let current = Span::current();
        let span = if current.is_none() { self.root.clone() } else { current };

        let debug_enabled = tracing::enabled!(Level::DEBUG);
        let trace_enabled = tracing::enabled!(Level::TRACE);

        if trace_enabled {
            let body = req.body().clone().collect().await.map(|c| c.to_bytes());
            match body {
                Ok(body) => {
                    let head = format!("{} {} {:?}", req.method(), req.uri(), req.version());
                    debug!(parent: &span, "HTTP request\n{}", dump(&head, req.headers(), &body));
                }
                Err(never) => match never {},
            }
        } else if debug_enabled {
            debug!(
                parent: &span,
                headers = ?render_headers(req.headers()),
                "HTTP request {} {}",
                req.method(),
                req.uri(),
            );
        }

        let res = self.client.request(req).await?;

        if trace_enabled {
            let (parts, body) = res.into_parts();
            let body = body
                .collect()
                .await
                .map_err(|e| Error::Upstream(format!("unable to read response body: {e}")))?
                .to_bytes();
            let head = format!("{:?} {}", parts.version, parts.status);
            debug!(parent: &span, "HTTP response\n{}", dump(&head, &parts.headers, &body));

            let body = Full::new(body).map_err(|never| match never {}).boxed_unsync();
            return Ok(http::Response::from_parts(parts, body));
        }

        if debug_enabled {
            let length = res.body().size_hint().exact().map_or(-1, |n| n as i64);
            debug!(parent: &span, "HTTP response {} ({length} bytes)", res.status());
        }

        Ok(res.map(BodyExt::boxed_unsync))
    }
}

/// One `Name Words: v1 <> v2` entry per header name.
fn render_headers(headers: &HeaderMap) -> Vec<String> {
    headers
        .keys()
        .map(|name| {
            let values: Vec<&str> = headers
                .get_all(name)
                .iter()
                .map(|v| v.to_str().unwrap_or("<binary>"))
                .collect();
            format!("{}: {}", pascal_words(name.as_str()), values.join(" <> "))
        })
        .collect()
}

/// `content-type` becomes `Content Type`.
fn pascal_words(name: &str) -> String {
    name.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn dump(head: &str, headers: &HeaderMap, body: &Bytes) -> String {
    let mut out = String::from(head);
    for (name, value) in headers {
        out.push_str(&format!("\n{}: {}", name, String::from_utf8_lossy(value.as_bytes())));
    }
    out.push_str("\n\n");
    out.push_str(&String::from_utf8_lossy(body));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    #[test]
    fn header_names_are_pascal_words() {
        assert_eq!(pascal_words("content-type"), "Content Type");
        assert_eq!(pascal_words("x-b3-traceid"), "X B3 Traceid");
        assert_eq!(pascal_words("accept"), "Accept");
    }

    #[test]
    fn repeated_headers_are_joined() {
        let mut headers = HeaderMap::new();
        headers.append("accept", HeaderValue::from_static("text/html"));
        headers.append("accept", HeaderValue::from_static("application/json"));
        headers.insert("x-trace-id", HeaderValue::from_static("abc"));

        let mut rendered = render_headers(&headers);
        rendered.sort();
        assert_eq!(
            rendered,
            vec!["Accept: text/html <> application/json", "X Trace Id: abc"]
        );
    }

    #[test]
    fn dumps_head_headers_and_body() {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", HeaderValue::from_static("text/plain"));

        let out = dump("HTTP/1.1 200 OK", &headers, &Bytes::from_static(b"hello"));
        assert_eq!(out, "HTTP/1.1 200 OK\ncontent-type: text/plain\n\nhello");
    }
}
