//! Incoming HTTP request type.

use std::net::SocketAddr;

use bytes::Bytes;
use http::header::HOST;
use http::request::Parts;
use http::{HeaderMap, Method, Uri};
use tracing::Span;

use crate::context::Context;

/// An incoming HTTP request with its body fully read.
///
/// The server reads the body before dispatching, so handlers see it as
/// plain bytes. A zero-length body is reported as absent.
pub struct Request {
    parts: Parts,
    body: Option<Bytes>,
    params: Vec<(String, String)>,
    remote_addr: Option<SocketAddr>,
    context: Context,
}

impl Request {
    pub fn new(req: http::Request<Bytes>) -> Self {
        let (parts, body) = req.into_parts();
        Self::from_parts(parts, body)
    }

    pub(crate) fn from_parts(parts: Parts, body: Bytes) -> Self {
        Self {
            parts,
            body: (!body.is_empty()).then_some(body),
            params: Vec::new(),
            remote_addr: None,
            context: Context::default(),
        }
    }

    /// Replaces the path variables, as the router does after matching.
    pub fn with_params<K, V>(mut self, params: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.params = params
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self
    }

    /// Sets the transport-level peer address.
    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    pub fn method(&self) -> &Method { &self.parts.method }
    pub fn uri(&self) -> &Uri { &self.parts.uri }
    pub fn path(&self) -> &str { self.parts.uri.path() }
    pub fn query(&self) -> Option<&str> { self.parts.uri.query() }
    pub fn headers(&self) -> &HeaderMap { &self.parts.headers }
    pub fn body(&self) -> Option<&Bytes> { self.body.as_ref() }
    pub fn remote_addr(&self) -> Option<SocketAddr> { self.remote_addr }

    /// Header value as text. Values that are not visible ASCII read as absent.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.parts.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// `Host` header, falling back to the URI authority.
    pub fn host(&self) -> Option<&str> {
        self.parts
            .headers
            .get(HOST)
            .and_then(|v| v.to_str().ok())
            .or_else(|| self.parts.uri.authority().map(|a| a.as_str()))
    }

    /// Returns a named path parameter.
    ///
    /// For a route `/users/{id}`, `req.param("id")` on `/users/42` returns `Some("42")`.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// All path parameters in route order.
    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub(crate) fn set_context(&mut self, context: Context) {
        self.context = context;
    }

    /// Shorthand for the request span carried by the context.
    pub fn span(&self) -> &Span {
        self.context.span()
    }
}

impl From<http::Request<Bytes>> for Request {
    fn from(req: http::Request<Bytes>) -> Self {
        Self::new(req)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_body_reads_as_absent() {
        let req = Request::new(http::Request::new(Bytes::new()));
        assert!(req.body().is_none());

        let req = Request::new(http::Request::new(Bytes::from_static(b"{}")));
        assert_eq!(req.body().map(|b| b.as_ref()), Some(&b"{}"[..]));
    }

    #[test]
    fn host_falls_back_to_authority() {
        let req = Request::new(
            http::Request::builder()
                .uri("http://example.com/a?b=c")
                .body(Bytes::new())
                .unwrap(),
        );
        assert_eq!(req.host(), Some("example.com"));
        assert_eq!(req.path(), "/a");
        assert_eq!(req.query(), Some("b=c"));
    }

    #[test]
    fn param_lookup() {
        let req = Request::new(http::Request::new(Bytes::new()))
            .with_params([("id", "42"), ("name", "alice")]);
        assert_eq!(req.param("id"), Some("42"));
        assert_eq!(req.param("name"), Some("alice"));
        assert_eq!(req.param("missing"), None);
    }
}
