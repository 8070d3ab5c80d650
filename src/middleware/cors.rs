//! Cross-origin resource sharing.

use std::sync::Arc;

use http::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
    ACCESS_CONTROL_REQUEST_HEADERS, ACCESS_CONTROL_REQUEST_METHOD, HeaderValue, ORIGIN, VARY,
};
use http::{Method, StatusCode};
use regex::RegexSet;
use tracing::debug;

use super::Middleware;
use crate::handler::{self, BoxedHandler};
use crate::request::Request;
use crate::response::Response;

const ALLOWED_HEADERS: &[&str] = &["X-Requested-With", "Content-Type", "Authorization"];

/// Headers every preflight may ask for, whatever the configuration.
const ALWAYS_ALLOWED_HEADERS: &[&str] = &["Accept", "Accept-Language", "Content-Language", "Origin"];

fn method_allowed(method: &Method) -> bool {
    [
        Method::GET,
        Method::HEAD,
        Method::POST,
        Method::PUT,
        Method::DELETE,
        Method::OPTIONS,
    ]
    .contains(method)
}

/// Methods a preflight answer does not need to list.
fn is_simple_method(method: &Method) -> bool {
    [Method::GET, Method::HEAD, Method::POST].contains(method)
}

/// Answers preflight requests and marks allowed cross-origin responses.
///
/// Origins are configured as a comma-separated list. An entry matches the
/// whole `Origin` header exactly. `*` alone allows every origin and is
/// answered with `Access-Control-Allow-Origin: *`. A `*` inside an entry
/// stands for one DNS label, so `https://*.example.com` allows
/// `https://app.example.com` but neither `https://example.com` nor
/// `https://a.b.example.com`.
///
/// Requests without an `Origin` header pass through untouched. Requests from
/// an origin that is not allowed pass through without CORS headers, except
/// preflights which are answered with an empty `200`.
#[derive(Clone, Debug)]
pub struct Cors {
    origins: Arc<RegexSet>,
    allow_all: bool,
}

impl Cors {
    /// Fails only when an entry does not form a valid matcher.
    pub fn new(allowed_origins: &str) -> Result<Self, regex::Error> {
        let entries: Vec<&str> = allowed_origins
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .collect();

        let allow_all = entries.contains(&"*");
        let patterns = entries
            .iter()
            .filter(|entry| **entry != "*")
            .map(|entry| origin_pattern(entry));

        Ok(Self {
            origins: Arc::new(RegexSet::new(patterns)?),
            allow_all,
        })
    }

    fn origin_allowed(&self, origin: &str) -> bool {
        self.allow_all || self.origins.is_match(origin)
    }

    fn preflight(&self, req: &Request, origin: &HeaderValue) -> Response {
        let Some(method) = req.header(ACCESS_CONTROL_REQUEST_METHOD.as_str()) else {
            return Response::status(StatusCode::BAD_REQUEST);
        };
        let Ok(method) = Method::from_bytes(method.trim().as_bytes()) else {
            return Response::status(StatusCode::METHOD_NOT_ALLOWED);
        };
        if !method_allowed(&method) {
            debug!(parent: req.span(), %method, "CORS preflight for a method that is not allowed");
            return Response::status(StatusCode::METHOD_NOT_ALLOWED);
        }

        let mut requested = Vec::new();
        for name in req
            .header(ACCESS_CONTROL_REQUEST_HEADERS.as_str())
            .unwrap_or_default()
            .split(',')
        {
            let name = canonical_header(name.trim());
            if name.is_empty() || ALWAYS_ALLOWED_HEADERS.contains(&name.as_str()) {
                continue;
            }
            if !ALLOWED_HEADERS.contains(&name.as_str()) {
                debug!(parent: req.span(), header = %name, "CORS preflight for a header that is not allowed");
                return Response::status(StatusCode::FORBIDDEN);
            }
            requested.push(name);
        }

        let mut res = Response::status(StatusCode::OK);
        let headers = res.headers_mut();
        if !requested.is_empty() {
            if let Ok(value) = HeaderValue::from_str(&requested.join(",")) {
                headers.insert(ACCESS_CONTROL_ALLOW_HEADERS, value);
            }
        }
        if !is_simple_method(&method) {
            if let Ok(value) = HeaderValue::from_str(method.as_str()) {
                headers.insert(ACCESS_CONTROL_ALLOW_METHODS, value);
            }
        }
        self.allow_origin(&mut res, origin);
        res
    }

    /// `*` when every origin is allowed, otherwise the request's own origin,
    /// which makes the response vary by `Origin`.
    fn allow_origin(&self, res: &mut Response, origin: &HeaderValue) {
        let headers = res.headers_mut();
        if self.allow_all {
            headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
        } else {
            headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, origin.clone());
            headers.append(VARY, HeaderValue::from_static("Origin"));
        }
    }
}

/// Anchored matcher for one configured origin. Everything is literal except
/// `*`, which matches a single DNS label.
fn origin_pattern(entry: &str) -> String {
    let labels: Vec<String> = entry.split('*').map(regex::escape).collect();
    format!("^{}$", labels.join("[^./:]+"))
}

/// `content-type` becomes `Content-Type`.
fn canonical_header(name: &str) -> String {
    name.split('-')
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => {
                    first.to_ascii_uppercase().to_string() + &chars.as_str().to_ascii_lowercase()
                }
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}

impl Middleware for Cors {
    fn name(&self) -> &'static str {
        "cors"
    }

    fn wrap(&self, next: BoxedHandler) -> BoxedHandler {
        let cors = self.clone();
        handler::boxed(move |req: Request| {
            let cors = cors.clone();
            let next = Arc::clone(&next);
            async move {
                let Some(origin) = req.headers().get(ORIGIN).cloned() else {
                    return next.call(req).await;
                };
                let allowed = origin.to_str().is_ok_and(|o| cors.origin_allowed(o));
                let is_preflight = req.method() == Method::OPTIONS;

                match (allowed, is_preflight) {
                    (false, true) => Response::status(StatusCode::OK),
                    (false, false) => next.call(req).await,
                    (true, true) => cors.preflight(&req, &origin),
                    (true, false) => {
                        let mut res = next.call(req).await;
                        cors.allow_origin(&mut res, &origin);
                        res
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn endpoint(cors: &Cors) -> BoxedHandler {
        cors.wrap(handler::boxed(|_req: Request| async { "handled" }))
    }

    fn request(method: Method, headers: &[(&str, &str)]) -> Request {
        let mut builder = http::Request::builder().method(method).uri("/api/v1/todos");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        Request::new(builder.body(Bytes::new()).unwrap())
    }

    #[tokio::test]
    async fn allowed_origin_is_echoed() {
        let cors = Cors::new("https://app.example.com, https://*.internal").unwrap();
        let res = endpoint(&cors)
            .call(request(Method::GET, &[("origin", "https://ops.internal")]))
            .await;

        assert_eq!(res.header("access-control-allow-origin"), Some("https://ops.internal"));
        assert_eq!(res.header("vary"), Some("Origin"));
        assert_eq!(&res.into_body_bytes().await.unwrap()[..], b"handled");
    }

    #[tokio::test]
    async fn patterns_match_the_whole_origin() {
        let cors = Cors::new("https://app.example.com").unwrap();
        let res = endpoint(&cors)
            .call(request(Method::GET, &[("origin", "https://app.example.com.evil.io")]))
            .await;

        assert_eq!(res.header("access-control-allow-origin"), None);
        assert_eq!(&res.into_body_bytes().await.unwrap()[..], b"handled");
    }

    #[tokio::test]
    async fn origins_are_literal() {
        let cors = Cors::new("https://app.example.com, https://*.internal").unwrap();
        let endpoint = endpoint(&cors);

        for origin in [
            "https://appXexample.com",
            "https://app.example.co",
            "https://internal",
            "https://a.b.internal",
        ] {
            let res = endpoint.call(request(Method::GET, &[("origin", origin)])).await;
            assert_eq!(res.header("access-control-allow-origin"), None, "{origin}");
        }

        // Regex syntax in an entry is not interpreted.
        let cors = Cors::new("https://(a|b).example.com").unwrap();
        let res = endpoint_for(&cors, "https://a.example.com").await;
        assert_eq!(res.header("access-control-allow-origin"), None);
        let res = endpoint_for(&cors, "https://(a|b).example.com").await;
        assert_eq!(res.header("access-control-allow-origin"), Some("https://(a|b).example.com"));
    }

    async fn endpoint_for(cors: &Cors, origin: &str) -> Response {
        endpoint(cors).call(request(Method::GET, &[("origin", origin)])).await
    }

    #[tokio::test]
    async fn allow_all_answers_star() {
        let cors = Cors::new("*").unwrap();
        let res = endpoint_for(&cors, "https://anywhere.example").await;

        assert_eq!(res.header("access-control-allow-origin"), Some("*"));
        assert_eq!(res.header("vary"), None);
    }

    #[tokio::test]
    async fn no_origin_passes_through() {
        let cors = Cors::new("*").unwrap();
        let res = endpoint(&cors).call(request(Method::GET, &[])).await;
        assert_eq!(res.header("access-control-allow-origin"), None);
        assert_eq!(&res.into_body_bytes().await.unwrap()[..], b"handled");
    }

    #[tokio::test]
    async fn preflight_outcomes() {
        let cors = Cors::new("https://app.example.com").unwrap();
        let endpoint = endpoint(&cors);
        let origin = ("origin", "https://app.example.com");

        let ok = endpoint
            .call(request(
                Method::OPTIONS,
                &[
                    origin,
                    ("access-control-request-method", "PUT"),
                    ("access-control-request-headers", "content-type, Accept, x-requested-with"),
                ],
            ))
            .await;
        assert_eq!(ok.status_code(), StatusCode::OK);
        assert_eq!(ok.header("access-control-allow-origin"), Some("https://app.example.com"));
        assert_eq!(
            ok.header("access-control-allow-headers"),
            Some("Content-Type,X-Requested-With")
        );
        assert_eq!(ok.header("access-control-allow-methods"), Some("PUT"));
        assert!(ok.into_body_bytes().await.unwrap().is_empty());

        let bad_method = endpoint
            .call(request(Method::OPTIONS, &[origin, ("access-control-request-method", "PATCH")]))
            .await;
        assert_eq!(bad_method.status_code(), StatusCode::METHOD_NOT_ALLOWED);

        let bad_header = endpoint
            .call(request(
                Method::OPTIONS,
                &[
                    origin,
                    ("access-control-request-method", "GET"),
                    ("access-control-request-headers", "X-Api-Key"),
                ],
            ))
            .await;
        assert_eq!(bad_header.status_code(), StatusCode::FORBIDDEN);

        let no_method = endpoint.call(request(Method::OPTIONS, &[origin])).await;
        assert_eq!(no_method.status_code(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn preflight_from_disallowed_origin_is_empty() {
        let cors = Cors::new("https://app.example.com").unwrap();
        let res = endpoint(&cors)
            .call(request(
                Method::OPTIONS,
                &[("origin", "https://other.example.com"), ("access-control-request-method", "GET")],
            ))
            .await;

        assert_eq!(res.status_code(), StatusCode::OK);
        assert_eq!(res.header("access-control-allow-origin"), None);
        assert!(res.into_body_bytes().await.unwrap().is_empty());
    }

    #[test]
    fn canonicalizes_header_names() {
        assert_eq!(canonical_header("content-type"), "Content-Type");
        assert_eq!(canonical_header("X-REQUESTED-WITH"), "X-Requested-With");
        assert_eq!(canonical_header("accept"), "Accept");
    }
}
