//! Client address detection and upstream response forwarding.

use std::fmt::Display;
use std::time::Duration;

use http::header::CONTENT_TYPE;
use http_body_util::BodyExt;
use hyper::body::Body;
use tracing::debug;

use crate::context::Context;
use crate::error::Error;
use crate::request::Request;
use crate::response::Response;

const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Best guess at the address of the client that initiated the request.
///
/// Behind a load balancer appending to `X-Forwarded-For`, the last entry is
/// the balancer itself and the one before it is the peer that reached it.
/// Anything earlier came from the client and can be forged, and a single
/// entry cannot be told apart from a forged one. So with two or more entries
/// the second-to-last wins, otherwise the transport peer address is used,
/// and `0.0.0.0` when neither is known.
pub fn real_ip(req: &Request) -> String {
    if let Some(forwarded) = req.header(X_FORWARDED_FOR).map(str::trim) {
        let addresses: Vec<&str> = forwarded.split(',').collect();
        if addresses.len() >= 2 {
            return addresses[addresses.len() - 2].trim().to_owned();
        }
    }

    match req.remote_addr() {
        Some(addr) => addr.ip().to_string(),
        None => "0.0.0.0".to_owned(),
    }
}

/// Relays an upstream response: status, `content-type` and the full body.
///
/// The body is read into memory within `read_timeout`. A read failure or a
/// timeout yields a `502` error response instead of a partial copy. The
/// upstream body is consumed and released exactly once either way.
pub async fn forward_response<B>(
    ctx: &Context,
    upstream: http::Response<B>,
    read_timeout: Duration,
) -> Response
where
    B: Body,
    B::Error: Display,
{
    let (parts, body) = upstream.into_parts();

    let content = match tokio::time::timeout(read_timeout, body.collect()).await {
        Ok(Ok(collected)) => collected.to_bytes(),
        Ok(Err(err)) => {
            debug!(parent: ctx.span(), status = %parts.status, error = %err, "upstream body read failed");
            return Response::error(
                ctx,
                &Error::Upstream(format!("unable to read response body while forwarding response: {err}")),
            );
        }
        Err(_) => {
            debug!(parent: ctx.span(), status = %parts.status, timeout = ?read_timeout, "upstream body read timed out");
            return Response::error(
                ctx,
                &Error::Upstream("timed out reading response body while forwarding response".to_owned()),
            );
        }
    };

    let mut res = Response::bytes(content);
    res.set_status(parts.status);
    if let Some(content_type) = parts.headers.get(CONTENT_TYPE) {
        res.headers_mut().insert(CONTENT_TYPE, content_type.clone());
    }
    res
}
