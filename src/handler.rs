//! Handler trait, type erasure and the processor adapters.
//!
//! # How async handlers are stored
//!
//! The router holds handlers of *different* types in one table, and every
//! middleware wraps "whatever comes next" without knowing its type. Both
//! work on trait objects (`dyn Endpoint`) that hide the concrete handler
//! behind a common interface.
//!
//! The chain from user code to vtable call is:
//!
//! ```text
//! async fn todos(req: Request) -> Response { … }    ← user writes this
//!        ↓ router.get("/todos", todos)
//! todos.into_endpoint()                             ← Handler blanket impl
//!        ↓
//! Arc::new(FnHandler(todos))                        ← heap-allocated wrapper
//!        ↓  stored as BoxedHandler = Arc<dyn Endpoint>
//! middleware.wrap(handler)                          ← same type, one layer out
//!        ↓
//! handler.call(req)  at request time                ← one vtable dispatch
//! ```
//!
//! # Processors
//!
//! Most endpoints only produce a value or fail. [`json_handler`] and
//! [`raw_handler`] adapt such *processors* into handlers: an `Err` becomes
//! an error response through [`Response::error`], an `Ok` is written as JSON
//! or streamed from a reader.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::Serialize;
use tokio::io::AsyncRead;

use crate::error::Error;
use crate::request::Request;
use crate::response::{IntoResponse, Response};

// ── Erased types ──────────────────────────────────────────────────────────────

/// A heap-allocated, type-erased future that resolves to a [`Response`].
///
/// `Send + 'static` let tokio move the future across worker threads.
pub type BoxFuture = Pin<Box<dyn Future<Output = Response> + Send + 'static>>;

/// Dispatch interface shared by handlers and the middleware wrapping them.
pub trait Endpoint: Send + Sync + 'static {
    fn call(&self, req: Request) -> BoxFuture;
}

/// A type-erased handler shared across concurrent requests.
pub type BoxedHandler = Arc<dyn Endpoint>;

// ── Public Handler trait ──────────────────────────────────────────────────────

/// Implemented for every valid route handler.
///
/// You never implement this yourself. It is satisfied by any `async fn` or
/// closure with the signature:
///
/// ```text
/// async fn name(req: Request) -> impl IntoResponse
/// ```
///
/// The trait is **sealed** (via the private `Sealed` supertrait): only the
/// blanket impl below can satisfy it.
pub trait Handler: private::Sealed + Send + Sync + 'static {
    #[doc(hidden)]
    fn into_endpoint(self) -> BoxedHandler;
}

mod private {
    pub trait Sealed {}
}

impl<F, Fut, R> private::Sealed for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
}

impl<F, Fut, R> Handler for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    fn into_endpoint(self) -> BoxedHandler {
        Arc::new(FnHandler(self))
    }
}

/// Erases a handler, e.g. to build the wrapping handler of a middleware.
pub fn boxed(handler: impl Handler) -> BoxedHandler {
    handler.into_endpoint()
}

// ── Concrete wrapper ──────────────────────────────────────────────────────────

/// Holds a concrete handler `F` and implements [`Endpoint`], bridging the
/// typed world to the trait-object world.
struct FnHandler<F>(F);

impl<F, Fut, R> Endpoint for FnHandler<F>
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    fn call(&self, req: Request) -> BoxFuture {
        let fut = (self.0)(req);
        Box::pin(async move { fut.await.into_response() })
    }
}

// ── Processor adapters ────────────────────────────────────────────────────────

/// Adapts a processor returning a serializable value.
///
/// ```rust
/// use plumb::{Error, Request, Router, json_handler};
/// use serde::Serialize;
///
/// #[derive(Serialize)]
/// struct Health { healthy: bool }
///
/// async fn health(_: Request) -> Result<Health, Error> {
///     Ok(Health { healthy: true })
/// }
///
/// let router = Router::new().get("/healthz", json_handler(health));
/// ```
pub fn json_handler<P, Fut, T>(processor: P) -> impl Handler
where
    P: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, Error>> + Send + 'static,
    T: Serialize + Send + 'static,
{
    move |req: Request| {
        let ctx = req.context().clone();
        let fut = processor(req);
        async move {
            match fut.await {
                Ok(value) => Response::json(&value),
                Err(err) => Response::error(&ctx, &err),
            }
        }
    }
}

/// Adapts a processor returning a byte stream.
///
/// The reader is owned by the response body: it is dropped once fully
/// written, when writing fails or when the client goes away.
pub fn raw_handler<P, Fut, R>(processor: P) -> impl Handler
where
    P: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, Error>> + Send + 'static,
    R: AsyncRead + Send + 'static,
{
    move |req: Request| {
        let ctx = req.context().clone();
        let fut = processor(req);
        async move {
            match fut.await {
                Ok(reader) => Response::reader(reader),
                Err(err) => Response::error(&ctx, &err),
            }
        }
    }
}
