//! Radix-tree request router.
//!
//! One tree for all paths, each leaf holding the handlers of every method
//! registered on that path. O(path-length) lookup. A [`Router`] is only a
//! description: [`Server::serve`](crate::Server::serve) turns it into a
//! [`RouteTable`] once, wrapping every handler in the middleware of the
//! routers it was registered on.

use std::collections::HashMap;
use std::str::Utf8Error;
use std::sync::Arc;

use http::header::ALLOW;
use http::{Method, StatusCode};
use matchit::Router as MatchitRouter;
use percent_encoding::percent_decode_str;

use crate::error::Error;
use crate::handler::{self, BoxedHandler, Handler};
use crate::middleware::{Chain, Middleware};
use crate::request::Request;
use crate::response::Response;

/// The application router.
///
/// Each call returns `self` so registrations chain naturally. Middleware
/// added with [`Router::with`] applies to every route of this router and of
/// the routers nested into it, whatever the registration order.
///
/// ```rust
/// use plumb::{Request, Response, Router};
/// # async fn list(_: Request) -> Response { Response::text("") }
/// # async fn put(_: Request) -> Response { Response::text("") }
/// # async fn health(_: Request) -> Response { Response::text("") }
///
/// let api = Router::new()
///     .get("/todos", list)
///     .put("/todos/{id}", put);
///
/// let app = Router::new()
///     .get("/healthz", health)
///     .nest("/api/v1", api);
/// ```
#[derive(Default)]
pub struct Router {
    routes: Vec<(Method, String, BoxedHandler)>,
    nested: Vec<(String, Router)>,
    chain: Chain,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler for a method + path pair.
    ///
    /// Path parameters use `{name}` syntax and are read back with
    /// [`Request::param`].
    pub fn on(mut self, method: Method, path: &str, handler: impl Handler) -> Self {
        self.routes.push((method, path.to_owned(), handler.into_endpoint()));
        self
    }

    pub fn get(self, path: &str, handler: impl Handler) -> Self {
        self.on(Method::GET, path, handler)
    }

    pub fn post(self, path: &str, handler: impl Handler) -> Self {
        self.on(Method::POST, path, handler)
    }

    pub fn put(self, path: &str, handler: impl Handler) -> Self {
        self.on(Method::PUT, path, handler)
    }

    pub fn delete(self, path: &str, handler: impl Handler) -> Self {
        self.on(Method::DELETE, path, handler)
    }

    /// Adds a middleware. The first one added is the outermost.
    pub fn with(mut self, middleware: impl Middleware) -> Self {
        self.chain.push(Arc::new(middleware));
        self
    }

    /// Mounts `router` under `prefix`. Its middleware runs inside this one's.
    pub fn nest(mut self, prefix: &str, router: Router) -> Self {
        self.nested.push((prefix.trim_end_matches('/').to_owned(), router));
        self
    }

    /// Builds the lookup table, wrapping handlers in their middleware.
    pub fn build(self) -> Result<RouteTable, Error> {
        let mut flat = Vec::new();
        self.flatten("", &Chain::new(), &mut flat);

        // Group by path, keeping the first registration's chain for the
        // fallback answering unregistered methods.
        let mut order: Vec<String> = Vec::new();
        let mut by_path: HashMap<String, PathRoutes> = HashMap::new();
        for route in flat {
            let entry = by_path.entry(route.path.clone()).or_insert_with(|| {
                order.push(route.path.clone());
                PathRoutes {
                    methods: Vec::new(),
                    chain: route.chain.clone(),
                }
            });
            if entry.methods.iter().any(|(m, _)| *m == route.method) {
                return Err(Error::Route {
                    path: route.path,
                    reason: format!("{} is registered twice", route.method),
                });
            }
            entry.methods.push((route.method, route.chain.wrap(route.handler)));
        }

        let mut tree = MatchitRouter::new();
        for path in order {
            let Some(routes) = by_path.remove(&path) else {
                continue;
            };
            let allow = routes
                .methods
                .iter()
                .map(|(m, _)| m.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            let fallback = routes.chain.wrap(method_not_allowed(allow));
            let leaf = Leaf {
                methods: routes.methods.into_iter().collect(),
                fallback,
            };
            tree.insert(path.as_str(), leaf).map_err(|e| Error::Route {
                path: path.clone(),
                reason: e.to_string(),
            })?;
        }

        Ok(RouteTable { tree })
    }

    fn flatten(self, prefix: &str, outer: &Chain, out: &mut Vec<FlatRoute>) {
        let mut chain = outer.clone();
        chain.extend(&self.chain);

        for (method, path, handler) in self.routes {
            out.push(FlatRoute {
                method,
                path: join(prefix, &path),
                handler,
                chain: chain.clone(),
            });
        }
        for (nested_prefix, router) in self.nested {
            router.flatten(&join(prefix, &nested_prefix), &chain, out);
        }
    }
}

fn join(prefix: &str, path: &str) -> String {
    match (prefix.is_empty(), path.is_empty() || path == "/") {
        (true, _) => path.to_owned(),
        (false, true) => prefix.to_owned(),
        (false, false) if path.starts_with('/') => format!("{prefix}{path}"),
        (false, false) => format!("{prefix}/{path}"),
    }
}

fn method_not_allowed(allow: String) -> BoxedHandler {
    handler::boxed(move |_req: Request| {
        let res = Response::builder()
            .status(StatusCode::METHOD_NOT_ALLOWED)
            .header(ALLOW.as_str(), &allow)
            .no_body();
        async move { res }
    })
}

struct FlatRoute {
    method: Method,
    path: String,
    handler: BoxedHandler,
    chain: Chain,
}

struct PathRoutes {
    methods: Vec<(Method, BoxedHandler)>,
    chain: Chain,
}

struct Leaf {
    methods: HashMap<Method, BoxedHandler>,
    fallback: BoxedHandler,
}

/// Routes compiled from a [`Router`], shared read-only by every connection.
pub struct RouteTable {
    tree: MatchitRouter<Leaf>,
}

impl RouteTable {
    /// Handler and percent-decoded path parameters for a request, `None` for
    /// unknown paths.
    ///
    /// A known path with an unregistered method yields a handler answering
    /// `405` behind the path's middleware, so CORS preflights still get
    /// their answer. A parameter that does not decode to UTF-8 is an error.
    pub fn lookup(
        &self,
        method: &Method,
        path: &str,
    ) -> Result<Option<(BoxedHandler, Vec<(String, String)>)>, Utf8Error> {
        let Ok(matched) = self.tree.at(path) else {
            return Ok(None);
        };
        let handler = matched
            .value
            .methods
            .get(method)
            .unwrap_or(&matched.value.fallback);
        let params = matched
            .params
            .iter()
            .map(|(k, v)| {
                let value = percent_decode_str(v).decode_utf8()?;
                Ok((k.to_owned(), value.into_owned()))
            })
            .collect::<Result<_, Utf8Error>>()?;
        Ok(Some((Arc::clone(handler), params)))
    }

    /// Routes `req` and runs its handler. Unknown paths get a `404`, path
    /// parameters that are not UTF-8 once decoded a `400`.
    pub async fn dispatch(&self, req: Request) -> Response {
        match self.lookup(req.method(), req.path()) {
            Ok(Some((handler, params))) => handler.call(req.with_params(params)).await,
            Ok(None) => Response::status(StatusCode::NOT_FOUND),
            Err(err) => {
                tracing::debug!(path = req.path(), error = %err, "path parameter is not valid UTF-8");
                Response::status(StatusCode::BAD_REQUEST)
            }
        }
    }
}
