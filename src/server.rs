//! HTTP server and graceful shutdown.
//!
//! # Graceful shutdown and Kubernetes
//!
//! When Kubernetes terminates a pod it sends **SIGTERM** and waits
//! `terminationGracePeriodSeconds` (default 30 s) before sending SIGKILL.
//!
//! The server reacts by:
//! 1. Immediately stopping `listener.accept()`. No new connections are made.
//! 2. Letting every in-flight connection task run, up to the shutdown timeout.
//! 3. Aborting whatever is still running and returning from
//!    [`Server::serve`], which lets `main` exit cleanly.
//!
//! Keep the shutdown timeout below `terminationGracePeriodSeconds`.

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::net::{TcpListener, ToSocketAddrs};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::error::Error;
use crate::request::Request;
use crate::response::{ResponseBody, Response, is_client_disconnect};
use crate::router::{RouteTable, Router};

/// The HTTP server.
///
/// ```rust,no_run
/// use plumb::{Router, Server};
///
/// # async fn run() -> Result<(), plumb::Error> {
/// let server = Server::bind("0.0.0.0:8080").await?;
/// server.serve(Router::new()).await
/// # }
/// ```
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
    body_read_timeout: Duration,
    shutdown_timeout: Duration,
}

impl Server {
    /// Binds the listening socket right away, so a port conflict surfaces
    /// here and [`local_addr`](Server::local_addr) is known before serving.
    pub async fn bind(addr: impl ToSocketAddrs) -> Result<Self, Error> {
        let listener = TcpListener::bind(addr).await?;
        Self::from_listener(listener)
    }

    pub fn from_listener(listener: TcpListener) -> Result<Self, Error> {
        let defaults = ServerConfig::default();
        Ok(Self {
            local_addr: listener.local_addr()?,
            listener,
            body_read_timeout: defaults.body_read_timeout,
            shutdown_timeout: defaults.shutdown_timeout,
        })
    }

    /// Applies the timeouts of `config`. The listen address is only used by
    /// [`bind`](Server::bind).
    pub fn with_config(mut self, config: &ServerConfig) -> Self {
        self.body_read_timeout = config.body_read_timeout;
        self.shutdown_timeout = config.shutdown_timeout;
        self
    }

    /// Limit for reading a request body. Expiry answers `408`.
    pub fn body_read_timeout(mut self, timeout: Duration) -> Self {
        self.body_read_timeout = timeout;
        self
    }

    /// How long in-flight connections may run after the shutdown signal.
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serves `router` until SIGTERM or Ctrl-C, then drains.
    pub async fn serve(self, router: Router) -> Result<(), Error> {
        self.serve_with_shutdown(router, shutdown_signal()).await
    }

    /// Serves `router` until `signal` resolves, then drains.
    ///
    /// Fails before accepting anything if the routes do not build.
    pub async fn serve_with_shutdown<F>(self, router: Router, signal: F) -> Result<(), Error>
    where
        F: Future<Output = ()>,
    {
        let table = Arc::new(router.build()?);
        let body_read_timeout = self.body_read_timeout;

        info!(addr = %self.local_addr, "plumb listening");

        // JoinSet tracks every spawned connection task so we can wait for
        // them all to finish during graceful shutdown.
        let mut tasks = JoinSet::new();

        tokio::pin!(signal);

        loop {
            tokio::select! {
                // Check shutdown first so a signal immediately stops
                // accepting new connections, even if more are queued.
                biased;

                () = &mut signal => {
                    info!(in_flight = tasks.len(), "shutdown signal received, draining connections");
                    break;
                }

                res = self.listener.accept() => {
                    let (stream, remote_addr) = match res {
                        Ok(v) => v,
                        Err(e) => {
                            error!("accept error: {e}");
                            continue;
                        }
                    };

                    let table = Arc::clone(&table);
                    let io = TokioIo::new(stream);

                    tasks.spawn(async move {
                        // Called once per request on the connection.
                        let svc = service_fn(move |req| {
                            let table = Arc::clone(&table);
                            async move { dispatch(&table, req, remote_addr, body_read_timeout).await }
                        });

                        // `auto::Builder` handles both HTTP/1.1 and HTTP/2.
                        if let Err(e) = ConnBuilder::new(TokioExecutor::new())
                            .serve_connection(io, svc)
                            .await
                        {
                            if is_client_disconnect(&*e) {
                                debug!(peer = %remote_addr, "connection closed by client: {e}");
                            } else {
                                error!(peer = %remote_addr, "connection error: {e}");
                            }
                        }
                    });
                }

                // Reap finished connection tasks so the JoinSet does not grow
                // without bound on long-running servers.
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        }

        let drain = async { while tasks.join_next().await.is_some() {} };
        if tokio::time::timeout(self.shutdown_timeout, drain).await.is_err() {
            warn!(remaining = tasks.len(), "shutdown timeout reached, aborting connections");
            tasks.abort_all();
            while tasks.join_next().await.is_some() {}
        }

        info!("plumb stopped");
        Ok(())
    }
}

// ── Request dispatch ──────────────────────────────────────────────────────────

/// Reads the body, routes the request and produces one response.
///
/// Every failure becomes a response, so hyper never sees an error.
async fn dispatch(
    table: &RouteTable,
    req: hyper::Request<Incoming>,
    remote_addr: SocketAddr,
    body_read_timeout: Duration,
) -> Result<http::Response<ResponseBody>, Infallible> {
    let (parts, body) = req.into_parts();

    let body = match tokio::time::timeout(body_read_timeout, body.collect()).await {
        Ok(Ok(collected)) => collected.to_bytes(),
        Ok(Err(e)) => {
            debug!(peer = %remote_addr, "failed reading request body: {e}");
            return Ok(Response::status(http::StatusCode::BAD_REQUEST).into_http());
        }
        Err(_) => {
            debug!(peer = %remote_addr, timeout = ?body_read_timeout, "request body read timed out");
            return Ok(Response::status(http::StatusCode::REQUEST_TIMEOUT).into_http());
        }
    };

    let req = Request::from_parts(parts, body).with_remote_addr(remote_addr);
    Ok(table.dispatch(req).await.into_http())
}

// ── Shutdown signal ───────────────────────────────────────────────────────────

/// Resolves on the first shutdown signal the process receives.
///
/// On Unix this listens for both **SIGTERM** and **SIGINT** (Ctrl-C).
/// On Windows only Ctrl-C is available. A handler that cannot be installed
/// is logged and never fires.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to install Ctrl-C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c   => {}
        () = sigterm  => {}
    }
}
