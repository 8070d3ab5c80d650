//! # plumb
//!
//! The plumbing every JSON service over hyper ends up writing: turn a
//! request into a typed value, validate it, answer with JSON or an error
//! body, and wrap it all in CORS and tracing.
//!
//! ## The pieces
//!
//! - **Extraction**: [`extract::extract_request`] decodes query and path
//!   parameters through an explicit [`Schema`](extract::Schema),
//!   [`extract::extract_json_request`] decodes the body. Both validate.
//! - **Validation**: [`validate::RuleValidator`] reports every failing field.
//! - **Adapters**: [`json_handler`] and [`raw_handler`] turn processors
//!   returning `Result<_, Error>` into route handlers.
//! - **Middleware**: [`Cors`](middleware::Cors), [`Tracing`](middleware::Tracing),
//!   [`LogRequest`](middleware::LogRequest), [`TraceIdHeader`](middleware::TraceIdHeader).
//! - **Serving**: radix-tree [`Router`] with nesting, hyper [`Server`] with
//!   graceful shutdown.
//! - **Utilities**: [`real_ip`], [`forward_response`] and the
//!   [`LoggingTransport`] client.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use plumb::extract::{Field, Schema, extract_request};
//! use plumb::middleware::{Cors, LogRequest, TraceIdHeader, Tracing};
//! use plumb::validate::{RuleValidator, Rules};
//! use plumb::{Error, Request, Router, Server, json_handler};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Default, Deserialize, Serialize)]
//! struct Search {
//!     prefix: String,
//! }
//!
//! async fn search(req: Request) -> Result<Vec<String>, Error> {
//!     let schema = Schema::builder().field(Field::string("prefix")).build()
//!         .map_err(|e| Error::internal(e.to_string()))?;
//!     let validator = RuleValidator::new(Rules::new().field("prefix", ["required"])
//!         .map_err(|e| Error::internal(e.to_string()))?);
//!
//!     let mut query = Search::default();
//!     extract_request(&req, &mut query, &schema, &validator)?;
//!     Ok(vec![format!("{}-1", query.prefix)])
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let root = tracing::info_span!("app");
//!     let api = Router::new()
//!         .get("/search", json_handler(search))
//!         .with(Cors::new("*")?)
//!         .with(Tracing::new(root.clone()))
//!         .with(LogRequest::new(root.clone()))
//!         .with(TraceIdHeader::new(root));
//!
//!     let app = Router::new().nest("/api/v1", api);
//!     Server::bind("0.0.0.0:8080").await?.serve(app).await?;
//!     Ok(())
//! }
//! ```

mod client;
mod context;
mod error;
mod request;
mod response;
mod router;
mod server;
mod trace_context;
mod util;

pub mod config;
pub mod duration;
pub mod extract;
pub mod handler;
pub mod health;
pub mod logging;
pub mod middleware;
pub mod validate;

pub use client::{ClientBody, LoggingTransport};
pub use context::Context;
pub use error::Error;
pub use handler::{Handler, json_handler, raw_handler};
pub use request::Request;
pub use response::{ContentType, IntoResponse, Response, ResponseBody, ResponseBuilder};
pub use router::{RouteTable, Router};
pub use server::Server;
pub use trace_context::TraceContext;
pub use util::{forward_response, real_ip};
