//! JSON todo service: health check, query extraction, JSON body extraction.
//!
//! Run with:
//!   LOG_LEVEL=debug cargo run --example json_server
//!
//! Try:
//!   curl http://localhost:8080/healthz
//!   curl http://localhost:8080/api/v1/todos?user=john
//!   curl http://localhost:8080/api/v1/todos           # 400, user is required
//!   curl -X PUT -d '{"id": "abc"}' http://localhost:8080/api/v1/todos

use std::sync::Arc;

use plumb::config::Config;
use plumb::extract::{Field, Schema, extract_json_request, extract_request};
use plumb::middleware::{Cors, LogRequest, TraceIdHeader, Tracing};
use plumb::validate::{RuleValidator, Rules};
use plumb::{Error, Request, Router, Server, health, json_handler};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, info_span};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env()?;
    plumb::logging::init(&config.logging)?;
    config.log_summary();

    let root = info_span!("json_server");
    let todos = Arc::new(Todos::new()?);

    let get = {
        let todos = Arc::clone(&todos);
        move |req| get_todos(Arc::clone(&todos), req)
    };
    let put = {
        let todos = Arc::clone(&todos);
        move |req| put_todo(Arc::clone(&todos), req)
    };

    let api = Router::new()
        .get("/todos", json_handler(get))
        .put("/todos", json_handler(put))
        .with(Cors::new(&config.server.cors_origins)?)
        .with(Tracing::new(root.clone()))
        .with(LogRequest::new(root.clone()))
        .with(TraceIdHeader::new(root));

    let app = Router::new()
        .get("/healthz", json_handler(health::liveness))
        .nest("/api/v1", api);

    let server = Server::bind(config.server.listen_addr)
        .await?
        .with_config(&config.server);

    info!(listen_addr = %server.local_addr(), "serving HTTP");
    info!(" curl http://localhost:{}/api/v1/todos?user=john", server.local_addr().port());

    server.serve(app).await?;
    Ok(())
}

/// Schema and validators, built once and shared by every request.
struct Todos {
    params: Schema,
    params_rules: RuleValidator,
    body_rules: RuleValidator,
}

impl Todos {
    fn new() -> Result<Self, Box<dyn std::error::Error>> {
        Ok(Self {
            params: Schema::builder().field(Field::string("user")).build()?,
            params_rules: RuleValidator::new(Rules::new().field("user", ["required"])?),
            body_rules: RuleValidator::json(Rules::new().field("id", ["required"])?),
        })
    }
}

#[derive(Default, Deserialize, Serialize)]
struct GetTodosParams {
    user: String,
}

#[derive(Default, Deserialize, Serialize)]
struct PutTodoRequest {
    id: String,
}

#[derive(Serialize)]
struct TodosResponse {
    ids: Vec<String>,
}

// GET /api/v1/todos?user=john
async fn get_todos(todos: Arc<Todos>, req: Request) -> Result<TodosResponse, Error> {
    let mut params = GetTodosParams::default();
    extract_request(&req, &mut params, &todos.params, &todos.params_rules)?;

    info!(parent: req.span(), user = %params.user, "getting todos from request");
    Ok(TodosResponse { ids: vec![params.user] })
}

// PUT /api/v1/todos  {"id": "abc"}
async fn put_todo(todos: Arc<Todos>, req: Request) -> Result<TodosResponse, Error> {
    let mut body = PutTodoRequest::default();
    extract_json_request(&req, &mut body, &todos.body_rules)?;

    // The request span carries the trace id of this request.
    debug!(parent: req.span(), "adding new todo in backend");
    Ok(TodosResponse { ids: vec![body.id] })
}
