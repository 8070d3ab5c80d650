//! Unified error type.
//!
//! Processors return [`Error`] and the handler adapters turn it into a JSON
//! error response through [`Response::error`](crate::Response::error). The
//! same type also carries infrastructure failures: binding a port, building
//! the route table, talking to an upstream.

use http::StatusCode;
use serde_json::json;

use crate::validate::FieldErrors;

/// The error type returned by plumb's fallible operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Decoding or validating the request target failed. Carries every
    /// failing field, not only the first one.
    #[error("request validation failed")]
    RequestValidation(FieldErrors),

    /// The request has no body but one was expected.
    #[error("request body is missing")]
    MissingBody,

    /// The request body is not valid JSON for the target type.
    #[error("invalid JSON body: {0}")]
    InvalidJson(#[source] serde_json::Error),

    /// An application error with an explicit status and code.
    #[error("{message}")]
    Http {
        status: StatusCode,
        code: String,
        message: String,
    },

    /// Reading from an upstream service failed.
    #[error("upstream: {0}")]
    Upstream(String),

    /// Anything the client cannot fix.
    #[error("internal: {0}")]
    Internal(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// A route could not be inserted into the routing table.
    #[error("invalid route `{path}`: {reason}")]
    Route { path: String, reason: String },

    /// The client transport failed before a response was received.
    #[error("transport: {0}")]
    Transport(#[from] hyper_util::client::legacy::Error),
}

impl Error {
    /// An application error answered with `status`.
    ///
    /// ```rust
    /// use plumb::Error;
    /// use http::StatusCode;
    ///
    /// let err = Error::http(StatusCode::NOT_FOUND, "todo_not_found", "todo does not exist");
    /// assert_eq!(err.status(), StatusCode::NOT_FOUND);
    /// ```
    pub fn http(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Http {
            status,
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// HTTP status used when this error is written as a response.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::RequestValidation(_) | Self::MissingBody | Self::InvalidJson(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::Http { status, .. } => *status,
            Self::Upstream(_) | Self::Transport(_) => StatusCode::BAD_GATEWAY,
            Self::Internal(_) | Self::Io(_) | Self::Route { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Stable machine-readable code written in the error body.
    pub fn code(&self) -> &str {
        match self {
            Self::RequestValidation(_) => "request_validation_error",
            Self::MissingBody => "missing_body_error",
            Self::InvalidJson(_) => "invalid_json_error",
            Self::Http { code, .. } => code,
            Self::Upstream(_) | Self::Transport(_) => "upstream_error",
            Self::Internal(_) | Self::Io(_) | Self::Route { .. } => "unexpected_error",
        }
    }

    /// Message shown to the client. Internal details stay in the logs.
    pub fn public_message(&self) -> String {
        match self {
            Self::RequestValidation(_) => "The request is invalid".to_owned(),
            Self::MissingBody => "The request body is required".to_owned(),
            Self::InvalidJson(_) => "The request body is not valid JSON".to_owned(),
            Self::Http { message, .. } => message.clone(),
            Self::Upstream(_) | Self::Transport(_) => "Unable to reach upstream service".to_owned(),
            Self::Internal(_) | Self::Io(_) | Self::Route { .. } => {
                "Unable to fulfill request".to_owned()
            }
        }
    }

    /// Structured details written next to the message, if any.
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Self::RequestValidation(errors) => Some(json!({ "errors": errors })),
            Self::InvalidJson(err) => Some(json!({ "reason": err.to_string() })),
            _ => None,
        }
    }

    /// Field errors of a validation failure.
    pub fn field_errors(&self) -> Option<&FieldErrors> {
        match self {
            Self::RequestValidation(errors) => Some(errors),
            _ => None,
        }
    }
}
