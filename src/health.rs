//! Built-in liveness probe.
//!
//! | Probe | Path | Question |
//! |---|---|---|
//! | **Liveness** | `/healthz` | Is the process alive? Failure → restart. |
//!
//! Register it on your router through the JSON adapter:
//!
//! ```rust,no_run
//! use plumb::{Router, health, json_handler};
//!
//! let app = Router::new().get("/healthz", json_handler(health::liveness));
//! ```

use serde::Serialize;

use crate::{Error, Request};

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct Health {
    pub healthy: bool,
}

/// Always `{"healthy":true}`. If the process can answer HTTP at all it is
/// alive, so this has no dependencies.
pub async fn liveness(_req: Request) -> Result<Health, Error> {
    Ok(Health { healthy: true })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{boxed, json_handler};
    use bytes::Bytes;

    #[tokio::test]
    async fn reports_healthy() {
        let handler = boxed(json_handler(liveness));
        let res = handler.call(Request::new(http::Request::new(Bytes::new()))).await;

        assert_eq!(res.status_code(), http::StatusCode::OK);
        assert_eq!(&res.into_body_bytes().await.unwrap()[..], br#"{"healthy":true}"#);
    }
}
