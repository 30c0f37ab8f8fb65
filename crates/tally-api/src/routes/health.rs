//! Health check endpoint.

use axum::http::StatusCode;
use axum::response::Response;

use crate::error::ok_response;

/// Public health check, used by load balancer probes.
pub async fn healthcheck() -> Response {
    ok_response(StatusCode::OK, "This is the Event API app.")
}
