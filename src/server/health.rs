//! Liveness endpoint for load balancers and container health checks.

use axum::http::StatusCode;

/// `GET /health`
///
/// Answers 200 with a plain `OK` body while the process is serving. Storage and
/// GitHub are not consulted.
///
/// ```ignore
/// GET /health HTTP/1.1
///
/// HTTP/1.1 200 OK
/// content-type: text/plain; charset=utf-8
///
/// OK
/// ```
pub async fn health_handler() -> (StatusCode, &'static str) {
    (StatusCode::OK, "OK")
}
