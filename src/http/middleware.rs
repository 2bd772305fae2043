//! Throttling middleware.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::warn;

use crate::ratelimit::{ClientKey, VisitorThrottle};

/// Admit or reject a request based on the peer's IP address.
///
/// The port is dropped so that a client opening new connections keeps
/// its bucket. Rejected requests get a 429 with a JSON error body.
pub async fn throttle_requests(
    State(throttle): State<Arc<VisitorThrottle>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Response {
    let key = ClientKey::from(peer.ip());

    if !throttle.admit(&key) {
        warn!(
            client = %key,
            method = %request.method(),
            path = %request.uri().path(),
            "Rejecting throttled request"
        );
        return too_many_requests();
    }

    next.run(request).await
}

fn too_many_requests() -> Response {
    (
        StatusCode::TOO_MANY_REQUESTS,
        Json(json!({ "error": "Rate limit exceeded" })),
    )
        .into_response()
}
