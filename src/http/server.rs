//! HTTP server implementation.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tracing::{error, info};

use super::middleware::throttle_requests;
use crate::error::{Result, ThrottleError};
use crate::ratelimit::VisitorThrottle;

/// HTTP server fronted by the visitor throttle.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    /// The throttle shared by every request
    throttle: Arc<VisitorThrottle>,
    /// Application routes placed behind the throttle
    routes: Router,
}

impl HttpServer {
    /// Create a new server with no application routes.
    pub fn new(addr: SocketAddr, throttle: Arc<VisitorThrottle>) -> Self {
        Self {
            addr,
            throttle,
            routes: Router::new(),
        }
    }

    /// Mount application routes behind the throttle.
    pub fn with_routes(mut self, routes: Router) -> Self {
        self.routes = self.routes.merge(routes);
        self
    }

    /// Build the router.
    ///
    /// Everything except `/health` is throttled, unknown paths included,
    /// so probes never compete with clients for tokens.
    pub fn router(&self) -> Router {
        let health = Router::new()
            .route("/health", get(health_handler))
            .with_state(Arc::clone(&self.throttle));

        self.routes
            .clone()
            .fallback(not_found)
            .layer(axum::middleware::from_fn_with_state(
                Arc::clone(&self.throttle),
                throttle_requests,
            ))
            .merge(health)
    }

    /// Bind the configured address and serve until `signal` resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr).await.map_err(|e| {
            error!(addr = %self.addr, error = %e, "Failed to bind HTTP listener");
            ThrottleError::Io(e)
        })?;

        self.serve_on(listener, signal).await
    }

    /// Serve on an already bound listener until `signal` resolves.
    pub async fn serve_on<F>(self, listener: TcpListener, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let app = self
            .router()
            .into_make_service_with_connect_info::<SocketAddr>();

        info!(
            addr = %listener.local_addr()?,
            "Starting HTTP server with graceful shutdown"
        );

        axum::serve(listener, app)
            .with_graceful_shutdown(signal)
            .await
            .map_err(|e| {
                error!(error = %e, "HTTP server failed");
                ThrottleError::Io(e)
            })
    }
}

async fn health_handler(State(throttle): State<Arc<VisitorThrottle>>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "visitors": throttle.visitor_count(),
    }))
}

async fn not_found() -> (StatusCode, Json<Value>) {
    (StatusCode::NOT_FOUND, Json(json!({ "error": "Not found" })))
}
