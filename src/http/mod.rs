//! HTTP adapter for the visitor throttle.

mod middleware;
mod server;

pub use middleware::throttle_requests;
pub use server::HttpServer;
