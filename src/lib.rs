//! Visitor Throttle - per-client request throttling
//!
//! This crate implements a token bucket throttle keyed by client identity.
//! Buckets are created lazily on a client's first request and reclaimed by a
//! background sweep once the client has been idle past a staleness threshold.
//! An axum middleware adapts the throttle to HTTP, answering 429 on denial.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
