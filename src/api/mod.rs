//! HTTP API Module
//!
//! Provides a status API for operators.

mod http;

pub use http::{HealthResponse, HttpServer};
