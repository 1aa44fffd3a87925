//! HTTP caller layer: consults the limiter before serving each request and
//! exports Prometheus metrics.

pub mod metrics;
mod server;
mod service;

pub use server::HttpServer;
pub use service::{router, AppState};
