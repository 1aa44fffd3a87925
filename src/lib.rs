//! Tollgate - Atomic Fixed-Window Rate Limiting
//!
//! This crate implements a fixed-window rate limiter whose
//! increment-and-arm step runs as one atomic unit inside a key-value store,
//! either Redis (via a Lua script) or an in-process store. A small HTTP
//! service shows how a caller consults the limiter and exports metrics.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
pub mod store;
