//! HTTP API: configuration, the authorization gate, and the routes over it.

pub mod app;
pub mod clock;
pub mod config;
pub mod context;
pub mod middleware;
