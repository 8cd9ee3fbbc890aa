//! HTTP application wiring (Axum router + service wiring).
//!
//! - `services.rs`: coordinators built from config and a storage backend
//! - `routes/`: HTTP routes + handlers (one file per area)
//! - `dto.rs`: request/response DTOs and JSON mapping helpers
//! - `errors.rs`: the wire error taxonomy

use std::sync::Arc;

use axum::{Extension, Router, routing::get};
use tower::ServiceBuilder;

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

pub use services::AppServices;

/// Build the full HTTP router (public entrypoint used by `main.rs`).
pub fn build_app(services: Arc<AppServices>) -> Router {
    // Protected routes: token, live principal and permission snapshot.
    let protected = routes::protected().layer(axum::middleware::from_fn_with_state(
        services.clone(),
        middleware::authenticate,
    ));

    let timeout = services.config.request_timeout;
    Router::new()
        .route("/health", get(routes::system::health))
        .merge(routes::public())
        .merge(protected)
        .layer(
            ServiceBuilder::new()
                .layer(Extension(services))
                .layer(axum::middleware::from_fn_with_state(timeout, middleware::deadline)),
        )
}
