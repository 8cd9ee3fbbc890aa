//! Route tables. Each module lists its paths with the declarations the gate
//! evaluates for them.

use axum::Router;

pub mod admin;
pub mod auth;
pub mod clients;
pub mod common;
pub mod portal;
pub mod processes;
pub mod superadmin;
pub mod system;

/// Routes reachable without a token.
pub fn public() -> Router {
    auth::public_router()
}

/// Routes behind the authentication layer.
pub fn protected() -> Router {
    Router::new()
        .merge(auth::router())
        .merge(clients::router())
        .merge(processes::router())
        .merge(portal::router())
        .nest("/admin", admin::router())
        .nest("/superadmin", superadmin::router())
}
