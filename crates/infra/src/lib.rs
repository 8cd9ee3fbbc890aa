//! Infrastructure layer: storage backends and the coordinators built on them.
//!
//! - `store`: storage contracts with in-memory and Postgres backends
//! - `login`: credential checks and tenant selection
//! - `resolver`: loads the permission layers for a membership
//! - `guard`: tenant-scoped record access
//! - `reaper`: background expiry of temporary grants
//! - `grants`, `admin`: administrative operations

pub mod admin;
pub mod error;
pub mod grants;
pub mod guard;
pub mod login;
pub mod reaper;
pub mod resolver;
pub mod store;

#[cfg(test)]
mod fixtures;

pub use admin::{NewTenant, TenantAdmin, UserAdmin};
pub use error::ServiceError;
pub use grants::{ActiveGrants, GrantService};
pub use guard::{GuardError, TenantGuard};
pub use login::LoginCoordinator;
pub use reaper::{GrantReaper, ReaperHandle, ReaperStats};
pub use resolver::PermissionResolver;
pub use store::{
    EntityKind, InMemoryStore, Lookup, PgStore, Record, RecordFilter, Scope, StoreError, Stores,
};
