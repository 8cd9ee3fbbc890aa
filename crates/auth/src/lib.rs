//! `juris-auth` — pure authentication/authorization boundary.
//!
//! Entities, permission model, token codec, password verifier and requirement
//! evaluation. This crate is intentionally decoupled from HTTP and storage.

pub mod audit;
pub mod authorize;
pub mod claims;
pub mod error;
pub mod grants;
pub mod password;
pub mod permissions;
pub mod principal;
pub mod resolve;
pub mod roles;
pub mod tenant;
pub mod token;
pub mod user;

pub use audit::{Actor, AuditAction, AuditOutcome, AuditQuery, AuditRecord, RequestMeta};
pub use authorize::{Denial, DenialKind, Requirement, RouteRequirements, authorize};
pub use claims::TokenClaims;
pub use error::{AuthError, CredentialFailure};
pub use grants::{TemporaryPermission, TemporaryRoleAssignment, validate_grant_request};
pub use password::{HashFormat, PasswordError, PasswordVerifier, Verification};
pub use permissions::{Capability, CapabilityFlags, Module, ModuleAccess, PermissionSet};
pub use principal::{PortalClient, Principal, PrincipalKind, Superadmin, Tenancy, TenantMember};
pub use resolve::{EffectivePermissions, resolve};
pub use roles::{RoleDefinition, RoleTag};
pub use tenant::{Membership, Tenant, TenantUnavailable, ensure_primary_admin_remains};
pub use token::{DecodedToken, IssuedToken, Surface, TokenCodec, TokenError};
pub use user::{LockoutPolicy, User};
