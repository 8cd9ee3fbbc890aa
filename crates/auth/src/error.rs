//! Authentication/authorization error taxonomy.
//!
//! | Kind | Wire | Notes |
//! |------|------|-------|
//! | `InvalidCredentials` | 401 | uniform message; the sub-cause only reaches the audit log |
//! | `TokenInvalid` | 401 | decode failure, bad signature, unknown algorithm or key id |
//! | `TokenExpired` | 401 | well-formed but past `exp` |
//! | `PermissionDenied` | 403 | valid principal, requirement not met |
//! | `TenantScopeViolation` | 500 | internal assertion; a cross-tenant access reached the guard |

use thiserror::Error;

use crate::authorize::Denial;

/// Why a credential check failed. Never shown to the caller.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum CredentialFailure {
    UnknownEmail,
    BadPassword,
    UserLocked,
    UserInactive,
    TenantNotFound,
    TenantInactive,
    TenantSuspended,
    MembershipNotFound,
    MembershipInactive,
    SuperadminInactive,
    NotSuperadmin,
    PrincipalNotFound,
}

impl CredentialFailure {
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialFailure::UnknownEmail => "unknown_email",
            CredentialFailure::BadPassword => "bad_password",
            CredentialFailure::UserLocked => "user_locked",
            CredentialFailure::UserInactive => "user_inactive",
            CredentialFailure::TenantNotFound => "tenant_not_found",
            CredentialFailure::TenantInactive => "tenant_inactive",
            CredentialFailure::TenantSuspended => "tenant_suspended",
            CredentialFailure::MembershipNotFound => "membership_not_found",
            CredentialFailure::MembershipInactive => "membership_inactive",
            CredentialFailure::SuperadminInactive => "superadmin_inactive",
            CredentialFailure::NotSuperadmin => "not_superadmin",
            CredentialFailure::PrincipalNotFound => "principal_not_found",
        }
    }
}

impl core::fmt::Display for CredentialFailure {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("invalid credentials ({0})")]
    InvalidCredentials(CredentialFailure),

    #[error("invalid token: {0}")]
    TokenInvalid(String),

    #[error("token expired")]
    TokenExpired,

    #[error("permission denied: {0}")]
    PermissionDenied(Denial),

    #[error("tenant scope violation: {0}")]
    TenantScopeViolation(String),
}

impl AuthError {
    /// Stable tag used as the audit action for failures.
    pub fn kind(&self) -> &'static str {
        match self {
            AuthError::InvalidCredentials(_) => "InvalidCredentials",
            AuthError::TokenInvalid(_) => "TokenInvalid",
            AuthError::TokenExpired => "TokenExpired",
            AuthError::PermissionDenied(_) => "PermissionDenied",
            AuthError::TenantScopeViolation(_) => "TenantScopeViolation",
        }
    }

    pub fn is_authentication_failure(&self) -> bool {
        matches!(
            self,
            AuthError::InvalidCredentials(_) | AuthError::TokenInvalid(_) | AuthError::TokenExpired
        )
    }
}

impl From<crate::token::TokenError> for AuthError {
    fn from(err: crate::token::TokenError) -> Self {
        match err {
            crate::token::TokenError::Expired => AuthError::TokenExpired,
            other => AuthError::TokenInvalid(other.to_string()),
        }
    }
}
