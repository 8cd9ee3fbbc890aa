//! Wire error taxonomy.
//!
//! | Variant | Status | Body `detail` |
//! |---------|--------|---------------|
//! | `InvalidCredentials` | 401 | "Incorrect email or password" |
//! | `InactiveAccount` | 401 | "Inactive superadmin account" |
//! | `Unauthenticated` | 401 | "Could not validate credentials" |
//! | `Forbidden` | 403 | the unmet requirement |
//! | `Validation` | 400 | the message |
//! | `NotFound` | 404 | "Not found" |
//! | `Conflict` | 409 | the message |
//! | `Timeout` | 504 | "Request timed out" |
//! | `Internal` | 500 | "Internal server error" (cause is only logged) |

use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::error;

use juris_auth::{AuthError, CredentialFailure};
use juris_infra::{GuardError, ServiceError, StoreError};

pub const INVALID_CREDENTIALS: &str = "Incorrect email or password";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    InvalidCredentials,
    InactiveAccount,
    Unauthenticated,
    Forbidden(String),
    Validation(String),
    NotFound,
    Conflict(String),
    Timeout,
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidCredentials | ApiError::InactiveAccount | ApiError::Unauthenticated => {
                StatusCode::UNAUTHORIZED
            }
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn detail(&self) -> String {
        match self {
            ApiError::InvalidCredentials => INVALID_CREDENTIALS.to_string(),
            ApiError::InactiveAccount => "Inactive superadmin account".to_string(),
            ApiError::Unauthenticated => "Could not validate credentials".to_string(),
            ApiError::Forbidden(msg) => format!("Permission denied: {msg}"),
            ApiError::Validation(msg) | ApiError::Conflict(msg) => msg.clone(),
            ApiError::NotFound => "Not found".to_string(),
            ApiError::Timeout => "Request timed out".to_string(),
            ApiError::Internal(_) => "Internal server error".to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::Internal(cause) = &self {
            error!(cause = %cause, "request failed");
        }
        let status = self.status();
        let body = axum::Json(json!({ "detail": self.detail() }));
        if status == StatusCode::UNAUTHORIZED {
            (status, [(header::WWW_AUTHENTICATE, "Bearer")], body).into_response()
        } else {
            (status, body).into_response()
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::InvalidCredentials(_) => ApiError::InvalidCredentials,
            AuthError::TokenInvalid(_) | AuthError::TokenExpired => ApiError::Unauthenticated,
            AuthError::PermissionDenied(denial) => ApiError::Forbidden(denial.requirement),
            AuthError::TenantScopeViolation(msg) => ApiError::Internal(msg),
        }
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Validation(msg) => ApiError::Validation(msg),
            ServiceError::NotFound => ApiError::NotFound,
            ServiceError::Conflict(msg) => ApiError::Conflict(msg),
            ServiceError::Auth(auth) => auth.into(),
            ServiceError::Password(e) => ApiError::Internal(e.to_string()),
            ServiceError::Store(e) => ApiError::Internal(e.to_string()),
            ServiceError::Internal(msg) => ApiError::Internal(msg),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ServiceError::from(err).into()
    }
}

impl From<GuardError> for ApiError {
    fn from(err: GuardError) -> Self {
        match err {
            GuardError::NotFound => ApiError::NotFound,
            GuardError::Validation(msg) => ApiError::Validation(msg),
            GuardError::ScopeViolation(msg) => ApiError::Internal(format!("tenant scope violation: {msg}")),
            GuardError::Store(e) => ApiError::Internal(e.to_string()),
        }
    }
}

/// Superadmin login may tell an inactive account apart; every other failure stays uniform.
pub fn superadmin_login_error(err: ServiceError) -> ApiError {
    match err {
        ServiceError::Auth(AuthError::InvalidCredentials(CredentialFailure::SuperadminInactive)) => {
            ApiError::InactiveAccount
        }
        other => other.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_credential_failure_is_the_same_401() {
        for failure in [
            CredentialFailure::UnknownEmail,
            CredentialFailure::BadPassword,
            CredentialFailure::UserLocked,
            CredentialFailure::TenantSuspended,
            CredentialFailure::MembershipNotFound,
        ] {
            let err = ApiError::from(AuthError::InvalidCredentials(failure));
            assert_eq!(err, ApiError::InvalidCredentials);
            assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
        }
    }

    #[test]
    fn unauthorized_responses_carry_challenge() {
        let resp = ApiError::Unauthenticated.into_response();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(resp.headers().get(header::WWW_AUTHENTICATE).unwrap(), "Bearer");

        let resp = ApiError::NotFound.into_response();
        assert!(resp.headers().get(header::WWW_AUTHENTICATE).is_none());
    }

    #[test]
    fn scope_violation_is_a_server_error() {
        let err = ApiError::from(GuardError::ScopeViolation("tenant_id mismatch".into()));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn only_superadmin_surface_distinguishes_inactive() {
        let inactive = || ServiceError::Auth(AuthError::InvalidCredentials(CredentialFailure::SuperadminInactive));
        assert_eq!(superadmin_login_error(inactive()), ApiError::InactiveAccount);
        assert_eq!(ApiError::from(inactive()), ApiError::InvalidCredentials);
    }
}
