//! Append-only audit record shape.
//!
//! Records are built here and persisted by an `AuditLog` implementation in
//! `juris-infra`. No operation removes a record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use juris_core::{AuditId, PortalClientId, SuperadminId, TenantId, UserId};

use crate::authorize::Denial;
use crate::error::{AuthError, CredentialFailure};
use crate::grants::{TemporaryPermission, TemporaryRoleAssignment};
use crate::principal::Principal;

/// Action tag of an audit record.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuditAction {
    // Failures (one per error kind).
    InvalidCredentials,
    TokenInvalid,
    TokenExpired,
    PermissionDenied,
    TenantScopeViolation,

    LoginSucceeded,
    PasswordRehashed,

    TemporaryPermissionGranted,
    TemporaryPermissionRevoked,
    TemporaryPermissionExpired,
    TemporaryRoleAssigned,
    TemporaryRoleRevoked,
    TemporaryRoleExpired,

    RecordCreated,
    RecordUpdated,
    RecordDeleted,

    UserDeactivated,
    UserReactivated,
    UserUnlocked,

    TenantCreated,
    TenantSuspended,
    TenantUnsuspended,
    TenantDeactivated,
    TenantReactivated,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::InvalidCredentials => "InvalidCredentials",
            AuditAction::TokenInvalid => "TokenInvalid",
            AuditAction::TokenExpired => "TokenExpired",
            AuditAction::PermissionDenied => "PermissionDenied",
            AuditAction::TenantScopeViolation => "TenantScopeViolation",
            AuditAction::LoginSucceeded => "LoginSucceeded",
            AuditAction::PasswordRehashed => "PasswordRehashed",
            AuditAction::TemporaryPermissionGranted => "TemporaryPermissionGranted",
            AuditAction::TemporaryPermissionRevoked => "TemporaryPermissionRevoked",
            AuditAction::TemporaryPermissionExpired => "TemporaryPermissionExpired",
            AuditAction::TemporaryRoleAssigned => "TemporaryRoleAssigned",
            AuditAction::TemporaryRoleRevoked => "TemporaryRoleRevoked",
            AuditAction::TemporaryRoleExpired => "TemporaryRoleExpired",
            AuditAction::RecordCreated => "RecordCreated",
            AuditAction::RecordUpdated => "RecordUpdated",
            AuditAction::RecordDeleted => "RecordDeleted",
            AuditAction::UserDeactivated => "UserDeactivated",
            AuditAction::UserReactivated => "UserReactivated",
            AuditAction::UserUnlocked => "UserUnlocked",
            AuditAction::TenantCreated => "TenantCreated",
            AuditAction::TenantSuspended => "TenantSuspended",
            AuditAction::TenantUnsuspended => "TenantUnsuspended",
            AuditAction::TenantDeactivated => "TenantDeactivated",
            AuditAction::TenantReactivated => "TenantReactivated",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        use AuditAction::*;
        const ALL: [AuditAction; 24] = [
            InvalidCredentials,
            TokenInvalid,
            TokenExpired,
            PermissionDenied,
            TenantScopeViolation,
            LoginSucceeded,
            PasswordRehashed,
            TemporaryPermissionGranted,
            TemporaryPermissionRevoked,
            TemporaryPermissionExpired,
            TemporaryRoleAssigned,
            TemporaryRoleRevoked,
            TemporaryRoleExpired,
            RecordCreated,
            RecordUpdated,
            RecordDeleted,
            UserDeactivated,
            UserReactivated,
            UserUnlocked,
            TenantCreated,
            TenantSuspended,
            TenantUnsuspended,
            TenantDeactivated,
            TenantReactivated,
        ];
        ALL.into_iter().find(|a| a.as_str() == s)
    }
}

impl core::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Failure,
    Denied,
}

impl AuditOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditOutcome::Success => "success",
            AuditOutcome::Failure => "failure",
            AuditOutcome::Denied => "denied",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(AuditOutcome::Success),
            "failure" => Some(AuditOutcome::Failure),
            "denied" => Some(AuditOutcome::Denied),
            _ => None,
        }
    }
}

/// Who performed the audited action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Actor {
    /// No principal (failed logins, bad tokens). Carries the attempted email, if any.
    Anonymous { email: Option<String> },
    Superadmin { id: SuperadminId },
    User { id: UserId },
    PortalClient { id: PortalClientId },
    /// Background work (the grant reaper).
    System,
}

impl Actor {
    pub fn of(principal: &Principal) -> Self {
        match principal {
            Principal::Superadmin(s) => Actor::Superadmin { id: s.id },
            Principal::TenantMember(m) => Actor::User { id: m.user.id },
            Principal::PortalClient(c) => Actor::PortalClient { id: c.id },
        }
    }
}

/// Request metadata copied onto records.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestMeta {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: AuditId,
    pub occurred_at: DateTime<Utc>,
    pub actor: Actor,
    /// `None` for platform-level actions.
    pub tenant_id: Option<TenantId>,
    pub action: AuditAction,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub outcome: AuditOutcome,
    /// Specific sub-cause of a failure (`tenant_suspended`, `bad_password`, ...).
    pub cause: Option<String>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
    pub details: Value,
}

impl AuditRecord {
    pub fn new(actor: Actor, action: AuditAction, outcome: AuditOutcome, now: DateTime<Utc>) -> Self {
        Self {
            id: AuditId::new(),
            occurred_at: now,
            actor,
            tenant_id: None,
            action,
            resource_type: None,
            resource_id: None,
            outcome,
            cause: None,
            ip: None,
            user_agent: None,
            old_value: None,
            new_value: None,
            details: Value::Null,
        }
    }

    pub fn tenant(mut self, tenant_id: Option<TenantId>) -> Self {
        self.tenant_id = tenant_id;
        self
    }

    pub fn resource(mut self, resource_type: impl Into<String>, resource_id: Option<String>) -> Self {
        self.resource_type = Some(resource_type.into());
        self.resource_id = resource_id;
        self
    }

    pub fn cause(mut self, cause: impl Into<String>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    pub fn meta(mut self, meta: &RequestMeta) -> Self {
        self.ip = meta.ip.clone();
        self.user_agent = meta.user_agent.clone();
        self
    }

    pub fn diff(mut self, old_value: Option<Value>, new_value: Option<Value>) -> Self {
        self.old_value = old_value;
        self.new_value = new_value;
        self
    }

    pub fn details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    /// A failed credential check.
    pub fn credential_failure(
        email: &str,
        failure: CredentialFailure,
        tenant_id: Option<TenantId>,
        now: DateTime<Utc>,
    ) -> Self {
        Self::new(
            Actor::Anonymous {
                email: Some(email.to_string()),
            },
            AuditAction::InvalidCredentials,
            AuditOutcome::Failure,
            now,
        )
        .tenant(tenant_id)
        .cause(failure.as_str())
    }

    /// A gate rejection of a token (invalid or expired).
    pub fn token_rejected(err: &AuthError, now: DateTime<Utc>) -> Self {
        let (action, cause) = match err {
            AuthError::TokenExpired => (AuditAction::TokenExpired, "expired".to_string()),
            AuthError::InvalidCredentials(f) => (AuditAction::InvalidCredentials, f.as_str().to_string()),
            other => (AuditAction::TokenInvalid, other.to_string()),
        };
        Self::new(Actor::Anonymous { email: None }, action, AuditOutcome::Failure, now).cause(cause)
    }

    pub fn permission_denied(principal: &Principal, denial: &Denial, now: DateTime<Utc>) -> Self {
        let mut record = Self::new(Actor::of(principal), AuditAction::PermissionDenied, AuditOutcome::Denied, now)
            .tenant(principal.tenant_id())
            .cause(format!("{:?}", denial.kind))
            .details(json!({
                "requirement": denial.requirement,
                "module": denial.module.map(|m| m.as_str()),
                "action": denial.action,
            }));
        if let Some(module) = denial.module {
            record.resource_type = Some(module.as_str().to_string());
        }
        record
    }

    pub fn permission_expired(grant: &TemporaryPermission, now: DateTime<Utc>) -> Self {
        Self::new(Actor::System, AuditAction::TemporaryPermissionExpired, AuditOutcome::Success, now)
            .tenant(Some(grant.tenant_id))
            .resource("temporary_permission", Some(grant.id.to_string()))
            .diff(Some(json!({ "active": true })), Some(json!({ "active": false, "auto_expired": true })))
            .details(json!({
                "user_id": grant.user_id,
                "expires_at": grant.expires_at,
            }))
    }

    pub fn role_expired(assignment: &TemporaryRoleAssignment, now: DateTime<Utc>) -> Self {
        Self::new(Actor::System, AuditAction::TemporaryRoleExpired, AuditOutcome::Success, now)
            .tenant(Some(assignment.tenant_id))
            .resource("temporary_role", Some(assignment.id.to_string()))
            .diff(Some(json!({ "active": true })), Some(json!({ "active": false, "auto_expired": true })))
            .details(json!({
                "user_id": assignment.user_id,
                "role": assignment.role,
                "original_role": assignment.original_role,
                "expires_at": assignment.expires_at,
            }))
    }
}

/// Filter for reading the log back.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditQuery {
    pub tenant_id: Option<TenantId>,
    pub action: Option<AuditAction>,
    pub limit: Option<usize>,
}

impl AuditQuery {
    pub fn matches(&self, record: &AuditRecord) -> bool {
        self.tenant_id.is_none_or(|t| record.tenant_id == Some(t))
            && self.action.is_none_or(|a| record.action == a)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_tags_parse_back() {
        for tag in ["InvalidCredentials", "TemporaryPermissionExpired", "TenantReactivated"] {
            assert_eq!(AuditAction::parse(tag).map(|a| a.as_str()), Some(tag));
        }
        assert_eq!(AuditAction::parse("Deleted"), None);
    }

    #[test]
    fn credential_failure_carries_cause() {
        let record = AuditRecord::credential_failure("joao@demo", CredentialFailure::TenantSuspended, None, Utc::now());
        assert_eq!(record.action, AuditAction::InvalidCredentials);
        assert_eq!(record.cause.as_deref(), Some("tenant_suspended"));
        assert_eq!(record.outcome, AuditOutcome::Failure);
    }
}
