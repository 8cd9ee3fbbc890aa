//! Route requirements and their evaluation.
//!
//! Routes declare one or more [`Requirement`]s. Weaker declarations are
//! subsumed by stronger ones (anything implies `Authenticated`; module,
//! permission and role checks imply `PrincipalInTenant`), and what remains
//! is checked strongest first. Evaluation is pure: no IO, no panics.

use serde::Serialize;

use crate::permissions::Module;
use crate::principal::Principal;
use crate::resolve::EffectivePermissions;
use crate::roles::RoleTag;

/// One declaration a route can make about its caller.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Requirement {
    /// Any decoded, non-expired token.
    Authenticated,
    /// The superadmin claim must be true.
    Superadmin,
    /// An active membership in some tenant.
    PrincipalInTenant,
    ModuleAccess(Module),
    Permission(Module, &'static str),
    /// Membership role (temporary assignments count).
    Role(RoleTag),
    PortalClient,
}

impl Requirement {
    fn strength(&self) -> u8 {
        match self {
            Requirement::Authenticated => 0,
            Requirement::PrincipalInTenant => 1,
            Requirement::ModuleAccess(_) => 2,
            Requirement::Permission(..) => 3,
            Requirement::Role(_) => 4,
            Requirement::Superadmin | Requirement::PortalClient => 5,
        }
    }

    /// Whether the requirement needs a resolved tenant context.
    pub fn is_tenant_scoped(&self) -> bool {
        matches!(
            self,
            Requirement::PrincipalInTenant
                | Requirement::ModuleAccess(_)
                | Requirement::Permission(..)
                | Requirement::Role(_)
        )
    }

    fn subsumes(&self, weaker: &Requirement) -> bool {
        match weaker {
            Requirement::Authenticated => !matches!(self, Requirement::Authenticated),
            Requirement::PrincipalInTenant => {
                self.is_tenant_scoped() && !matches!(self, Requirement::PrincipalInTenant)
            }
            _ => false,
        }
    }
}

impl core::fmt::Display for Requirement {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Requirement::Authenticated => f.write_str("authenticated"),
            Requirement::Superadmin => f.write_str("superadmin"),
            Requirement::PrincipalInTenant => f.write_str("principal_in_tenant"),
            Requirement::ModuleAccess(m) => write!(f, "module_access({m})"),
            Requirement::Permission(m, a) => write!(f, "permission({m}.{a})"),
            Requirement::Role(r) => write!(f, "role({r})"),
            Requirement::PortalClient => f.write_str("portal_client"),
        }
    }
}

/// The declarations of one route.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteRequirements {
    requirements: Vec<Requirement>,
    superadmin_enabled: bool,
}

impl RouteRequirements {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn authenticated() -> Self {
        Self::new().require(Requirement::Authenticated)
    }

    pub fn superadmin() -> Self {
        Self::new().require(Requirement::Superadmin)
    }

    pub fn in_tenant() -> Self {
        Self::new().require(Requirement::PrincipalInTenant)
    }

    pub fn module(module: Module) -> Self {
        Self::new().require(Requirement::ModuleAccess(module))
    }

    pub fn permission(module: Module, action: &'static str) -> Self {
        Self::new().require(Requirement::Permission(module, action))
    }

    pub fn role(role: RoleTag) -> Self {
        Self::new().require(Requirement::Role(role))
    }

    pub fn portal_client() -> Self {
        Self::new().require(Requirement::PortalClient)
    }

    pub fn require(mut self, requirement: Requirement) -> Self {
        if !self.requirements.contains(&requirement) {
            self.requirements.push(requirement);
        }
        self
    }

    /// Let superadmins through tenant-scoped requirements on this route.
    pub fn allow_superadmin(mut self) -> Self {
        self.superadmin_enabled = true;
        self
    }

    pub fn superadmin_enabled(&self) -> bool {
        self.superadmin_enabled
    }

    /// Whether evaluating this route needs the permission resolver.
    pub fn needs_tenant(&self) -> bool {
        self.requirements.iter().any(Requirement::is_tenant_scoped)
    }

    /// Declarations left after subsumption, strongest first.
    pub fn effective(&self) -> Vec<&Requirement> {
        let mut kept: Vec<&Requirement> = self
            .requirements
            .iter()
            .filter(|weak| !self.requirements.iter().any(|strong| strong.subsumes(weak)))
            .collect();
        kept.sort_by(|a, b| b.strength().cmp(&a.strength()));
        if kept.is_empty() {
            kept.push(&Requirement::Authenticated);
        }
        kept
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialKind {
    NotSuperadmin,
    NoTenant,
    ModuleNotAllowed,
    MissingPermission,
    RoleMismatch,
    NotPortalClient,
    WrongPrincipalKind,
}

/// Why a valid principal failed a route requirement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Denial {
    pub kind: DenialKind,
    pub requirement: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module: Option<Module>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
}

impl Denial {
    fn new(kind: DenialKind, requirement: &Requirement) -> Self {
        let (module, action) = match requirement {
            Requirement::ModuleAccess(m) => (Some(*m), None),
            Requirement::Permission(m, a) => (Some(*m), Some((*a).to_string())),
            _ => (None, None),
        };
        Self {
            kind,
            requirement: requirement.to_string(),
            module,
            action,
        }
    }
}

impl core::fmt::Display for Denial {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:?} for {}", self.kind, self.requirement)
    }
}

/// Evaluate a route's declarations for a principal.
///
/// `permissions` is the snapshot resolved for the principal's tenant; it is
/// `None` for superadmins, portal clients and tenant-less users.
pub fn authorize(
    principal: &Principal,
    permissions: Option<&EffectivePermissions>,
    route: &RouteRequirements,
) -> Result<(), Denial> {
    for requirement in route.effective() {
        check(principal, permissions, route.superadmin_enabled, requirement)?;
    }
    Ok(())
}

fn check(
    principal: &Principal,
    permissions: Option<&EffectivePermissions>,
    superadmin_enabled: bool,
    requirement: &Requirement,
) -> Result<(), Denial> {
    let deny = |kind| Err(Denial::new(kind, requirement));

    match requirement {
        Requirement::Authenticated => Ok(()),
        Requirement::Superadmin => {
            if principal.is_superadmin() {
                Ok(())
            } else {
                deny(DenialKind::NotSuperadmin)
            }
        }
        Requirement::PortalClient => match principal {
            Principal::PortalClient(_) => Ok(()),
            _ => deny(DenialKind::NotPortalClient),
        },
        tenant_scoped => {
            let perms = match principal {
                Principal::Superadmin(_) if superadmin_enabled => return Ok(()),
                Principal::Superadmin(_) | Principal::PortalClient(_) => {
                    return deny(DenialKind::WrongPrincipalKind);
                }
                Principal::TenantMember(_) => match permissions {
                    Some(perms) if principal.tenant_id() == Some(perms.tenant_id) => perms,
                    _ => return deny(DenialKind::NoTenant),
                },
            };

            match tenant_scoped {
                Requirement::ModuleAccess(m) if !perms.can_access(*m) => {
                    deny(DenialKind::ModuleNotAllowed)
                }
                Requirement::Permission(m, a) if !perms.has(*m, a) => {
                    deny(DenialKind::MissingPermission)
                }
                Requirement::Role(r) if perms.role != *r => deny(DenialKind::RoleMismatch),
                _ => Ok(()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use chrono::Utc;
    use juris_core::{PortalClientId, SuperadminId, TenantId};
    use serde_json::Value;

    use crate::principal::{PortalClient, Superadmin, Tenancy, TenantMember};
    use crate::resolve::resolve;
    use crate::tenant::{Membership, Tenant};
    use crate::user::User;

    fn member(role: RoleTag) -> (Principal, EffectivePermissions) {
        let now = Utc::now();
        let tenant = Tenant {
            id: TenantId::new(),
            name: "Demo".into(),
            slug: "demo".into(),
            email: "office@demo".into(),
            plan: "basic".into(),
            max_users: 5,
            max_processes: 100,
            active: true,
            suspended: false,
            suspension_reason: None,
            settings: Value::Null,
            branding: Value::Null,
            created_at: now,
        };
        let user = User::new("Ana", "ana@demo", String::new(), now);
        let membership = Membership::new(tenant.id, user.id, role, now);
        let perms = resolve(&membership, &[], &[], now);
        let principal = Principal::TenantMember(TenantMember {
            user,
            tenancy: Some(Tenancy { tenant, membership }),
        });
        (principal, perms)
    }

    fn superadmin() -> Principal {
        Principal::Superadmin(Superadmin {
            id: SuperadminId::new(),
            name: "Root".into(),
            email: "root@platform".into(),
            password_hash: String::new(),
            permissions: BTreeMap::new(),
            active: true,
            last_login_at: None,
            created_at: Utc::now(),
        })
    }

    fn portal() -> Principal {
        Principal::PortalClient(PortalClient {
            id: PortalClientId::new(),
            tenant_id: TenantId::new(),
            name: "Cliente".into(),
            email: None,
            phone: None,
            active: true,
        })
    }

    #[test]
    fn receptionist_is_denied_processes_read() {
        let (principal, perms) = member(RoleTag::Receptionist);
        let denial = authorize(&principal, Some(&perms), &RouteRequirements::permission(Module::Processes, "read"))
            .unwrap_err();
        assert_eq!(denial.kind, DenialKind::MissingPermission);
        assert_eq!(denial.module, Some(Module::Processes));
        assert_eq!(denial.action.as_deref(), Some("read"));
    }

    #[test]
    fn module_and_role_checks() {
        let (principal, perms) = member(RoleTag::Lawyer);
        assert!(authorize(&principal, Some(&perms), &RouteRequirements::module(Module::Processes)).is_ok());
        assert_eq!(
            authorize(&principal, Some(&perms), &RouteRequirements::module(Module::Users)).unwrap_err().kind,
            DenialKind::ModuleNotAllowed
        );
        assert_eq!(
            authorize(&principal, Some(&perms), &RouteRequirements::role(RoleTag::Admin)).unwrap_err().kind,
            DenialKind::RoleMismatch
        );
    }

    #[test]
    fn superadmin_needs_explicit_enablement_on_tenant_routes() {
        let admin = superadmin();
        let route = RouteRequirements::permission(Module::Clients, "read");
        assert_eq!(
            authorize(&admin, None, &route).unwrap_err().kind,
            DenialKind::WrongPrincipalKind
        );
        assert!(authorize(&admin, None, &route.allow_superadmin()).is_ok());
        assert!(authorize(&admin, None, &RouteRequirements::superadmin()).is_ok());
    }

    #[test]
    fn tenantless_user_fails_tenant_routes_but_passes_authenticated() {
        let (principal, _) = member(RoleTag::Admin);
        assert_eq!(
            authorize(&principal, None, &RouteRequirements::in_tenant()).unwrap_err().kind,
            DenialKind::NoTenant
        );
        assert!(authorize(&principal, None, &RouteRequirements::authenticated()).is_ok());
    }

    #[test]
    fn portal_routes_accept_only_portal_clients() {
        let route = RouteRequirements::portal_client();
        assert!(authorize(&portal(), None, &route).is_ok());
        assert_eq!(authorize(&superadmin(), None, &route).unwrap_err().kind, DenialKind::NotPortalClient);
        let (principal, perms) = member(RoleTag::Admin);
        assert!(authorize(&principal, Some(&perms), &route).is_err());
        assert_eq!(
            authorize(&portal(), None, &RouteRequirements::in_tenant()).unwrap_err().kind,
            DenialKind::WrongPrincipalKind
        );
    }

    #[test]
    fn stronger_declarations_subsume_weaker_ones() {
        let route = RouteRequirements::authenticated()
            .require(Requirement::PrincipalInTenant)
            .require(Requirement::Permission(Module::Clients, "read"))
            .require(Requirement::Role(RoleTag::Admin));
        assert_eq!(
            route.effective(),
            vec![&Requirement::Role(RoleTag::Admin), &Requirement::Permission(Module::Clients, "read")]
        );
        assert_eq!(RouteRequirements::new().effective(), vec![&Requirement::Authenticated]);
    }
}
