use core::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::permissions::{CapabilityFlags, Module, ModuleAccess, PermissionSet};

/// Role a user holds within a tenant.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleTag {
    Admin,
    Lawyer,
    Assistant,
    Secretary,
    Receptionist,
    User,
}

impl RoleTag {
    pub const ALL: [RoleTag; 6] = [
        RoleTag::Admin,
        RoleTag::Lawyer,
        RoleTag::Assistant,
        RoleTag::Secretary,
        RoleTag::Receptionist,
        RoleTag::User,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RoleTag::Admin => "admin",
            RoleTag::Lawyer => "lawyer",
            RoleTag::Assistant => "assistant",
            RoleTag::Secretary => "secretary",
            RoleTag::Receptionist => "receptionist",
            RoleTag::User => "user",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            RoleTag::Admin => "Administrator",
            RoleTag::Lawyer => "Lawyer",
            RoleTag::Assistant => "Legal assistant",
            RoleTag::Secretary => "Secretary",
            RoleTag::Receptionist => "Receptionist",
            RoleTag::User => "User",
        }
    }

    /// The immutable role descriptor seeding a membership's permissions.
    pub fn definition(&self) -> RoleDefinition {
        RoleDefinition {
            tag: *self,
            display_name: self.display_name(),
            permissions: default_permissions(*self),
        }
    }
}

impl core::fmt::Display for RoleTag {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown role '{0}'")]
pub struct UnknownRole(pub String);

impl FromStr for RoleTag {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RoleTag::ALL
            .iter()
            .copied()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| UnknownRole(s.to_string()))
    }
}

/// Role reference: `{name, display name, default permission set, default module list}`.
///
/// The module list lives inside `permissions.modules()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoleDefinition {
    pub tag: RoleTag,
    pub display_name: &'static str,
    pub permissions: PermissionSet,
}

fn default_permissions(role: RoleTag) -> PermissionSet {
    use Module::*;

    match role {
        RoleTag::Admin => Module::ALL
            .iter()
            .fold(PermissionSet::empty(), |set, m| set.grant_all_actions(*m))
            .with_flags(CapabilityFlags::all(true))
            .with_modules(ModuleAccess::All),
        RoleTag::Lawyer => PermissionSet::empty()
            .grant(Clients, &["create", "read", "update"])
            .grant(Processes, &["create", "read", "update"])
            .grant(Documents, &["create", "read", "update", "sign"])
            .grant(Financial, &["read"])
            .grant(Notifications, &["create", "read", "update"])
            .grant(Specialties, &["read"])
            .grant(Reports, &["read"])
            .with_flags(CapabilityFlags::all(false))
            .with_modules(ModuleAccess::only([
                Clients,
                Processes,
                Documents,
                Financial,
                Notifications,
                Specialties,
                Reports,
            ])),
        RoleTag::Assistant => PermissionSet::empty()
            .grant(Clients, &["create", "read", "update"])
            .grant(Processes, &["read", "update"])
            .grant(Documents, &["create", "read", "update"])
            .grant(Notifications, &["read"])
            .grant(Specialties, &["read"])
            .with_flags(CapabilityFlags::all(false))
            .with_modules(ModuleAccess::only([
                Clients,
                Processes,
                Documents,
                Notifications,
                Specialties,
            ])),
        RoleTag::Secretary => PermissionSet::empty()
            .grant(Clients, &["create", "read", "update"])
            .grant(Processes, &["read"])
            .grant(Documents, &["create", "read"])
            .grant(Notifications, &["create", "read", "update"])
            .grant(Financial, &["read"])
            .with_flags(CapabilityFlags::all(false))
            .with_modules(ModuleAccess::only([
                Clients,
                Processes,
                Documents,
                Notifications,
                Financial,
            ])),
        RoleTag::Receptionist => PermissionSet::empty()
            .grant(Clients, &["create", "read"])
            .grant(Notifications, &["read"])
            .with_flags(CapabilityFlags::all(false))
            .with_modules(ModuleAccess::only([Clients, Notifications])),
        RoleTag::User => PermissionSet::empty()
            .grant(Clients, &["read"])
            .grant(Processes, &["read"])
            .grant(Documents, &["read"])
            .grant(Notifications, &["read"])
            .with_flags(CapabilityFlags::all(false))
            .with_modules(ModuleAccess::only([Clients, Processes, Documents, Notifications])),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permissions::Capability;

    #[test]
    fn admin_holds_every_known_cell() {
        let admin = RoleTag::Admin.definition().permissions;
        for module in Module::ALL {
            assert!(admin.can_access(module));
            for action in module.actions() {
                assert!(admin.has(module, action), "admin lacks {module}.{action}");
            }
        }
        assert!(admin.capability(Capability::ManageUsers));
    }

    #[test]
    fn receptionist_cannot_read_processes() {
        let receptionist = RoleTag::Receptionist.definition().permissions;
        assert!(!receptionist.has(Module::Processes, "read"));
        assert!(!receptionist.can_access(Module::Processes));
        assert!(receptionist.has(Module::Clients, "read"));
    }

    #[test]
    fn tags_parse_back() {
        for role in RoleTag::ALL {
            assert_eq!(role.as_str().parse::<RoleTag>().unwrap(), role);
        }
        assert!("owner".parse::<RoleTag>().is_err());
    }
}
