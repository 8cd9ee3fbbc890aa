//! Permission map model and the layer merge.
//!
//! A permission map is keyed by module; each module maps action tags to
//! booleans. Next to the cells live four scalar capability flags and the
//! `modules` list the principal may traverse (`"*"` meaning every module).
//!
//! Values of this type are immutable snapshots: [`PermissionSet::merge`]
//! returns a new set and never mutates either input.

use core::str::FromStr;
use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::warn;

/// Wildcard entry of the `modules` list.
pub const ALL_MODULES: &str = "*";

// ─────────────────────────────────────────────────────────────────────────────
// Modules
// ─────────────────────────────────────────────────────────────────────────────

/// Top-level domain area.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Module {
    Clients,
    Processes,
    Documents,
    Financial,
    Notifications,
    Specialties,
    Users,
    Settings,
    Reports,
}

impl Module {
    pub const ALL: [Module; 9] = [
        Module::Clients,
        Module::Processes,
        Module::Documents,
        Module::Financial,
        Module::Notifications,
        Module::Specialties,
        Module::Users,
        Module::Settings,
        Module::Reports,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Module::Clients => "clients",
            Module::Processes => "processes",
            Module::Documents => "documents",
            Module::Financial => "financial",
            Module::Notifications => "notifications",
            Module::Specialties => "specialties",
            Module::Users => "users",
            Module::Settings => "settings",
            Module::Reports => "reports",
        }
    }

    /// Action tags known for this module (CRUD plus module-specific tags).
    pub fn actions(&self) -> &'static [&'static str] {
        match self {
            Module::Clients => &["create", "read", "update", "delete", "export"],
            Module::Processes => &["create", "read", "update", "delete", "view_all"],
            Module::Documents => &["create", "read", "update", "delete", "sign"],
            Module::Financial => &["create", "read", "update", "delete", "approve"],
            Module::Notifications => &["create", "read", "update", "delete"],
            Module::Specialties => &["create", "read", "update", "delete"],
            Module::Users => &["create", "read", "update", "delete", "manage"],
            Module::Settings => &["read", "update"],
            Module::Reports => &["read", "export"],
        }
    }
}

impl core::fmt::Display for Module {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown module '{0}'")]
pub struct UnknownModule(pub String);

impl FromStr for Module {
    type Err = UnknownModule;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Module::ALL
            .iter()
            .copied()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| UnknownModule(s.to_string()))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Module access list
// ─────────────────────────────────────────────────────────────────────────────

/// The `modules` list of a permission map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleAccess {
    /// `"*"`: every module, present and future.
    All,
    Only(BTreeSet<Module>),
}

impl Default for ModuleAccess {
    fn default() -> Self {
        ModuleAccess::Only(BTreeSet::new())
    }
}

impl ModuleAccess {
    pub fn only(modules: impl IntoIterator<Item = Module>) -> Self {
        ModuleAccess::Only(modules.into_iter().collect())
    }

    pub fn allows(&self, module: Module) -> bool {
        match self {
            ModuleAccess::All => true,
            ModuleAccess::Only(set) => set.contains(&module),
        }
    }

    /// Union of two lists; `"*"` absorbs everything.
    pub fn union(&self, other: &ModuleAccess) -> ModuleAccess {
        match (self, other) {
            (ModuleAccess::All, _) | (_, ModuleAccess::All) => ModuleAccess::All,
            (ModuleAccess::Only(a), ModuleAccess::Only(b)) => {
                ModuleAccess::Only(a.union(b).copied().collect())
            }
        }
    }

    /// The list with `"*"` expanded to the enumerated module set.
    pub fn expand(&self) -> Vec<Module> {
        match self {
            ModuleAccess::All => Module::ALL.to_vec(),
            ModuleAccess::Only(set) => set.iter().copied().collect(),
        }
    }

    fn to_strings(&self) -> Vec<String> {
        match self {
            ModuleAccess::All => vec![ALL_MODULES.to_string()],
            ModuleAccess::Only(set) => set.iter().map(|m| m.as_str().to_string()).collect(),
        }
    }
}

impl Serialize for ModuleAccess {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_strings().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ModuleAccess {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Vec::<String>::deserialize(deserializer)?;
        if raw.iter().any(|m| m == ALL_MODULES) {
            return Ok(ModuleAccess::All);
        }
        let modules = raw
            .iter()
            .filter_map(|m| match m.parse::<Module>() {
                Ok(module) => Some(module),
                Err(_) => {
                    warn!(module = %m, "ignoring unknown module in module list");
                    None
                }
            })
            .collect();
        Ok(ModuleAccess::Only(modules))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Capability flags
// ─────────────────────────────────────────────────────────────────────────────

/// Scalar capability flag of a permission map.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Capability {
    ManageUsers,
    ManageFinancial,
    ViewAllProcesses,
    ManageSpecialties,
}

impl Capability {
    pub const ALL: [Capability; 4] = [
        Capability::ManageUsers,
        Capability::ManageFinancial,
        Capability::ViewAllProcesses,
        Capability::ManageSpecialties,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            Capability::ManageUsers => "can_manage_users",
            Capability::ManageFinancial => "can_manage_financial",
            Capability::ViewAllProcesses => "can_view_all_processes",
            Capability::ManageSpecialties => "can_manage_specialties",
        }
    }
}

/// The four scalar flags. `None` means "this layer does not say".
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct CapabilityFlags {
    pub can_manage_users: Option<bool>,
    pub can_manage_financial: Option<bool>,
    pub can_view_all_processes: Option<bool>,
    pub can_manage_specialties: Option<bool>,
}

impl CapabilityFlags {
    pub fn all(value: bool) -> Self {
        Self {
            can_manage_users: Some(value),
            can_manage_financial: Some(value),
            can_view_all_processes: Some(value),
            can_manage_specialties: Some(value),
        }
    }

    pub fn get(&self, capability: Capability) -> Option<bool> {
        match capability {
            Capability::ManageUsers => self.can_manage_users,
            Capability::ManageFinancial => self.can_manage_financial,
            Capability::ViewAllProcesses => self.can_view_all_processes,
            Capability::ManageSpecialties => self.can_manage_specialties,
        }
    }

    fn slot(&mut self, capability: Capability) -> &mut Option<bool> {
        match capability {
            Capability::ManageUsers => &mut self.can_manage_users,
            Capability::ManageFinancial => &mut self.can_manage_financial,
            Capability::ViewAllProcesses => &mut self.can_view_all_processes,
            Capability::ManageSpecialties => &mut self.can_manage_specialties,
        }
    }

    /// A later layer's non-null value wins; otherwise the earlier value stands.
    pub fn overlay(&self, later: &CapabilityFlags) -> CapabilityFlags {
        CapabilityFlags {
            can_manage_users: later.can_manage_users.or(self.can_manage_users),
            can_manage_financial: later.can_manage_financial.or(self.can_manage_financial),
            can_view_all_processes: later.can_view_all_processes.or(self.can_view_all_processes),
            can_manage_specialties: later.can_manage_specialties.or(self.can_manage_specialties),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Permission set
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PermissionMapError {
    #[error("permission map must be a JSON object")]
    NotAnObject,

    #[error("field '{0}' has an invalid shape")]
    InvalidField(String),
}

/// One layer of permissions (or the merged result of several).
///
/// Serialized as the flat JSON document stored on memberships and roles:
///
/// ```json
/// { "clients": { "read": true }, "can_manage_users": false, "modules": ["clients"] }
/// ```
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct PermissionSet {
    cells: BTreeMap<Module, BTreeMap<String, bool>>,
    flags: CapabilityFlags,
    modules: ModuleAccess,
}

impl PermissionSet {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Set a `(module, action)` cell.
    pub fn with(mut self, module: Module, action: impl Into<String>, value: bool) -> Self {
        self.cells.entry(module).or_default().insert(action.into(), value);
        self
    }

    /// Grant several actions of one module.
    pub fn grant(mut self, module: Module, actions: &[&str]) -> Self {
        let cell = self.cells.entry(module).or_default();
        for action in actions {
            cell.insert((*action).to_string(), true);
        }
        self
    }

    /// Grant every known action of a module.
    pub fn grant_all_actions(self, module: Module) -> Self {
        self.grant(module, module.actions())
    }

    pub fn with_flag(mut self, capability: Capability, value: bool) -> Self {
        *self.flags.slot(capability) = Some(value);
        self
    }

    pub fn with_flags(mut self, flags: CapabilityFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_modules(mut self, modules: ModuleAccess) -> Self {
        self.modules = modules;
        self
    }

    pub fn cell(&self, module: Module, action: &str) -> Option<bool> {
        self.cells.get(&module).and_then(|m| m.get(action)).copied()
    }

    pub fn cells(&self) -> &BTreeMap<Module, BTreeMap<String, bool>> {
        &self.cells
    }

    pub fn flags(&self) -> &CapabilityFlags {
        &self.flags
    }

    pub fn modules(&self) -> &ModuleAccess {
        &self.modules
    }

    pub fn is_empty(&self) -> bool {
        self.cells.values().all(|m| m.is_empty())
            && self.flags == CapabilityFlags::default()
            && self.modules == ModuleAccess::default()
    }

    /// Merge `later` on top of `self`, producing a new snapshot.
    ///
    /// - `modules` unions (`"*"` absorbs);
    /// - every `(module, action)` cell ORs;
    /// - capability flags take the later non-null value.
    pub fn merge(&self, later: &PermissionSet) -> PermissionSet {
        let mut cells = self.cells.clone();
        for (module, actions) in &later.cells {
            let target = cells.entry(*module).or_default();
            for (action, granted) in actions {
                let slot = target.entry(action.clone()).or_insert(false);
                *slot = *slot || *granted;
            }
        }

        PermissionSet {
            cells,
            flags: self.flags.overlay(&later.flags),
            modules: self.modules.union(&later.modules),
        }
    }

    /// `true` only when the cell is explicitly granted.
    pub fn has(&self, module: Module, action: &str) -> bool {
        self.cell(module, action).unwrap_or(false)
    }

    pub fn can_access(&self, module: Module) -> bool {
        self.modules.allows(module)
    }

    pub fn list_modules(&self) -> Vec<Module> {
        self.modules.expand()
    }

    pub fn capability(&self, capability: Capability) -> bool {
        self.flags.get(capability).unwrap_or(false)
    }

    /// Granted cells as `"module.action"` strings, sorted.
    pub fn granted(&self) -> Vec<String> {
        self.cells
            .iter()
            .flat_map(|(module, actions)| {
                actions
                    .iter()
                    .filter(|(_, granted)| **granted)
                    .map(move |(action, _)| format!("{module}.{action}"))
            })
            .collect()
    }
}

impl From<PermissionSet> for Value {
    fn from(set: PermissionSet) -> Self {
        let mut doc = Map::new();
        for (module, actions) in &set.cells {
            let cells: Map<String, Value> = actions
                .iter()
                .map(|(action, granted)| (action.clone(), Value::Bool(*granted)))
                .collect();
            doc.insert(module.as_str().to_string(), Value::Object(cells));
        }
        for capability in Capability::ALL {
            if let Some(value) = set.flags.get(capability) {
                doc.insert(capability.key().to_string(), Value::Bool(value));
            }
        }
        doc.insert(
            "modules".to_string(),
            Value::Array(set.modules.to_strings().into_iter().map(Value::String).collect()),
        );
        Value::Object(doc)
    }
}

impl TryFrom<Value> for PermissionSet {
    type Error = PermissionMapError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        let doc = match value {
            Value::Object(doc) => doc,
            Value::Null => return Ok(PermissionSet::empty()),
            _ => return Err(PermissionMapError::NotAnObject),
        };

        let mut set = PermissionSet::empty();
        for (key, value) in doc {
            if key == "modules" {
                let modules: ModuleAccess = serde_json::from_value(value)
                    .map_err(|_| PermissionMapError::InvalidField(key.clone()))?;
                set.modules = modules;
                continue;
            }

            if let Some(capability) = Capability::ALL.iter().find(|c| c.key() == key) {
                let flag = match value {
                    Value::Null => None,
                    Value::Bool(b) => Some(b),
                    _ => return Err(PermissionMapError::InvalidField(key)),
                };
                *set.flags.slot(*capability) = flag;
                continue;
            }

            // Maps outlive the module catalogue; a retired module grants nothing.
            let Ok(module) = key.parse::<Module>() else {
                warn!(module = %key, "ignoring unknown permission module");
                continue;
            };
            let Value::Object(actions) = value else {
                return Err(PermissionMapError::InvalidField(key));
            };
            let cells = set.cells.entry(module).or_default();
            for (action, granted) in actions {
                let Value::Bool(granted) = granted else {
                    return Err(PermissionMapError::InvalidField(format!("{key}.{action}")));
                };
                cells.insert(action, granted);
            }
        }

        Ok(set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn document_shape_roundtrips() {
        let doc = json!({
            "clients": { "read": true, "delete": false },
            "can_manage_users": true,
            "modules": ["clients", "processes"],
        });
        let set: PermissionSet = serde_json::from_value(doc.clone()).unwrap();
        assert!(set.has(Module::Clients, "read"));
        assert!(!set.has(Module::Clients, "delete"));
        assert!(set.capability(Capability::ManageUsers));
        assert!(set.can_access(Module::Processes));
        assert!(!set.can_access(Module::Financial));
        assert_eq!(serde_json::to_value(&set).unwrap(), doc);
    }

    #[test]
    fn wildcard_module_list_absorbs() {
        let set: PermissionSet = serde_json::from_value(json!({ "modules": ["clients", "*"] })).unwrap();
        assert_eq!(set.modules(), &ModuleAccess::All);
        assert_eq!(set.list_modules().len(), Module::ALL.len());
    }

    #[test]
    fn unknown_module_keys_are_skipped() {
        let set = PermissionSet::try_from(json!({
            "spaceships": { "read": true },
            "clients": { "read": true },
            "modules": ["clients", "spaceships"],
        }))
        .unwrap();
        assert!(set.has(Module::Clients, "read"));
        assert!(!set.has(Module::Clients, "delete"));
        assert!(!set.has(Module::Processes, "read"));
        assert_eq!(set.modules(), &ModuleAccess::only([Module::Clients]));
    }

    #[test]
    fn malformed_cells_are_still_rejected() {
        let err = PermissionSet::try_from(json!({ "clients": { "read": "yes" } })).unwrap_err();
        assert_eq!(err, PermissionMapError::InvalidField("clients.read".into()));
    }

    #[test]
    fn merge_ors_cells_and_overrides_flags() {
        let base = PermissionSet::empty()
            .grant(Module::Clients, &["read"])
            .with_flag(Capability::ManageUsers, true)
            .with_modules(ModuleAccess::only([Module::Clients]));
        let overlay = PermissionSet::empty()
            .with(Module::Clients, "read", false)
            .grant(Module::Processes, &["delete"])
            .with_flag(Capability::ManageUsers, false)
            .with_modules(ModuleAccess::only([Module::Processes]));

        let merged = base.merge(&overlay);
        assert!(merged.has(Module::Clients, "read"), "cells OR, a later false does not revoke");
        assert!(merged.has(Module::Processes, "delete"));
        assert!(!merged.capability(Capability::ManageUsers));
        assert!(merged.can_access(Module::Clients));
        assert!(merged.can_access(Module::Processes));
    }

    #[test]
    fn null_flag_keeps_earlier_value() {
        let base = PermissionSet::empty().with_flag(Capability::ViewAllProcesses, true);
        let merged = base.merge(&PermissionSet::empty());
        assert!(merged.capability(Capability::ViewAllProcesses));
    }

    fn arb_set() -> impl Strategy<Value = PermissionSet> {
        let cell = (0usize..Module::ALL.len(), 0usize..5, any::<bool>());
        (
            proptest::collection::vec(cell, 0..12),
            proptest::collection::vec(0usize..Module::ALL.len(), 0..4),
            any::<bool>(),
        )
            .prop_map(|(cells, modules, wildcard)| {
                let mut set = PermissionSet::empty();
                for (m, a, v) in cells {
                    let module = Module::ALL[m];
                    let actions = module.actions();
                    set = set.with(module, actions[a % actions.len()], v);
                }
                let access = if wildcard {
                    ModuleAccess::All
                } else {
                    ModuleAccess::only(modules.into_iter().map(|m| Module::ALL[m]))
                };
                set.with_modules(access)
            })
    }

    proptest! {
        #[test]
        fn merged_grant_requires_a_granting_layer(a in arb_set(), b in arb_set(), m in 0usize..9, act in 0usize..5) {
            let module = Module::ALL[m];
            let action = module.actions()[act % module.actions().len()];
            let merged = a.merge(&b);
            prop_assert_eq!(merged.has(module, action), a.has(module, action) || b.has(module, action));
        }

        #[test]
        fn empty_layers_deny_everything(m in 0usize..9, act in 0usize..5) {
            let module = Module::ALL[m];
            let action = module.actions()[act % module.actions().len()];
            let merged = PermissionSet::empty().merge(&PermissionSet::empty());
            prop_assert!(!merged.has(module, action));
            prop_assert!(!merged.can_access(module));
        }

        #[test]
        fn merge_is_associative(a in arb_set(), b in arb_set(), c in arb_set()) {
            prop_assert_eq!(a.merge(&b).merge(&c), a.merge(&b.merge(&c)));
        }
    }
}
