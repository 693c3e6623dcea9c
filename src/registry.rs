//! Static catalog of dashboard modules and the roles that may see them

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use crate::error::RegistryError;

/// Coarse permission tag gating module visibility
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Manager,
    Technician,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::Admin, Role::Manager, Role::Technician];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Manager => "manager",
            Role::Technician => "technician",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "manager" => Ok(Role::Manager),
            "technician" => Ok(Role::Technician),
            _ => Err(RegistryError::UnknownRole(s.to_string())),
        }
    }
}

/// A navigable business-function area of the dashboard
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Module {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub allowed_roles: Vec<Role>,
}

impl Module {
    pub fn new(id: &str, title: &str, description: &str, allowed_roles: &[Role]) -> Self {
        Self {
            id: id.to_string(),
            title: title.to_string(),
            description: description.to_string(),
            allowed_roles: allowed_roles.to_vec(),
        }
    }

    pub fn visible_to(&self, role: Role) -> bool {
        self.allowed_roles.contains(&role)
    }
}

/// Immutable, declaration-ordered module catalog
#[derive(Debug, Clone)]
pub struct Registry {
    modules: Vec<Module>,
}

impl Registry {
    pub fn new(modules: Vec<Module>) -> Result<Self, RegistryError> {
        let mut seen = HashSet::new();
        for module in &modules {
            if !seen.insert(module.id.as_str()) {
                return Err(RegistryError::DuplicateModule(module.id.clone()));
            }
            if module.allowed_roles.is_empty() {
                return Err(RegistryError::NoRoles(module.id.clone()));
            }
        }
        Ok(Self { modules })
    }

    pub fn modules(&self) -> &[Module] {
        &self.modules
    }

    pub fn get(&self, id: &str) -> Option<&Module> {
        self.modules.iter().find(|m| m.id == id)
    }

    /// Modules visible to `role`, in declaration order
    pub fn visible(&self, role: Role) -> impl Iterator<Item = &Module> {
        self.modules.iter().filter(move |m| m.visible_to(role))
    }
}

impl Default for Registry {
    fn default() -> Self {
        use Role::*;

        Self {
            modules: vec![
                Module::new("crm", "CRM", "Clients, contacts and deals", &[Admin, Manager]),
                Module::new("tickets", "Tickets", "Support and incident tickets", &[Admin, Manager, Technician]),
                Module::new("inventory", "Inventory", "Stock levels and movements", &[Admin, Manager]),
                Module::new("accounting", "Accounting", "Invoices, expenses and ledgers", &[Admin]),
                Module::new(
                    "technical_resources",
                    "Technical resources",
                    "Equipment and tooling assigned to field work",
                    &[Admin, Manager, Technician],
                ),
                Module::new("technicians", "Technicians", "Field staff and schedules", &[Admin, Manager]),
                Module::new("villas", "Villas", "Managed properties", &[Admin, Manager, Technician]),
                Module::new("reports", "Reports", "Operational dashboards", &[Admin, Manager]),
                Module::new("users", "Users", "Accounts and role assignment", &[Admin]),
                Module::new("settings", "Settings", "Workspace preferences", &[Admin, Manager, Technician]),
            ],
        }
    }
}
