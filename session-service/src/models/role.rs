//! Role and membership status as stored by the backend (`rol`, `estado`).
//!
//! Both are string-backed: unknown values coming from the backend or from a
//! cookie are carried through unchanged instead of being rejected.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Role {
    SuperAdmin,
    Admin,
    Tesorero,
    Secretario,
    Miembro,
    Other(String),
}

impl Role {
    pub fn as_str(&self) -> &str {
        match self {
            Role::SuperAdmin => "super_admin",
            Role::Admin => "admin",
            Role::Tesorero => "tesorero",
            Role::Secretario => "secretario",
            Role::Miembro => "miembro",
            Role::Other(s) => s,
        }
    }

    /// Admin or super admin.
    pub fn is_admin(&self) -> bool {
        matches!(self, Role::Admin | Role::SuperAdmin)
    }

    pub fn is_treasurer(&self) -> bool {
        matches!(self, Role::Tesorero)
    }

    pub fn is_admin_or_treasurer(&self) -> bool {
        self.is_admin() || self.is_treasurer()
    }
}

impl From<&str> for Role {
    fn from(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "super_admin" | "superadmin" => Role::SuperAdmin,
            "admin" => Role::Admin,
            "tesorero" | "treasurer" => Role::Tesorero,
            "secretario" => Role::Secretario,
            "miembro" | "member" => Role::Miembro,
            _ => Role::Other(value.to_string()),
        }
    }
}

impl From<String> for Role {
    fn from(value: String) -> Self {
        Role::from(value.as_str())
    }
}

impl From<Role> for String {
    fn from(role: Role) -> Self {
        role.as_str().to_string()
    }
}

impl FromStr for Role {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Role::from(s))
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MembershipStatus {
    Activo,
    Inactivo,
    Pendiente,
    Other(String),
}

impl MembershipStatus {
    pub fn as_str(&self) -> &str {
        match self {
            MembershipStatus::Activo => "activo",
            MembershipStatus::Inactivo => "inactivo",
            MembershipStatus::Pendiente => "pendiente",
            MembershipStatus::Other(s) => s,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, MembershipStatus::Activo)
    }
}

impl From<&str> for MembershipStatus {
    fn from(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "activo" | "active" => MembershipStatus::Activo,
            "inactivo" | "inactive" => MembershipStatus::Inactivo,
            "pendiente" | "pending" => MembershipStatus::Pendiente,
            _ => MembershipStatus::Other(value.to_string()),
        }
    }
}

impl From<String> for MembershipStatus {
    fn from(value: String) -> Self {
        MembershipStatus::from(value.as_str())
    }
}

impl From<MembershipStatus> for String {
    fn from(status: MembershipStatus) -> Self {
        status.as_str().to_string()
    }
}

impl fmt::Display for MembershipStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A role and its status, always resolved together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedRole {
    pub role: Role,
    pub status: MembershipStatus,
}

impl ResolvedRole {
    pub fn new(role: impl Into<Role>, status: impl Into<MembershipStatus>) -> Self {
        Self {
            role: role.into(),
            status: status.into(),
        }
    }
}
