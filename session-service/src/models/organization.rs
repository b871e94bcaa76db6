use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::role::{MembershipStatus, Role};

/// Join row between a user and a tenant (`organizacion_usuarios`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganizationMembership {
    pub id: String,
    #[serde(rename = "organizacion_id")]
    pub organization_id: String,
    #[serde(rename = "usuario_id")]
    pub user_id: String,
    #[serde(rename = "rol")]
    pub role: Role,
    #[serde(rename = "estado")]
    pub status: MembershipStatus,
}

impl OrganizationMembership {
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanLimits {
    #[serde(default, rename = "max_miembros")]
    pub max_members: Option<u32>,
    #[serde(default, rename = "max_comites")]
    pub max_committees: Option<u32>,
    #[serde(default, rename = "max_usuarios")]
    pub max_users: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactInfo {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default, rename = "telefono")]
    pub phone: Option<String>,
    #[serde(default, rename = "direccion")]
    pub address: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Branding {
    #[serde(default)]
    pub logo_url: Option<String>,
    #[serde(default, rename = "color_primario")]
    pub primary_color: Option<String>,
}

/// Tenant record (`organizaciones`). Read-only here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    pub id: String,
    #[serde(rename = "nombre")]
    pub name: String,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub plan: Option<String>,
    #[serde(default, rename = "limites")]
    pub limits: Option<PlanLimits>,
    #[serde(flatten)]
    pub contact: ContactInfo,
    #[serde(flatten)]
    pub branding: Branding,
    #[serde(default, rename = "estado")]
    pub status: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Active tenant for the signed-in user.
///
/// `membership` can be present while `organization` is not: the record fetch
/// failed but the user is still known to belong somewhere.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OrganizationContext {
    pub membership: Option<OrganizationMembership>,
    pub organization: Option<Organization>,
}

impl OrganizationContext {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn role(&self) -> Option<&Role> {
        self.membership.as_ref().map(|m| &m.role)
    }

    pub fn is_admin(&self) -> bool {
        self.role().is_some_and(Role::is_admin)
    }

    pub fn is_treasurer(&self) -> bool {
        self.role().is_some_and(Role::is_treasurer)
    }

    pub fn is_admin_or_treasurer(&self) -> bool {
        self.role().is_some_and(Role::is_admin_or_treasurer)
    }

    pub fn flags(&self) -> AccessFlags {
        AccessFlags::for_role(self.role())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AccessFlags {
    pub is_admin: bool,
    pub is_treasurer: bool,
    pub is_admin_or_treasurer: bool,
}

impl AccessFlags {
    pub fn for_role(role: Option<&Role>) -> Self {
        Self {
            is_admin: role.is_some_and(Role::is_admin),
            is_treasurer: role.is_some_and(Role::is_treasurer),
            is_admin_or_treasurer: role.is_some_and(Role::is_admin_or_treasurer),
        }
    }
}
