use serde::{Deserialize, Serialize};

use super::role::MembershipStatus;

/// Embedded committee record returned alongside a committee membership.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitteeSummary {
    #[serde(rename = "nombre")]
    pub name: String,
}

/// A user's seat on a committee (`comite_usuarios`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitteeMembership {
    pub id: String,
    #[serde(rename = "comite_id")]
    pub committee_id: String,
    #[serde(rename = "usuario_id")]
    pub user_id: String,
    #[serde(rename = "rol")]
    pub role: String,
    #[serde(rename = "estado")]
    pub status: MembershipStatus,
    #[serde(default, rename = "comites", skip_serializing_if = "Option::is_none")]
    pub committee: Option<CommitteeSummary>,
}

impl CommitteeMembership {
    pub fn committee_name(&self) -> Option<&str> {
        self.committee.as_ref().map(|c| c.name.as_str())
    }
}
