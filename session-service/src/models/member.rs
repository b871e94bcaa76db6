use serde::Serialize;

use super::role::{MembershipStatus, ResolvedRole, Role};
use super::session::AuthUser;

/// Local projection of the signed-in user, recomputed on every auth event.
///
/// `access` is `None` until role resolution completes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Member {
    pub id: String,
    pub email: Option<String>,
    #[serde(flatten)]
    pub access: Option<ResolvedRole>,
}

impl Member {
    pub fn new(user: &AuthUser, access: Option<ResolvedRole>) -> Self {
        Self {
            id: user.id.clone(),
            email: user.email.clone(),
            access,
        }
    }

    pub fn role(&self) -> Option<&Role> {
        self.access.as_ref().map(|a| &a.role)
    }

    pub fn status(&self) -> Option<&MembershipStatus> {
        self.access.as_ref().map(|a| &a.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unresolved_member_has_neither_role_nor_status() {
        let member = Member::new(&AuthUser::new("u1", None), None);
        assert!(member.role().is_none());
        assert!(member.status().is_none());
    }

    #[test]
    fn serializes_flat() {
        let member = Member::new(
            &AuthUser::new("u1", Some("ana@iglesia.org")),
            Some(ResolvedRole::new(Role::Admin, MembershipStatus::Activo)),
        );
        let json = serde_json::to_value(&member).unwrap();
        assert_eq!(json["role"], "admin");
        assert_eq!(json["status"], "activo");
        assert_eq!(json["id"], "u1");
    }
}
