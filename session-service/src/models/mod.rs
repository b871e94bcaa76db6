mod committee;
mod member;
mod organization;
mod role;
mod session;

pub use committee::{CommitteeMembership, CommitteeSummary};
pub use member::Member;
pub use organization::{
    AccessFlags, Branding, ContactInfo, Organization, OrganizationContext,
    OrganizationMembership, PlanLimits,
};
pub use role::{MembershipStatus, ResolvedRole, Role};
pub use session::{AppMetadata, AuthEvent, AuthEventKind, AuthSession, AuthUser, OrgRoleClaim};
