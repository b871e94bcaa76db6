//! Services layer for session-service.
//!
//! Role resolution, the auth session lifecycle and organization selection,
//! over pluggable backends.

pub mod auth_session;
pub mod backend;
pub mod claims;
pub mod committees;
pub mod cookies;
pub mod error;
pub mod metrics;
pub mod mock;
pub mod organization;
pub mod role_resolver;
pub mod supabase;
pub mod supervisor;
pub mod tiers;

pub use auth_session::{AuthSessionManager, AuthState, SessionTimings};
pub use backend::{AuthProvider, BackendFactory, MembershipStore, ScopedBackend, StaticSessionProvider};
pub use claims::{AccessTokenClaims, ClaimsDecoder, ClaimsError};
pub use committees::CommitteeLoader;
pub use cookies::{AuthCookies, CachedIdentity, CookieStore, JarCookieStore, MemoryCookieStore};
pub use error::BackendError;
pub use mock::{MockBackend, MockFault};
pub use organization::{OrganizationResolver, OrganizationState, OrganizationWatcher};
pub use role_resolver::RoleResolver;
pub use supabase::SupabaseBackend;
pub use supervisor::{Admission, BusyPolicy, LoadSupervisor, LoadSlot};
pub use tiers::{ClaimsTier, CookieTier, CurrencyCheck, DatabaseTier, RoleRequest, RoleTier, TierKind};
