//! Client cookie cache for the resolved identity.
//!
//! Four cookies (`user_id`, `user_rol`, `user_estado`, `org_id`) are written
//! and cleared together. Reads never mix values from two identities: a
//! mismatching or partial entry is thrown away as a whole. Cookies that reach
//! the server are signed; one that fails verification reads as absent.

use axum_extra::extract::cookie::{Cookie, Key, SameSite, SignedCookieJar};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use secrecy::ExposeSecret;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::warn;

use crate::config::{CookieConfig, MIN_COOKIE_SECRET_LEN};
use crate::models::{MembershipStatus, ResolvedRole, Role};

pub const USER_ID_COOKIE: &str = "user_id";
pub const USER_ROLE_COOKIE: &str = "user_rol";
pub const USER_STATUS_COOKIE: &str = "user_estado";
pub const ORG_ID_COOKIE: &str = "org_id";

pub const AUTH_COOKIES: [&str; 4] = [
    USER_ID_COOKIE,
    USER_ROLE_COOKIE,
    USER_STATUS_COOKIE,
    ORG_ID_COOKIE,
];

/// Key/value cookie storage with expiry.
pub trait CookieStore: Send + Sync {
    fn get(&self, name: &str) -> Option<String>;
    fn set(&self, name: &str, value: &str, max_age: chrono::Duration);
    fn remove(&self, name: &str);
}

/// Process-local store, used where there is no browser on the other end.
#[derive(Default)]
pub struct MemoryCookieStore {
    entries: DashMap<String, (String, DateTime<Utc>)>,
}

impl MemoryCookieStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        let now = Utc::now();
        !self.entries.iter().any(|e| e.value().1 > now)
    }
}

impl CookieStore for MemoryCookieStore {
    fn get(&self, name: &str) -> Option<String> {
        let now = Utc::now();
        let value = self
            .entries
            .get(name)
            .and_then(|e| (e.value().1 > now).then(|| e.value().0.clone()));
        if value.is_none() {
            self.entries.remove_if(name, |_, (_, expires)| *expires <= now);
        }
        value
    }

    fn set(&self, name: &str, value: &str, max_age: chrono::Duration) {
        self.entries
            .insert(name.to_string(), (value.to_string(), Utc::now() + max_age));
    }

    fn remove(&self, name: &str) {
        self.entries.remove(name);
    }
}

/// Key the identity cookies are signed with. Without a usable secret a
/// per-process key is generated and cookies do not survive a restart.
pub fn cookie_key(config: &CookieConfig) -> Key {
    match &config.secret {
        Some(secret) if secret.expose_secret().len() >= MIN_COOKIE_SECRET_LEN => {
            Key::derive_from(secret.expose_secret().as_bytes())
        }
        _ => {
            warn!("COOKIE_SECRET not set - signing cookies with a per-process key");
            Key::generate()
        }
    }
}

/// Request-scoped store over the incoming signed cookie jar. Changes are
/// carried back to the client through [`JarCookieStore::jar`].
pub struct JarCookieStore {
    jar: Mutex<SignedCookieJar>,
    secure: bool,
}

impl JarCookieStore {
    pub fn new(jar: SignedCookieJar, secure: bool) -> Self {
        Self {
            jar: Mutex::new(jar),
            secure,
        }
    }

    /// Current jar, including additions and removal cookies.
    pub fn jar(&self) -> SignedCookieJar {
        self.jar
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn update(&self, f: impl FnOnce(SignedCookieJar) -> SignedCookieJar) {
        let mut guard = self.jar.lock().unwrap_or_else(PoisonError::into_inner);
        *guard = f(guard.clone());
    }
}

impl CookieStore for JarCookieStore {
    fn get(&self, name: &str) -> Option<String> {
        self.jar
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .map(|c| c.value().to_string())
    }

    fn set(&self, name: &str, value: &str, max_age: chrono::Duration) {
        let cookie = Cookie::build((name.to_string(), value.to_string()))
            .path("/")
            .http_only(true)
            .secure(self.secure)
            .same_site(SameSite::Lax)
            .max_age(time::Duration::seconds(max_age.num_seconds()));
        self.update(|jar| jar.add(cookie));
    }

    fn remove(&self, name: &str) {
        let cookie = Cookie::build((name.to_string(), "")).path("/");
        self.update(|jar| jar.remove(cookie));
    }
}

/// Snapshot of the identity cookies.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CachedIdentity {
    pub user_id: Option<String>,
    pub role: Option<String>,
    pub status: Option<String>,
    pub org_id: Option<String>,
}

impl CachedIdentity {
    /// Any of the identity triple is present.
    pub fn has_identity(&self) -> bool {
        self.user_id.is_some() || self.role.is_some() || self.status.is_some()
    }

    /// The cached role, only if the whole triple is present and belongs to
    /// `user_id`.
    pub fn role_for(&self, user_id: &str) -> Option<ResolvedRole> {
        match (&self.user_id, &self.role, &self.status) {
            (Some(cached), Some(role), Some(status)) if cached == user_id => Some(ResolvedRole {
                role: Role::from(role.as_str()),
                status: MembershipStatus::from(status.as_str()),
            }),
            _ => None,
        }
    }
}

/// Typed access to the identity cookie set.
#[derive(Clone)]
pub struct AuthCookies {
    store: Arc<dyn CookieStore>,
    max_age: chrono::Duration,
}

impl AuthCookies {
    pub fn new(store: Arc<dyn CookieStore>, max_age: chrono::Duration) -> Self {
        Self { store, max_age }
    }

    pub fn read(&self) -> CachedIdentity {
        CachedIdentity {
            user_id: self.non_empty(USER_ID_COOKIE),
            role: self.non_empty(USER_ROLE_COOKIE),
            status: self.non_empty(USER_STATUS_COOKIE),
            org_id: self.non_empty(ORG_ID_COOKIE),
        }
    }

    /// Organization the client is currently browsing, if hinted.
    pub fn org_hint(&self) -> Option<String> {
        self.non_empty(ORG_ID_COOKIE)
    }

    pub fn write_role(&self, user_id: &str, resolved: &ResolvedRole) {
        self.store.set(USER_ID_COOKIE, user_id, self.max_age);
        self.store
            .set(USER_ROLE_COOKIE, resolved.role.as_str(), self.max_age);
        self.store
            .set(USER_STATUS_COOKIE, resolved.status.as_str(), self.max_age);
    }

    pub fn write_org(&self, org_id: &str) {
        self.store.set(ORG_ID_COOKIE, org_id, self.max_age);
    }

    pub fn clear(&self) {
        for name in AUTH_COOKIES {
            self.store.remove(name);
        }
    }

    fn non_empty(&self, name: &str) -> Option<String> {
        self.store.get(name).filter(|v| !v.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum_extra::extract::cookie::Cookie;

    fn memory_cookies() -> (Arc<MemoryCookieStore>, AuthCookies) {
        let store = Arc::new(MemoryCookieStore::new());
        let cookies = AuthCookies::new(store.clone(), chrono::Duration::days(7));
        (store, cookies)
    }

    #[test]
    fn write_then_read_round_trips_role() {
        let (_, cookies) = memory_cookies();
        cookies.write_role("u1", &ResolvedRole::new(Role::Admin, MembershipStatus::Activo));

        let cached = cookies.read();
        assert_eq!(
            cached.role_for("u1"),
            Some(ResolvedRole::new(Role::Admin, MembershipStatus::Activo))
        );
        assert_eq!(cached.role_for("u2"), None);
    }

    #[test]
    fn partial_identity_yields_no_role() {
        let (store, cookies) = memory_cookies();
        store.set(USER_ID_COOKIE, "u1", chrono::Duration::days(7));
        store.set(USER_ROLE_COOKIE, "admin", chrono::Duration::days(7));

        let cached = cookies.read();
        assert!(cached.has_identity());
        assert_eq!(cached.role_for("u1"), None);
    }

    #[test]
    fn clear_removes_all_four() {
        let (store, cookies) = memory_cookies();
        cookies.write_role("u1", &ResolvedRole::new(Role::Miembro, MembershipStatus::Activo));
        cookies.write_org("org-1");

        cookies.clear();

        assert!(store.is_empty());
        assert_eq!(cookies.read(), CachedIdentity::default());
    }

    #[test]
    fn expired_entries_are_absent() {
        let store = MemoryCookieStore::new();
        store.set(USER_ID_COOKIE, "u1", chrono::Duration::seconds(-1));
        assert_eq!(store.get(USER_ID_COOKIE), None);
    }

    fn request_jar(cookie_header: &'static str, key: &Key) -> SignedCookieJar {
        let mut headers = axum::http::HeaderMap::new();
        headers.insert(
            axum::http::header::COOKIE,
            axum::http::HeaderValue::from_static(cookie_header),
        );
        SignedCookieJar::from_headers(&headers, key.clone())
    }

    #[test]
    fn jar_store_reads_signed_cookies_and_records_removals() {
        let jar = SignedCookieJar::new(Key::generate())
            .add(Cookie::new(USER_ID_COOKIE, "u1"))
            .add(Cookie::new(ORG_ID_COOKIE, "org-9"));
        let store = JarCookieStore::new(jar, false);
        let cookies = AuthCookies::new(Arc::new(store), chrono::Duration::days(7));

        assert_eq!(cookies.org_hint().as_deref(), Some("org-9"));
        cookies.clear();
        assert_eq!(cookies.read(), CachedIdentity::default());
    }

    #[test]
    fn jar_store_ignores_unsigned_request_cookies() {
        let key = Key::generate();
        let jar = request_jar("user_id=u1; user_rol=super_admin; user_estado=activo", &key);
        let cookies = AuthCookies::new(
            Arc::new(JarCookieStore::new(jar, false)),
            chrono::Duration::days(7),
        );

        assert_eq!(cookies.read(), CachedIdentity::default());
        assert_eq!(cookies.read().role_for("u1"), None);
    }

    #[test]
    fn short_secret_falls_back_to_generated_key() {
        let config = CookieConfig {
            max_age_days: 7,
            secure: false,
            secret: Some(secrecy::Secret::new("too-short".to_string())),
        };
        let signed = SignedCookieJar::new(cookie_key(&config)).add(Cookie::new(USER_ID_COOKIE, "u1"));

        assert_eq!(signed.get(USER_ID_COOKIE).map(|c| c.value().to_string()), Some("u1".into()));
    }

    #[test]
    fn jar_store_sets_max_age() {
        let store = JarCookieStore::new(SignedCookieJar::new(Key::generate()), true);
        store.set(USER_ROLE_COOKIE, "tesorero", chrono::Duration::days(7));

        let jar = store.jar();
        let cookie = jar.get(USER_ROLE_COOKIE).unwrap();
        assert_eq!(cookie.value(), "tesorero");
        assert_eq!(cookie.max_age(), Some(time::Duration::days(7)));
        assert_eq!(cookie.secure(), Some(true));
    }
}
