//! Server-side session store keyed by an opaque, unguessable token.
//! Single-node, in-memory; each session is addressed only by its own token so
//! no cross-session locking is needed. Expiry is checked lazily on access,
//! there is no background sweep.

use std::collections::HashMap;

use base64::Engine;
use parking_lot::RwLock;
use std::sync::Arc;

use crate::clock::Clock;
use crate::tprintln;

use super::principal::Principal;
use super::token::constant_time_eq;

/// Default session lifetime from login.
pub const SESSION_TTL_SECS: i64 = 3600;

// Principal-scoped keys. `logout` clears exactly these and nothing else.
const KEY_PRINCIPAL_ID: &str = "auth.principal_id";
const KEY_PRINCIPAL_NAME: &str = "auth.principal_name";
const KEY_PRINCIPAL_EMAIL: &str = "auth.principal_email";
const KEY_LOGIN_TIME: &str = "auth.login_time";
const KEY_VALID: &str = "auth.valid";
// Stored copy of the session identifier, compared constant-time on validate.
const KEY_SESSION_ID: &str = "session.id";

fn gen_token() -> String {
    // 256-bit random token, base64url without padding
    let mut buf = [0u8; 32];
    let _ = getrandom::getrandom(&mut buf);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(buf)
}

#[derive(Debug, Default)]
struct SessionData {
    values: HashMap<String, String>,
}

/// Structured failure from `validate_token`. Callers must not surface the
/// distinction between `NotValid`, `Mismatch` and a bad digest to clients;
/// it exists for logging and re-authentication prompts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRejection {
    NotFound,
    NotValid,
    Expired,
    Mismatch,
}

/// Registry of live sessions. All operations are fail-closed: anything done
/// to a destroyed or never-started session returns defaults rather than
/// erroring, except `validate_token` which reports why it refused.
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<RwLock<HashMap<String, SessionData>>>,
    clock: Clock,
    pub ttl: i64,
}

impl SessionStore {
    pub fn new(clock: Clock) -> Self {
        Self { inner: Arc::new(RwLock::new(HashMap::new())), clock, ttl: SESSION_TTL_SECS }
    }

    /// Ensure a session context exists. Passing a live token is idempotent
    /// and returns it unchanged; otherwise a fresh session is created.
    pub fn start(&self, token: Option<&str>) -> String {
        if let Some(t) = token {
            if self.inner.read().contains_key(t) {
                return t.to_string();
            }
        }
        let t = gen_token();
        let mut data = SessionData::default();
        data.values.insert(KEY_SESSION_ID.to_string(), t.clone());
        self.inner.write().insert(t.clone(), data);
        tprintln!("session.start sid={}", &t[..8.min(t.len())]);
        t
    }

    pub fn set(&self, token: &str, key: &str, value: &str) {
        if let Some(data) = self.inner.write().get_mut(token) {
            data.values.insert(key.to_string(), value.to_string());
        }
    }

    pub fn get(&self, token: &str, key: &str, default: &str) -> String {
        self.inner
            .read()
            .get(token)
            .and_then(|d| d.values.get(key).cloned())
            .unwrap_or_else(|| default.to_string())
    }

    pub fn has(&self, token: &str, key: &str) -> bool {
        self.inner
            .read()
            .get(token)
            .map(|d| d.values.contains_key(key))
            .unwrap_or(false)
    }

    pub fn remove(&self, token: &str, key: &str) {
        if let Some(data) = self.inner.write().get_mut(token) {
            data.values.remove(key);
        }
    }

    /// Wipe all state for this session and invalidate its identifier.
    pub fn destroy(&self, token: &str) {
        self.inner.write().remove(token);
    }

    /// Issue a fresh identifier with no carried-over state; the old session is
    /// destroyed. Used after privilege changes to defeat session fixation.
    pub fn regenerate(&self, token: &str) -> String {
        self.destroy(token);
        self.start(None)
    }

    /// Store the four principal-scoped fields atomically and mark the session
    /// valid.
    pub fn set_principal(&self, token: &str, principal: &Principal) {
        let now = self.clock.now();
        if let Some(data) = self.inner.write().get_mut(token) {
            data.values.insert(KEY_PRINCIPAL_ID.to_string(), principal.id.clone());
            data.values.insert(KEY_PRINCIPAL_NAME.to_string(), principal.name.clone());
            data.values.insert(KEY_PRINCIPAL_EMAIL.to_string(), principal.email.clone());
            data.values.insert(KEY_LOGIN_TIME.to_string(), now.to_string());
            data.values.insert(KEY_VALID.to_string(), "1".to_string());
        }
        tprintln!("session.login principal={}", principal.id);
    }

    pub fn is_authenticated(&self, token: &str) -> bool {
        self.get(token, KEY_VALID, "") == "1"
    }

    pub fn get_principal(&self, token: &str) -> Option<Principal> {
        if !self.is_authenticated(token) {
            return None;
        }
        let map = self.inner.read();
        let data = map.get(token)?;
        Some(Principal {
            id: data.values.get(KEY_PRINCIPAL_ID).cloned().unwrap_or_default(),
            name: data.values.get(KEY_PRINCIPAL_NAME).cloned().unwrap_or_default(),
            email: data.values.get(KEY_PRINCIPAL_EMAIL).cloned().unwrap_or_default(),
        })
    }

    /// Clear exactly the principal-scoped fields and the valid flag, leaving
    /// any other session data untouched. Narrower than `destroy`.
    pub fn logout(&self, token: &str) {
        if let Some(data) = self.inner.write().get_mut(token) {
            for k in [KEY_PRINCIPAL_ID, KEY_PRINCIPAL_NAME, KEY_PRINCIPAL_EMAIL, KEY_LOGIN_TIME, KEY_VALID] {
                data.values.remove(k);
            }
        }
    }

    /// A missing or unparseable login time counts as expired.
    pub fn is_expired(&self, token: &str, ttl: i64) -> bool {
        let raw = self.get(token, KEY_LOGIN_TIME, "");
        let Ok(login) = raw.parse::<i64>() else {
            return true;
        };
        self.clock.now() - login > ttl
    }

    /// Destroy the session when expired; reports whether it did so.
    pub fn sweep_if_expired(&self, token: &str) -> bool {
        if self.is_expired(token, self.ttl) {
            self.destroy(token);
            return true;
        }
        false
    }

    /// Full session check used by the authorizer: the session must exist, be
    /// marked valid, be unexpired, and the stored identifier must equal the
    /// presented one under constant-time comparison. Expired sessions are
    /// destroyed lazily here.
    pub fn validate_token(&self, presented: &str) -> Result<Principal, SessionRejection> {
        let stored_id = {
            let map = self.inner.read();
            let Some(data) = map.get(presented) else {
                return Err(SessionRejection::NotFound);
            };
            data.values.get(KEY_SESSION_ID).cloned().unwrap_or_default()
        };
        if !constant_time_eq(&stored_id, presented) {
            return Err(SessionRejection::Mismatch);
        }
        if !self.is_authenticated(presented) {
            return Err(SessionRejection::NotValid);
        }
        if self.is_expired(presented, self.ttl) {
            self.destroy(presented);
            return Err(SessionRejection::Expired);
        }
        self.get_principal(presented).ok_or(SessionRejection::NotValid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_at(now: i64) -> (SessionStore, Clock) {
        let clock = Clock::fixed(now);
        (SessionStore::new(clock.clone()), clock)
    }

    fn operator() -> Principal {
        Principal::new("op-7", "Field Operator", "op@farm.example")
    }

    #[test]
    fn start_is_idempotent_for_live_tokens() {
        let (s, _) = store_at(0);
        let t = s.start(None);
        assert_eq!(s.start(Some(&t)), t);
        let other = s.start(Some("no-such-session"));
        assert_ne!(other, "no-such-session");
    }

    #[test]
    fn principal_lifecycle() {
        let (s, _) = store_at(1000);
        let t = s.start(None);
        assert!(!s.is_authenticated(&t));
        assert_eq!(s.get_principal(&t), None);

        s.set_principal(&t, &operator());
        assert!(s.is_authenticated(&t));
        assert_eq!(s.get_principal(&t), Some(operator()));

        s.logout(&t);
        assert!(!s.is_authenticated(&t));
        assert_eq!(s.get_principal(&t), None);
    }

    #[test]
    fn logout_leaves_unrelated_keys() {
        let (s, _) = store_at(1000);
        let t = s.start(None);
        s.set(&t, "ui.theme", "dark");
        s.set_principal(&t, &operator());
        s.logout(&t);
        assert_eq!(s.get(&t, "ui.theme", ""), "dark");
        assert!(!s.has(&t, "auth.principal_id"));
    }

    #[test]
    fn destroy_wipes_everything() {
        let (s, _) = store_at(1000);
        let t = s.start(None);
        s.set(&t, "ui.theme", "dark");
        s.set_principal(&t, &operator());
        s.destroy(&t);
        assert_eq!(s.get(&t, "ui.theme", "default"), "default");
        assert!(!s.is_authenticated(&t));
        // operations on a destroyed session stay silent
        s.set(&t, "k", "v");
        assert_eq!(s.get(&t, "k", ""), "");
    }

    #[test]
    fn regenerate_issues_a_fresh_empty_session() {
        let (s, _) = store_at(1000);
        let t = s.start(None);
        s.set_principal(&t, &operator());
        let t2 = s.regenerate(&t);
        assert_ne!(t, t2);
        assert!(!s.is_authenticated(&t2));
        assert!(s.validate_token(&t).is_err());
    }

    #[test]
    fn expiry_boundaries() {
        let (s, clock) = store_at(10_000);
        let t = s.start(None);
        s.set_principal(&t, &operator());

        clock.advance(3599);
        assert!(!s.is_expired(&t, SESSION_TTL_SECS));
        assert!(s.validate_token(&t).is_ok());

        clock.advance(2); // now - login == 3601
        assert!(s.is_expired(&t, SESSION_TTL_SECS));
        assert_eq!(s.validate_token(&t), Err(SessionRejection::Expired));
        // lazily destroyed by the failed validation
        assert_eq!(s.validate_token(&t), Err(SessionRejection::NotFound));
    }

    #[test]
    fn missing_login_time_counts_as_expired() {
        let (s, _) = store_at(0);
        let t = s.start(None);
        assert!(s.is_expired(&t, SESSION_TTL_SECS));
        assert!(s.is_expired("never-started", SESSION_TTL_SECS));
    }

    #[test]
    fn sweep_reports_and_destroys() {
        let (s, clock) = store_at(0);
        let t = s.start(None);
        s.set_principal(&t, &operator());
        assert!(!s.sweep_if_expired(&t));
        clock.advance(SESSION_TTL_SECS + 1);
        assert!(s.sweep_if_expired(&t));
        assert_eq!(s.validate_token(&t), Err(SessionRejection::NotFound));
    }

    #[test]
    fn validate_rejects_unauthenticated_sessions() {
        let (s, _) = store_at(0);
        let t = s.start(None);
        assert_eq!(s.validate_token(&t), Err(SessionRejection::NotValid));
        assert_eq!(s.validate_token("unknown"), Err(SessionRejection::NotFound));
    }
}
