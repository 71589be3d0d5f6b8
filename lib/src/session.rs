//! Session and identity (spec §4.6): the role hierarchy, login attempts
//! guarded by a single global one-second brute-force cooldown, and the
//! storage seam ([`SessionStore`]) that `scriptura-server` backs with its
//! embedded database.

use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use thiserror::Error;

/// The five-level role hierarchy, ordered so that `a >= b` means "`a` may
/// do everything `b` may do" via the derived `Ord`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Guest,
    Member,
    Consultant,
    Translator,
    Manager,
    Admin,
}

impl Role {
    pub fn at_least(self, required: Role) -> bool {
        self >= required
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub username: String,
    pub role: Role,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("unknown username")]
    UnknownUser,
    #[error("incorrect password")]
    IncorrectPassword,
    #[error("too many login attempts, try again shortly")]
    RateLimited,
    #[error("storage error: {0}")]
    Storage(String),
}

/// Everything about an account that login needs, kept separate from
/// [`Session`] so stores don't have to hand back a password hash to every
/// caller that just wants the current session.
pub struct Account {
    pub username: String,
    pub role: Role,
    pub password_hash: String,
    pub email: String,
}

/// Storage seam for accounts and active sessions. `scriptura-server`
/// implements this over its embedded database; tests implement it with a
/// plain in-memory map.
pub trait SessionStore: Send + Sync {
    fn find_account(&self, username: &str) -> Result<Option<Account>, SessionError>;
    fn record_session(&self, session: &Session) -> Result<(), SessionError>;
}

/// Verifies a plaintext password against a bcrypt hash. Kept as a free
/// function (rather than inlined into `attempt_login`) so
/// `scriptura-server`'s account-creation code can reuse the same check
/// when changing a password.
pub fn verify_password(password: &str, hash: &str) -> bool {
    bcrypt::verify(password, hash).unwrap_or(false)
}

/// Global brute-force cooldown (spec §4.6: "a single failure arms a
/// one-second global cooldown, not per-account"): only a *failed* login
/// arms the cooldown; checking whether the cooldown is currently armed is
/// read-only and does not itself arm anything. `AtomicU64` holds the
/// last-failure timestamp as Unix seconds.
pub struct LoginThrottle {
    last_failure_unix: AtomicU64,
    cooldown_seconds: u64,
}

impl LoginThrottle {
    pub fn new(cooldown_seconds: u64) -> Self {
        Self {
            last_failure_unix: AtomicU64::new(0),
            cooldown_seconds,
        }
    }

    /// Read-only: `true` if the cooldown armed by the last registered
    /// failure has elapsed. Never mutates state, so checking twice in a
    /// row (e.g. once up front, once to decide whether to register) never
    /// arms the cooldown by itself.
    pub fn check_okay(&self, now_unix: u64) -> bool {
        let previous = self.last_failure_unix.load(Ordering::Acquire);
        now_unix.saturating_sub(previous) >= self.cooldown_seconds
    }

    /// Arms the cooldown. Call only after a login attempt has failed; a
    /// successful login must never call this.
    pub fn register_failure(&self, now_unix: u64) {
        self.last_failure_unix.store(now_unix, Ordering::Release);
    }
}

impl Default for LoginThrottle {
    fn default() -> Self {
        Self::new(1)
    }
}

/// Attempts a login: rate limit first (so a wrong password never reveals
/// timing information about account existence), then look up the
/// account, then verify the password. Only a failed attempt — unknown
/// user or wrong password — arms the cooldown; a successful login never
/// does.
pub fn attempt_login(
    store: &dyn SessionStore,
    throttle: &LoginThrottle,
    now_unix: u64,
    username: &str,
    password: &str,
) -> Result<Session, SessionError> {
    if !throttle.check_okay(now_unix) {
        return Err(SessionError::RateLimited);
    }

    let account = match store
        .find_account(username)
        .map_err(|e| SessionError::Storage(e.to_string()))?
    {
        Some(account) => account,
        None => {
            throttle.register_failure(now_unix);
            return Err(SessionError::UnknownUser);
        }
    };

    if !verify_password(password, &account.password_hash) {
        throttle.register_failure(now_unix);
        return Err(SessionError::IncorrectPassword);
    }

    let session = Session {
        username: account.username,
        role: account.role,
    };
    store
        .record_session(&session)
        .map_err(|e| SessionError::Storage(e.to_string()))?;
    Ok(session)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    struct MapStore {
        accounts: Mutex<Vec<Account>>,
    }

    impl SessionStore for MapStore {
        fn find_account(&self, username: &str) -> Result<Option<Account>, SessionError> {
            Ok(self
                .accounts
                .lock()
                .unwrap()
                .iter()
                .find(|a| a.username == username)
                .map(|a| Account {
                    username: a.username.clone(),
                    role: a.role,
                    password_hash: a.password_hash.clone(),
                    email: a.email.clone(),
                }))
        }

        fn record_session(&self, _session: &Session) -> Result<(), SessionError> {
            Ok(())
        }
    }

    fn store_with(username: &str, password: &str, role: Role) -> MapStore {
        let hash = bcrypt::hash(password, bcrypt::DEFAULT_COST).unwrap();
        MapStore {
            accounts: Mutex::new(vec![Account {
                username: username.to_string(),
                role,
                password_hash: hash,
                email: format!("{username}@example.invalid"),
            }]),
        }
    }

    #[test]
    fn role_ordering_follows_hierarchy() {
        assert!(Role::Admin.at_least(Role::Guest));
        assert!(Role::Translator.at_least(Role::Member));
        assert!(!Role::Member.at_least(Role::Translator));
    }

    #[test]
    fn correct_password_succeeds() {
        let store = store_with("alice", "hunter2", Role::Translator);
        let throttle = LoginThrottle::new(0);
        let session = attempt_login(&store, &throttle, 1000, "alice", "hunter2").unwrap();
        assert_eq!(session.username, "alice");
        assert_eq!(session.role, Role::Translator);
    }

    #[test]
    fn wrong_password_fails() {
        let store = store_with("alice", "hunter2", Role::Translator);
        let throttle = LoginThrottle::new(0);
        let err = attempt_login(&store, &throttle, 1000, "alice", "wrong").unwrap_err();
        assert!(matches!(err, SessionError::IncorrectPassword));
    }

    #[test]
    fn unknown_user_fails() {
        let store = store_with("alice", "hunter2", Role::Translator);
        let throttle = LoginThrottle::new(0);
        let err = attempt_login(&store, &throttle, 1000, "bob", "irrelevant").unwrap_err();
        assert!(matches!(err, SessionError::UnknownUser));
    }

    #[test]
    fn rapid_attempts_after_a_failure_are_globally_rate_limited() {
        let store = store_with("alice", "hunter2", Role::Translator);
        let throttle = LoginThrottle::new(1);
        attempt_login(&store, &throttle, 1000, "alice", "wrong").unwrap_err();
        let err = attempt_login(&store, &throttle, 1000, "alice", "hunter2").unwrap_err();
        assert!(matches!(err, SessionError::RateLimited));
        // A second later, attempts are allowed again.
        attempt_login(&store, &throttle, 1001, "alice", "hunter2").unwrap();
    }

    #[test]
    fn successful_logins_never_arm_the_cooldown() {
        let store = store_with("alice", "hunter2", Role::Translator);
        let throttle = LoginThrottle::new(1);
        attempt_login(&store, &throttle, 1000, "alice", "hunter2").unwrap();
        // Same second, but the prior login succeeded, so this one isn't
        // rate limited.
        attempt_login(&store, &throttle, 1000, "alice", "hunter2").unwrap();
    }

    #[test]
    fn unknown_user_also_arms_the_cooldown() {
        let store = store_with("alice", "hunter2", Role::Translator);
        let throttle = LoginThrottle::new(1);
        attempt_login(&store, &throttle, 1000, "nobody", "irrelevant").unwrap_err();
        let err = attempt_login(&store, &throttle, 1000, "alice", "hunter2").unwrap_err();
        assert!(matches!(err, SessionError::RateLimited));
    }
}
