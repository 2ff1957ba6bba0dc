//! Credential storage behind a narrow trait.
//!
//! The client never persists tokens itself; the embedding application
//! decides where sessions live (keychain, encrypted file, test fixture) and
//! hands the client a [`CredentialSource`]. The client reads the session at
//! connect time and on every REST request, and clears it when the server
//! rejects the credential as expired.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use medlane_store::UserSummary;

/// A signed-in identity: the bearer token plus the user it belongs to.
#[derive(Debug, Clone)]
pub struct Session {
    pub token: String,
    pub user: UserSummary,
}

/// Where the client obtains and invalidates credentials.
pub trait CredentialSource: Send + Sync {
    /// Current session, if any.
    fn get(&self) -> Option<Session>;

    /// Discard the stored session. Called when the server reports the
    /// credential expired; a later `get` must not return the stale token.
    fn clear(&self);

    /// Ask the application to send the user back through sign-in. Invoked at
    /// most once per expiry, after `clear`.
    fn force_reauth(&self);
}

/// In-memory [`CredentialSource`] for tests and short-lived tools.
#[derive(Default)]
pub struct MemorySessionStore {
    session: Mutex<Option<Session>>,
    reauth_requested: AtomicBool,
}

impl MemorySessionStore {
    pub fn new(session: Session) -> Self {
        Self {
            session: Mutex::new(Some(session)),
            reauth_requested: AtomicBool::new(false),
        }
    }

    pub fn set(&self, session: Session) {
        if let Ok(mut slot) = self.session.lock() {
            *slot = Some(session);
        }
        self.reauth_requested.store(false, Ordering::SeqCst);
    }

    /// Whether `force_reauth` has fired since the last `set`.
    pub fn reauth_requested(&self) -> bool {
        self.reauth_requested.load(Ordering::SeqCst)
    }
}

impl CredentialSource for MemorySessionStore {
    fn get(&self) -> Option<Session> {
        self.session.lock().ok().and_then(|slot| slot.clone())
    }

    fn clear(&self) {
        if let Ok(mut slot) = self.session.lock() {
            *slot = None;
        }
    }

    fn force_reauth(&self) {
        self.reauth_requested.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(token: &str) -> Session {
        Session {
            token: token.into(),
            user: UserSummary {
                id: "u-1".into(),
                name: "Dana".into(),
                role: "patient".into(),
                avatar: None,
            },
        }
    }

    #[test]
    fn test_memory_store_round_trip() {
        let store = MemorySessionStore::new(session("tok-1"));
        let got = store.get().unwrap();
        assert_eq!(got.token, "tok-1");
        assert_eq!(got.user.name, "Dana");
    }

    #[test]
    fn test_clear_removes_session() {
        let store = MemorySessionStore::new(session("tok-1"));
        store.clear();
        assert!(store.get().is_none());
    }

    #[test]
    fn test_set_resets_reauth_flag() {
        let store = MemorySessionStore::new(session("tok-1"));
        store.force_reauth();
        assert!(store.reauth_requested());

        store.set(session("tok-2"));
        assert!(!store.reauth_requested());
        assert_eq!(store.get().unwrap().token, "tok-2");
    }
}
