//! Session State Store
//!
//! Process-wide reactive record of `{user, is_authenticated}`. UI code reads
//! (and subscribes to) this store only; it never looks at the token store.
//! The record is persisted on every mutation so a reload starts from the
//! last known state instead of flashing an unauthenticated UI.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;

use portal_storage::Database;

use crate::profile::Profile;
use crate::token_store::TokenStore;
use crate::Result;

/// Settings key holding the persisted snapshot
pub const SESSION_SNAPSHOT_KEY: &str = "session_snapshot";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    pub user: Option<Profile>,
    pub is_authenticated: bool,
}

pub struct SessionStateStore {
    sender: Arc<watch::Sender<SessionState>>,
    /// Serializes mutate-then-persist so the row matches the last broadcast
    write_lock: Arc<Mutex<()>>,
    db: Database,
    tokens: TokenStore,
}

impl SessionStateStore {
    pub fn new(db: Database, tokens: TokenStore) -> Self {
        let (sender, _) = watch::channel(SessionState::default());

        Self {
            sender: Arc::new(sender),
            write_lock: Arc::new(Mutex::new(())),
            db,
            tokens,
        }
    }

    /// Load the persisted snapshot, then re-derive authentication from the token store.
    ///
    /// Returns the snapshot as it was persisted, before the check ran.
    pub fn initialize(&self) -> Result<SessionState> {
        let snapshot = match self.db.get_setting(SESSION_SNAPSHOT_KEY)? {
            Some(json) => serde_json::from_str::<SessionState>(&json).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Discarding unreadable session snapshot");
                SessionState::default()
            }),
            None => SessionState::default(),
        };

        self.sender.send_replace(snapshot.clone());
        self.check_auth_status()?;

        tracing::info!(
            restored_authenticated = snapshot.is_authenticated,
            authenticated = self.is_authenticated(),
            "Initialized session state"
        );

        Ok(snapshot)
    }

    pub fn state(&self) -> SessionState {
        self.sender.borrow().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.sender.borrow().is_authenticated
    }

    pub fn user(&self) -> Option<Profile> {
        self.sender.borrow().user.clone()
    }

    /// Receiver that observes every mutation
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.sender.subscribe()
    }

    /// Record the signed-in user and mark the session authenticated
    pub fn set_user(&self, profile: Profile) -> Result<()> {
        tracing::info!(email = %profile.email, "Session user set");
        self.mutate(|state| {
            state.user = Some(profile);
            state.is_authenticated = true;
        })
    }

    /// Drop the profile and mark the session unauthenticated
    pub fn clear(&self) -> Result<()> {
        tracing::info!("Session state cleared");
        self.mutate(|state| {
            state.user = None;
            state.is_authenticated = false;
        })
    }

    /// Recompute `is_authenticated` from access-token presence
    pub fn check_auth_status(&self) -> Result<bool> {
        let authenticated = self.tokens.has_access_token();
        self.mutate(|state| {
            state.is_authenticated = authenticated;
            if !authenticated {
                state.user = None;
            }
        })?;
        Ok(authenticated)
    }

    fn mutate<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut SessionState),
    {
        let _guard = self.write_lock.lock();

        let mut snapshot = SessionState::default();
        self.sender.send_if_modified(|state| {
            let before = state.clone();
            f(state);
            snapshot = state.clone();
            *state != before
        });

        let json = serde_json::to_string(&snapshot)?;
        self.db.set_setting(SESSION_SNAPSHOT_KEY, &json)?;
        Ok(())
    }
}

impl Clone for SessionStateStore {
    fn clone(&self) -> Self {
        Self {
            sender: Arc::clone(&self.sender),
            write_lock: Arc::clone(&self.write_lock),
            db: self.db.clone(),
            tokens: self.tokens.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::{TokenLifetimes, TokenPair};

    fn stores() -> (Database, TokenStore, SessionStateStore) {
        let db = Database::open_in_memory().unwrap();
        let tokens = TokenStore::new(db.clone(), TokenLifetimes::default());
        let state = SessionStateStore::new(db.clone(), tokens.clone());
        (db, tokens, state)
    }

    #[test]
    fn test_set_user_and_clear() {
        let (_db, _tokens, state) = stores();

        state.set_user(Profile::new("admin@portal.gov")).unwrap();
        assert!(state.is_authenticated());
        assert_eq!(state.user().unwrap().email, "admin@portal.gov");

        state.clear().unwrap();
        assert!(!state.is_authenticated());
        assert!(state.user().is_none());
    }

    #[test]
    fn test_check_auth_status_follows_tokens() {
        let (_db, tokens, state) = stores();

        state.set_user(Profile::new("admin@portal.gov")).unwrap();
        assert!(!state.check_auth_status().unwrap());
        assert!(state.user().is_none());

        tokens
            .replace(TokenPair::new("access", "refresh").unwrap())
            .unwrap();
        assert!(state.check_auth_status().unwrap());
        assert!(state.is_authenticated());
    }

    #[test]
    fn test_snapshot_survives_reload() {
        let (db, tokens, state) = stores();
        tokens
            .replace(TokenPair::new("access", "refresh").unwrap())
            .unwrap();
        state.set_user(Profile::new("editor@portal.gov")).unwrap();

        let reloaded = SessionStateStore::new(db, tokens);
        let snapshot = reloaded.initialize().unwrap();

        assert!(snapshot.is_authenticated);
        assert!(reloaded.is_authenticated());
        assert_eq!(reloaded.user().unwrap().email, "editor@portal.gov");
    }

    #[test]
    fn test_initialize_rederives_from_tokens() {
        let (db, tokens, state) = stores();
        state.set_user(Profile::new("editor@portal.gov")).unwrap();

        // Snapshot says authenticated, but no tokens were ever stored
        let reloaded = SessionStateStore::new(db, tokens);
        let snapshot = reloaded.initialize().unwrap();

        assert!(snapshot.is_authenticated);
        assert!(!reloaded.is_authenticated());
    }

    #[test]
    fn test_initialize_tolerates_corrupt_snapshot() {
        let (db, tokens, _state) = stores();
        db.set_setting(SESSION_SNAPSHOT_KEY, "not json").unwrap();

        let reloaded = SessionStateStore::new(db, tokens);
        let snapshot = reloaded.initialize().unwrap();
        assert_eq!(snapshot, SessionState::default());
    }

    #[tokio::test]
    async fn test_subscribers_observe_mutations() {
        let (_db, _tokens, state) = stores();
        let mut rx = state.subscribe();

        state.set_user(Profile::new("admin@portal.gov")).unwrap();
        rx.changed().await.unwrap();
        assert!(rx.borrow_and_update().is_authenticated);

        state.clear().unwrap();
        rx.changed().await.unwrap();
        assert!(!rx.borrow_and_update().is_authenticated);
    }
}
