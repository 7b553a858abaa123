//! Process-wide session state: who is logged in, and with which token.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::storage::{TokenStorage, TOKEN_KEY};
use crate::cache::CacheInvalidator;
use crate::models::User;

/// Snapshot of the session as seen by readers.
///
/// `is_authenticated` is derived from `user`, so the two can never disagree.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    pub user: Option<User>,
    pub is_loading: bool,
    generation: u64,
}

impl SessionState {
    fn initial() -> Self {
        Self {
            user: None,
            is_loading: true,
            generation: 0,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }

    /// Identifies the current session; bumped by every login, logout and expiry.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EndReason {
    Logout,
    Expired,
}

struct Inner {
    storage: Arc<dyn TokenStorage>,
    cache: Arc<dyn CacheInvalidator>,
    state: watch::Sender<SessionState>,
}

/// Single source of truth for the logged-in user.
///
/// Clone is cheap and every clone shares the same state. All writes go
/// through these methods; readers take snapshots or subscribe.
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<Inner>,
}

impl SessionStore {
    /// Start with no user and `is_loading` set, pending the startup resolution.
    pub fn new(storage: Arc<dyn TokenStorage>, cache: Arc<dyn CacheInvalidator>) -> Self {
        let (state, _) = watch::channel(SessionState::initial());
        Self {
            inner: Arc::new(Inner {
                storage,
                cache,
                state,
            }),
        }
    }

    /// Current session snapshot
    pub fn state(&self) -> SessionState {
        self.inner.state.borrow().clone()
    }

    pub fn user(&self) -> Option<User> {
        self.inner.state.borrow().user.clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.state.borrow().is_authenticated()
    }

    pub fn is_loading(&self) -> bool {
        self.inner.state.borrow().is_loading
    }

    /// Observe every state change
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    /// Wait until the session is no longer loading and return that state.
    pub async fn resolved(&self) -> SessionState {
        let mut rx = self.subscribe();
        let result = rx.wait_for(|s| !s.is_loading).await.map(|s| s.clone());
        // The sender lives in `self`, so the channel cannot close while we wait
        result.unwrap_or_else(|_| self.state())
    }

    /// The persisted credential token, if any
    pub fn token(&self) -> Option<String> {
        match self.inner.storage.get(TOKEN_KEY) {
            Ok(token) => token,
            Err(e) => {
                warn!(error = %e, "Failed to read persisted token");
                None
            }
        }
    }

    /// Start a session with a token obtained from the login exchange.
    pub fn login(&self, token: &str, user: User) -> Result<()> {
        self.inner
            .storage
            .set(TOKEN_KEY, token)
            .context("Failed to persist session token")?;

        let user_id = user.id.clone();
        self.inner.state.send_modify(|s| {
            s.user = Some(user);
            s.is_loading = false;
            s.generation += 1;
        });
        info!(user_id = %user_id, "Logged in");
        Ok(())
    }

    /// End the session and drop all cached per-user data.
    pub fn logout(&self) {
        self.end_session(EndReason::Logout);
    }

    /// End the session because the backend rejected the token.
    pub fn expire(&self) {
        self.end_session(EndReason::Expired);
    }

    fn end_session(&self, reason: EndReason) {
        if let Err(e) = self.inner.storage.remove(TOKEN_KEY) {
            warn!(error = %e, "Failed to remove persisted token");
        }
        if let Err(e) = self.inner.cache.clear_all() {
            warn!(error = %e, "Failed to clear cache");
        }

        let mut had_user = false;
        self.inner.state.send_modify(|s| {
            had_user = s.user.take().is_some();
            s.generation += 1;
        });

        match reason {
            EndReason::Logout => info!(had_user, "Logged out"),
            EndReason::Expired => info!(had_user, "Session expired"),
        }
    }

    /// Replace the current user, e.g. after a profile edit.
    ///
    /// Returns `false` and changes nothing when no session exists.
    pub fn update_user(&self, user: User) -> bool {
        let updated = self.inner.state.send_if_modified(|s| {
            if s.user.is_none() {
                return false;
            }
            s.user = Some(user);
            true
        });
        if !updated {
            debug!("Ignoring user update without an active session");
        }
        updated
    }

    /// Begin startup resolution.
    ///
    /// Returns the generation the resolution belongs to, or `None` when a user
    /// is already known; in that case loading is finished on the spot.
    pub(crate) fn begin_resolution(&self) -> Option<u64> {
        let mut generation = None;
        self.inner.state.send_if_modified(|s| {
            if s.user.is_some() {
                let was_loading = s.is_loading;
                s.is_loading = false;
                return was_loading;
            }
            generation = Some(s.generation);
            false
        });
        generation
    }

    /// Apply the outcome of a resolution started at `generation`.
    ///
    /// Loading always ends. The user is only applied if no login, logout or
    /// expiry happened in between; returns whether it was.
    pub(crate) fn commit_resolution(&self, generation: u64, user: Option<User>) -> bool {
        let mut applied = false;
        self.inner.state.send_modify(|s| {
            s.is_loading = false;
            if s.generation == generation {
                s.user = user;
                applied = true;
            }
        });
        if !applied {
            debug!(generation, "Discarding stale session resolution");
        }
        applied
    }
}
