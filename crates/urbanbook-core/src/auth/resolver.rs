//! One-shot startup validation of a persisted token.
//!
//! On start the session store knows nothing but a token may be on disk. The
//! resolver asks the backend for the current profile and reconciles the store
//! with the answer:
//!
//! ```text
//! Idle -> Resolving -> ResolvedAuthenticated
//!                   \-> ResolvedUnauthenticated
//! ```
//!
//! A login, logout or expiry that lands while the fetch is outstanding wins;
//! the late result is dropped and only `is_loading` is cleared.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::session::SessionStore;
use crate::api::ApiError;
use crate::models::User;

/// Retries after the first failed fetch
const DEFAULT_RETRIES: u32 = 1;

/// Delay before a retry
const DEFAULT_RETRY_DELAY_MS: u64 = 1000;

/// Source of the current user's profile, authenticated with the persisted token.
#[async_trait]
pub trait ProfileFetcher: Send + Sync {
    async fn fetch_current_user(&self) -> Result<User>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolverState {
    Idle,
    Resolving,
    ResolvedAuthenticated,
    ResolvedUnauthenticated,
}

impl ResolverState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ResolverState::ResolvedAuthenticated | ResolverState::ResolvedUnauthenticated
        )
    }
}

pub struct SessionResolver {
    store: SessionStore,
    fetcher: Arc<dyn ProfileFetcher>,
    retries: u32,
    retry_delay: Duration,
    state: ResolverState,
}

impl SessionResolver {
    pub fn new(store: SessionStore, fetcher: Arc<dyn ProfileFetcher>) -> Self {
        Self {
            store,
            fetcher,
            retries: DEFAULT_RETRIES,
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
            state: ResolverState::Idle,
        }
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn state(&self) -> ResolverState {
        self.state
    }

    /// Run resolution on a background task.
    pub fn spawn(mut self) -> JoinHandle<ResolverState> {
        tokio::spawn(async move { self.resolve().await })
    }

    /// Reconcile the store with the backend. Never fails.
    ///
    /// Only the first call does any work; later calls return the terminal state.
    pub async fn resolve(&mut self) -> ResolverState {
        if self.state != ResolverState::Idle {
            return self.state;
        }

        let Some(generation) = self.store.begin_resolution() else {
            debug!("User already known, skipping session resolution");
            self.state = ResolverState::ResolvedAuthenticated;
            return self.state;
        };

        self.state = ResolverState::Resolving;
        debug!(generation, "Resolving persisted session");

        let user = match self.fetch_with_retry().await {
            Ok(user) => {
                info!(user_id = %user.id, "Persisted session is valid");
                Some(user)
            }
            Err(e) => {
                info!(error = %e, "No valid persisted session");
                None
            }
        };

        self.store.commit_resolution(generation, user);

        // After a discarded commit the store reflects whichever call won
        self.state = if self.store.is_authenticated() {
            ResolverState::ResolvedAuthenticated
        } else {
            ResolverState::ResolvedUnauthenticated
        };
        self.state
    }

    async fn fetch_with_retry(&self) -> Result<User> {
        let mut attempt = 0;
        loop {
            match self.fetcher.fetch_current_user().await {
                Ok(user) => return Ok(user),
                Err(e) if ApiError::is_unauthorized(&e) => return Err(e),
                Err(e) if attempt < self.retries => {
                    attempt += 1;
                    warn!(error = %e, retry = attempt, "Profile fetch failed, retrying");
                    tokio::time::sleep(self.retry_delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
