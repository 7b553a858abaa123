//! Session state synchronization for the Urban Services booking client.
//!
//! This crate provides:
//! - `auth`: the session store, startup resolver, token storage and route gating
//! - `api`: the REST client for the authentication and profile endpoints
//! - `cache`: the on-disk cache of server-derived data, cleared on logout
//! - `config`: user configuration and directory layout
//! - `models`: user and authentication payloads
//!
//! A typical start-up wires them together like this:
//!
//! ```ignore
//! let store = SessionStore::new(storage, cache);
//! let api = ApiClient::from_config(&config, store.clone())?;
//! SessionResolver::new(store.clone(), Arc::new(api.clone())).spawn();
//! let state = store.resolved().await;
//! ```

pub mod api;
pub mod auth;
pub mod cache;
pub mod config;
pub mod models;

pub use api::{ApiClient, ApiError};
pub use auth::{
    FileStorage, Gate, KeyringStorage, MemoryStorage, ProfileFetcher, ResolverState, RouteAccess,
    SessionResolver, SessionState, SessionStore, TokenStorage,
};
pub use cache::{CacheInvalidator, CacheManager, CachedData};
pub use config::{Config, TokenBackend};
pub use models::{User, UserRole};
