//! Local caching of server-derived data.
//!
//! This module provides the `CacheManager` for storing and retrieving
//! responses fetched on behalf of the logged-in user. Data is cached in JSON
//! format and considered stale after 5 minutes.
//!
//! The session store only sees the cache through `CacheInvalidator`, so that
//! logging out can drop every cached entry without knowing what is cached.

pub mod manager;

pub use manager::{CacheInvalidator, CacheManager, CachedData};
