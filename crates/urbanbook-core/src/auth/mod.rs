//! Authentication module for managing the user session.
//!
//! This module provides:
//! - `SessionStore`: the logged-in user and derived flags, shared by all consumers
//! - `SessionResolver`: one-shot startup check of a persisted token
//! - `TokenStorage`: durable token persistence (file, OS keychain, memory)
//! - `gate`: routing decisions derived from the session state

pub mod gate;
pub mod resolver;
pub mod session;
pub mod storage;

pub use gate::{Gate, RouteAccess};
pub use resolver::{ProfileFetcher, ResolverState, SessionResolver};
pub use session::{SessionState, SessionStore};
pub use storage::{FileStorage, KeyringStorage, MemoryStorage, TokenStorage, TOKEN_KEY};
