//! REST client for the Urban Services booking backend.
//!
//! This module provides the `ApiClient` for the authentication and profile
//! endpoints. Requests carry the session's bearer token, and any 401 to an
//! authenticated request expires the session before the error reaches the
//! caller.

pub mod client;
pub mod error;

pub use client::ApiClient;
pub use error::ApiError;
